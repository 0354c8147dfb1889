use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Code graph, embeddings and tiered analysis for a repository", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// TOML config file (environment variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout (implies --quiet)
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis pipeline on a repository
    Run(RunArgs),

    /// Parse a repository into a code graph
    Parse(ParseArgs),

    /// Split one file into embedding chunks
    Chunk(ChunkArgs),

    /// Apply the L2 filter to a JSON array of tool envelopes
    Filter(FilterArgs),

    /// List the group summaries saved under a results root
    Summaries(SummariesArgs),

    /// Inspect or invalidate graph snapshots
    #[command(subcommand)]
    Snapshots(SnapshotCommands),
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Repository root, or the work dir of the clone with --repo-url
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Clone this repository into PATH and analyze the clone
    #[arg(long)]
    pub repo_url: Option<String>,

    /// Branch to clone (`main` when omitted)
    #[arg(long, requires = "repo_url")]
    pub branch: Option<String>,

    /// Measure the contributions of this git author (name or email)
    #[arg(long)]
    pub author: Option<String>,

    /// Analysis id; generated when omitted
    #[arg(long)]
    pub analysis_id: Option<String>,

    /// Rebuild graph and vector index even when the commit has valid records
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub(crate) struct ParseArgs {
    /// Repository root (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Include every node and edge in JSON output
    #[arg(long)]
    pub graph: bool,
}

#[derive(Args)]
pub(crate) struct ChunkArgs {
    /// File to chunk
    pub file: PathBuf,

    /// Tokens per chunk (config value when omitted)
    #[arg(long)]
    pub size: Option<usize>,

    /// Tokens shared by neighbouring chunks (config value when omitted)
    #[arg(long)]
    pub overlap: Option<usize>,
}

#[derive(Args)]
pub(crate) struct FilterArgs {
    /// JSON file holding an array of envelopes
    pub envelopes: PathBuf,
}

#[derive(Args)]
pub(crate) struct SummariesArgs {
    /// Directory whose `results/` holds `l2_summary_*.json`
    pub root: PathBuf,
}

#[derive(Subcommand)]
pub(crate) enum SnapshotCommands {
    /// List every snapshot, newest first
    List(SnapshotRepoArgs),

    /// Mark the snapshots of a commit invalid
    Invalidate(InvalidateArgs),
}

#[derive(Args)]
pub(crate) struct SnapshotRepoArgs {
    /// Repository whose data dir holds the metadata db
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
}

#[derive(Args)]
pub(crate) struct InvalidateArgs {
    /// Commit hash
    pub commit: String,

    #[command(flatten)]
    pub repo: SnapshotRepoArgs,
}

/// Output options shared by every command
#[derive(Debug, Clone)]
pub(crate) struct Output {
    pub json: bool,
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    if cli.json {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let output = Output {
        json: cli.json,
        config: cli.config,
    };
    match cli.command {
        Commands::Run(args) => commands::run(args, &output).await,
        Commands::Parse(args) => commands::parse(args, &output).await,
        Commands::Chunk(args) => commands::chunk(args, &output).await,
        Commands::Filter(args) => commands::filter(args, &output).await,
        Commands::Summaries(args) => commands::summaries(args, &output).await,
        Commands::Snapshots(command) => commands::snapshots(command, &output).await,
    }
}
