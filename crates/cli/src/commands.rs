use crate::{
    ChunkArgs, FilterArgs, Output, ParseArgs, RunArgs, SnapshotCommands, SnapshotRepoArgs,
    SummariesArgs,
};
use anyhow::{Context, Result};
use insight_analyzers::{selection_ratio, EventEnvelope, L2Filter, L2Reducer};
use insight_graph::SnapshotManager;
use insight_metadata::{SqliteMetadataStore, DEFAULT_BRANCH};
use insight_parser::{GraphEdge, GraphNode, RepoWalker, RepositoryGraph};
use insight_pipeline::{
    clone_repository, Pipeline, PipelineConfig, RunReport, RunRequest, RunStatus,
    METADATA_DB_FILE,
};
use insight_vector_store::CodeChunk;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exit status of a run stopped by Ctrl-C
const EXIT_CANCELLED: i32 = 130;

fn load_config(output: &Output) -> Result<PipelineConfig> {
    PipelineConfig::load(output.config.as_deref()).context("Failed to load configuration")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn run(args: RunArgs, output: &Output) -> Result<()> {
    let mut config = load_config(output)?;
    let root = match &args.repo_url {
        Some(url) => {
            let branch = args.branch.as_deref().unwrap_or(DEFAULT_BRANCH);
            let checkout = clone_repository(url, branch, &args.path).await?;
            config.graph.repo_url = Some(url.clone());
            config.graph.branch = Some(branch.to_string());
            checkout.canonicalize().context("Invalid project path")?
        }
        None => args.path.canonicalize().context("Invalid project path")?,
    };
    let pipeline = Pipeline::from_config(config, &root)?;

    let token = pipeline.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling the run");
            token.cancel();
        }
    });

    let mut request = RunRequest::new(&root).with_force_rebuild(args.force);
    if let Some(id) = args.analysis_id {
        request = request.with_analysis_id(id);
    }
    if let Some(author) = args.author {
        request = request.with_author(author);
    }
    let report = pipeline.run(request).await;
    interrupt.abort();

    if output.json {
        print_json(&report)?;
    } else {
        print_run_report(&report);
    }

    match report.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed => std::process::exit(1),
        RunStatus::Cancelled => std::process::exit(EXIT_CANCELLED),
    }
}

fn print_run_report(report: &RunReport) {
    println!("Analysis {} at {}", report.analysis_id, report.commit_hash);

    let graph = &report.graph;
    let graph_origin = if graph.reused { "reused" } else { "built" };
    println!(
        "  graph:   {graph_origin}, {} nodes, {} edges ({} files parsed, {} failed)",
        graph.node_count, graph.edge_count, graph.files_parsed, graph.files_failed
    );

    let vector = &report.vector;
    let vector_origin = if vector.reused { "reused" } else { "built" };
    println!(
        "  vectors: {vector_origin}, {} chunks, {} indexed, {} degraded ({})",
        vector.chunks, vector.indexed, vector.degraded, vector.embedding_model
    );

    for group in &report.groups {
        let mut line = format!(
            "  {}: {} files, {} selected ({:.0}%)",
            group.group_id,
            group.files,
            group.selected.len(),
            group.selection_ratio * 100.0
        );
        if group.threshold_exceeded {
            line.push_str(", over threshold");
        }
        if let Some(path) = &group.summary_path {
            line.push_str(&format!(" -> {}", path.display()));
        }
        if let Some(err) = &group.error {
            line.push_str(&format!(" [{err}]"));
        }
        println!("{line}");
    }

    if let Some(stats) = &report.contribution {
        println!(
            "  author:  {}, {} commits, +{}/-{} lines in {} files, owns {} lines",
            stats.author,
            stats.commits,
            stats.added_lines,
            stats.deleted_lines,
            stats.files_changed,
            stats.owned_lines
        );
    }

    for (class, count) in &report.stats.error_counts {
        println!("  errors[{}]: {count}", class.as_str());
    }
    match (&report.status, &report.fatal_error) {
        (RunStatus::Failed, Some(fatal)) => {
            eprintln!("Error: {} ({})", fatal.message, fatal.class.as_str())
        }
        (status, _) => println!(
            "Status: {status:?} in {:.1}s",
            report.stats.duration_ms as f64 / 1000.0
        ),
    }
}

#[derive(Serialize)]
struct ParseResponse {
    root: PathBuf,
    files_parsed: usize,
    files_failed: usize,
    node_count: usize,
    edge_count: usize,
    node_types: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<Vec<GraphNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edges: Option<Vec<GraphEdge>>,
}

pub(crate) async fn parse(args: ParseArgs, output: &Output) -> Result<()> {
    let root = args.path.canonicalize().context("Invalid project path")?;
    let config = load_config(output)?;
    let max_file_size = config.parser.max_file_size_bytes;

    let walk_root = root.clone();
    let graph = tokio::task::spawn_blocking(move || parse_walked(&walk_root, max_file_size))
        .await
        .context("Parser task failed")??;

    let response = ParseResponse {
        root,
        files_parsed: graph.files_parsed,
        files_failed: graph.files_failed,
        node_count: graph.nodes.len(),
        edge_count: graph.edges.len(),
        node_types: graph.node_histogram(),
        nodes: args.graph.then(|| graph.nodes.clone()),
        edges: args.graph.then(|| graph.edges.clone()),
    };

    if output.json {
        return print_json(&response);
    }
    println!(
        "Parsed {} files ({} failed): {} nodes, {} edges",
        response.files_parsed, response.files_failed, response.node_count, response.edge_count
    );
    for (node_type, count) in &response.node_types {
        println!("  {node_type:<10} {count}");
    }
    Ok(())
}

fn parse_walked(root: &Path, max_file_size: u64) -> Result<RepositoryGraph> {
    let mut parsed = Vec::new();
    let mut failed = 0;
    for file in RepoWalker::new(root).with_max_file_size(max_file_size).walk() {
        let bytes = std::fs::read(&file.path)
            .with_context(|| format!("Failed to read {}", file.path.display()))?;
        match insight_parser::try_parse(&bytes, file.language, &file.relative) {
            Ok(result) => parsed.push(result),
            Err(err) => {
                log::warn!("Failed to parse {}: {err}", file.relative);
                failed += 1;
            }
        }
    }
    Ok(RepositoryGraph::from_parsed(parsed, failed))
}

#[derive(Serialize)]
struct ChunkResponse {
    file: String,
    chunk_size: usize,
    chunk_overlap: usize,
    chunks: Vec<CodeChunk>,
}

pub(crate) async fn chunk(args: ChunkArgs, output: &Output) -> Result<()> {
    let mut config = load_config(output)?;
    if let Some(size) = args.size {
        config.vector.chunk_size = size;
    }
    if let Some(overlap) = args.overlap {
        config.vector.chunk_overlap = overlap;
    }
    let chunker = config.vector.chunker()?;

    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file = args.file.to_string_lossy().replace('\\', "/");
    let chunks = chunker.chunk(&file, &content);

    if output.json {
        return print_json(&ChunkResponse {
            file,
            chunk_size: chunker.size(),
            chunk_overlap: chunker.overlap(),
            chunks,
        });
    }
    println!(
        "{file}: {} chunks (size {}, overlap {})",
        chunks.len(),
        chunker.size(),
        chunker.overlap()
    );
    for chunk in &chunks {
        println!(
            "  #{:<4} tokens {}..{} ({})",
            chunk.chunk_index, chunk.start_token, chunk.end_token, chunk.token_count
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct FilterResponse {
    total_files: usize,
    selected: Vec<String>,
    selection_ratio: f64,
    max_selection_ratio: f64,
    within_threshold: bool,
}

pub(crate) async fn filter(args: FilterArgs, output: &Output) -> Result<()> {
    let config = load_config(output)?;
    let raw = tokio::fs::read_to_string(&args.envelopes)
        .await
        .with_context(|| format!("Failed to read {}", args.envelopes.display()))?;
    let envelopes: Vec<EventEnvelope> =
        serde_json::from_str(&raw).context("Expected a JSON array of envelopes")?;

    let filter = L2Filter::new(config.filter);
    let total_files = envelopes
        .iter()
        .filter_map(|e| e.file_path.as_deref())
        .collect::<BTreeSet<_>>()
        .len();
    let selected: Vec<String> = filter
        .select_significant_files(&envelopes)
        .into_iter()
        .collect();
    let within_threshold = filter.validate(total_files, selected.len());
    if !within_threshold {
        log::warn!(
            "{} of {total_files} files selected, above the {:.0}% threshold",
            selected.len(),
            filter.config().max_selection_ratio * 100.0
        );
    }

    let response = FilterResponse {
        total_files,
        selection_ratio: selection_ratio(total_files, selected.len()),
        max_selection_ratio: filter.config().max_selection_ratio,
        selected,
        within_threshold,
    };
    if output.json {
        return print_json(&response);
    }
    println!(
        "Selected {} of {} files ({:.0}%)",
        response.selected.len(),
        response.total_files,
        response.selection_ratio * 100.0
    );
    for path in &response.selected {
        println!("  {path}");
    }
    Ok(())
}

pub(crate) async fn summaries(args: SummariesArgs, output: &Output) -> Result<()> {
    let summaries = L2Reducer::new(&args.root).load_all().await?;
    if output.json {
        return print_json(&summaries);
    }
    if summaries.is_empty() {
        println!("No summaries under {}", args.root.display());
        return Ok(());
    }
    for summary in &summaries {
        let tools: Vec<&str> = summary.tools_summary.keys().map(String::as_str).collect();
        let agents: Vec<&str> = summary.agents_summary.keys().map(String::as_str).collect();
        println!(
            "{}: {} files, {}ms, tools [{}], agents [{}]",
            summary.group_id,
            summary.file_count,
            summary.execution_time_ms,
            tools.join(", "),
            agents.join(", ")
        );
    }
    Ok(())
}

fn open_snapshots(repo: &SnapshotRepoArgs, output: &Output) -> Result<SnapshotManager> {
    let root = repo.repo.canonicalize().context("Invalid project path")?;
    let config = load_config(output)?;
    let db_path = config.data_dir(&root).join(METADATA_DB_FILE);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteMetadataStore::open(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    Ok(SnapshotManager::new(Arc::new(store)))
}

#[derive(Serialize)]
struct InvalidateResponse {
    commit_hash: String,
    invalidated: usize,
}

pub(crate) async fn snapshots(command: SnapshotCommands, output: &Output) -> Result<()> {
    match command {
        SnapshotCommands::List(repo) => {
            let snapshots = open_snapshots(&repo, output)?.list().await?;
            if output.json {
                return print_json(&snapshots);
            }
            if snapshots.is_empty() {
                println!("No snapshots");
            }
            for snapshot in &snapshots {
                println!(
                    "{} {} {} nodes={} edges={} valid={} created={}",
                    snapshot.id,
                    snapshot.commit_hash,
                    snapshot.branch,
                    snapshot.node_count,
                    snapshot.edge_count,
                    snapshot.is_valid,
                    snapshot.created_at.to_rfc3339()
                );
            }
            Ok(())
        }
        SnapshotCommands::Invalidate(args) => {
            let invalidated = open_snapshots(&args.repo, output)?
                .invalidate(&args.commit)
                .await?;
            let response = InvalidateResponse {
                commit_hash: args.commit,
                invalidated,
            };
            if output.json {
                return print_json(&response);
            }
            println!(
                "Invalidated {} snapshot(s) for {}",
                response.invalidated, response.commit_hash
            );
            Ok(())
        }
    }
}
