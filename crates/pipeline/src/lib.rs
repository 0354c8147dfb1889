//! # Insight Pipeline
//!
//! Runs a whole analysis of one repository checkout and reports on it.
//!
//! ## Stages
//!
//! ```text
//! PipelineConfig::validate ── fail fast (Config)
//!     │
//!     ├──> resolve_commit (git HEAD or content fingerprint)
//!     │
//!     ├──> graph:   reuse snapshot │ parse ─> stage ─> bulk load ─> snapshot
//!     ├──> vectors: reuse record   │ chunk ─> embed ─> index     ─> record
//!     ├──> contributions of `author`, when one is set
//!     │
//!     └──> groups of N files, concurrently
//!            tools ─> L2Filter ─> agents ─> L2Reducer ─> runs/{id}/results/
//!
//! RunReport { status: Completed | Failed | Cancelled, stage reports, stats }
//! ```
//!
//! Only configuration errors and unavailable stores fail a run. Everything
//! else is counted in [`RunStats`] and the run goes on.
//!
//! ## Example
//!
//! ```no_run
//! use insight_pipeline::{Pipeline, PipelineConfig, RunRequest};
//! use std::path::Path;
//!
//! # async fn demo() -> insight_pipeline::Result<()> {
//! let root = Path::new(".");
//! let pipeline = Pipeline::from_config(PipelineConfig::load(None)?, root)?;
//! let report = pipeline.run(RunRequest::new(root)).await;
//! println!("{:?}: {} groups saved", report.status, report.stats.groups_saved);
//! # Ok(())
//! # }
//! ```

mod checkout;
mod commit;
mod config;
mod error;
mod groups;
mod limits;
mod pipeline;
mod report;
mod services;

pub use checkout::{checkout_name, clone_repository};
pub use commit::{fingerprint, resolve_commit, CommitIdentity, CommitSource};
pub use config::{
    AnalysisConfig, CacheBackend, EmbeddingBackend, EmbeddingConfig, GraphConfig, LimitsConfig,
    LlmBackend, LlmConfig, ParserConfig, PipelineConfig, VectorConfig, DEFAULT_DATA_DIR,
    MAX_STAGE_CONCURRENCY,
};
pub use error::{ErrorClass, PipelineError, Result};
pub use limits::{StageLimits, StageLimitsSnapshot};
pub use pipeline::{
    run_results_root, Pipeline, RunRequest, GRAPH_BUILDER, RUNS_DIR, STAGING_DIR, VECTOR_BUILDER,
};
pub use report::{
    FatalError, GraphStageReport, GroupReport, RunReport, RunStats, RunStatus, VectorStageReport,
};
pub use services::{PipelineServices, CACHE_DIR, METADATA_DB_FILE};
