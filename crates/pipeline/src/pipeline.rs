use crate::commit::{resolve_commit, CommitIdentity};
use crate::config::PipelineConfig;
use crate::error::{ErrorClass, PipelineError, Result};
use crate::groups::GroupRunner;
use crate::limits::{acquire, StageLimits};
use crate::report::{FatalError, RunReport, RunStats, RunStatus};
use crate::services::PipelineServices;
use chrono::Utc;
use insight_analyzers::{
    default_tools, AgentContext, AnalyzerError, ContributionAnalyzer, EventEnvelope, L2Filter,
    L2Reducer, Payload, ToolType, CONTRIBUTION_ANALYZER,
};
use insight_graph::{
    BulkLoader, GraphStager, RetryPolicy, SnapshotDraft, SnapshotManager, EDGES_FILE, NODES_FILE,
};
use insight_metadata::{GraphSnapshot, VectorIndexRecord};
use insight_parser::{try_parse, GraphNode, ParsedFile, RepoWalker, RepositoryGraph, SourceFile};
use insight_vector_store::{
    CachedEmbedder, ChunkInput, Chunker, SemanticIndex, VectorStoreError,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const STAGING_DIR: &str = "staging";
pub const RUNS_DIR: &str = "runs";
pub const GRAPH_BUILDER: &str = "GRAPH_BUILDER";
pub const VECTOR_BUILDER: &str = "VECTOR_BUILDER";

const BUILDER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One analysis of one repository checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub root: PathBuf,
    /// Generated when unset
    pub analysis_id: Option<String>,
    /// Ignore snapshot and index records already stored for the commit
    pub force_rebuild: bool,
    /// Author whose contributions are measured; `analysis.author` when unset
    pub author: Option<String>,
}

impl RunRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            analysis_id: None,
            force_rebuild: false,
            author: None,
        }
    }

    pub fn with_analysis_id(mut self, analysis_id: impl Into<String>) -> Self {
        self.analysis_id = Some(analysis_id.into());
        self
    }

    pub fn with_force_rebuild(mut self, force_rebuild: bool) -> Self {
        self.force_rebuild = force_rebuild;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Where the summaries of `analysis_id` are written under `data_dir`
pub fn run_results_root(data_dir: &Path, analysis_id: &str) -> PathBuf {
    let name: String = analysis_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let name = match name.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => name,
    };
    data_dir.join(RUNS_DIR).join(name)
}

struct RunContext {
    root: PathBuf,
    data_dir: PathBuf,
    analysis_id: String,
    commit: CommitIdentity,
    files: Vec<SourceFile>,
    force_rebuild: bool,
    author: Option<String>,
}

/// Stage-local failures are recorded and the run goes on; configuration
/// errors, unavailable stores and cancellation end it.
fn contain(stats: &mut RunStats, slot: &mut Option<String>, err: PipelineError) -> Result<()> {
    if err.is_fatal() || matches!(err, PipelineError::Cancelled) {
        return Err(err);
    }
    log::warn!("Continuing after {} error: {err}", err.class().as_str());
    stats.add_error(err.class(), err.to_string());
    *slot = Some(err.to_string());
    Ok(())
}

fn as_payload<T: Serialize>(value: &T) -> Payload {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}

fn builder_envelope<T: Serialize>(
    name: &str,
    stage: &T,
    outcome: &Result<()>,
    elapsed: Duration,
) -> EventEnvelope {
    let elapsed_ms = elapsed.as_millis() as u64;
    match outcome {
        Ok(()) => EventEnvelope::success(
            name,
            ToolType::Builder,
            None,
            elapsed_ms,
            BUILDER_VERSION,
            as_payload(stage),
        ),
        Err(err) => EventEnvelope::failure(
            name,
            ToolType::Builder,
            None,
            elapsed_ms,
            BUILDER_VERSION,
            err.class().as_str(),
            &err.to_string(),
        ),
    }
}

fn exhausted(err: VectorStoreError) -> VectorStoreError {
    if err.is_retryable() {
        VectorStoreError::StoreUnavailable(err.to_string())
    } else {
        err
    }
}

/// Parse → graph → vectors → tools → filter → agents → reduce, for one
/// repository per [`run`](Pipeline::run).
///
/// A single cancellation token reaches every worker. Summaries already saved
/// when a run is cancelled stay on disk.
pub struct Pipeline {
    config: PipelineConfig,
    services: PipelineServices,
    limits: StageLimits,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Self {
        let limits = StageLimits::from_config(&config.limits);
        Self {
            config,
            services,
            limits,
            cancel: CancellationToken::new(),
        }
    }

    /// Validated `config` with the services it selects, persisted under the
    /// data dir of `repo_root`
    pub fn from_config(config: PipelineConfig, repo_root: &Path) -> Result<Self> {
        config.validate().map_err(PipelineError::Config)?;
        let services = PipelineServices::from_config(&config, &config.data_dir(repo_root))?;
        Ok(Self::new(config, services))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    pub fn limits(&self) -> &StageLimits {
        &self.limits
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the current run. A cancelled pipeline stays cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs every stage and reports; never returns an error.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let started = Instant::now();
        let analysis_id = request
            .analysis_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut report = RunReport::new(&analysis_id, self.limits.snapshot());
        log::info!(
            "Starting analysis {analysis_id} of {}",
            request.root.display()
        );

        match self.run_stages(request, analysis_id, &mut report).await {
            Ok(()) if self.cancel.is_cancelled() => self.mark_cancelled(&mut report),
            Ok(()) => report.status = RunStatus::Completed,
            Err(PipelineError::Cancelled) => self.mark_cancelled(&mut report),
            Err(err) => {
                log::error!("Analysis {} failed: {err}", report.analysis_id);
                report.stats.add_error(err.class(), err.to_string());
                report.fatal_error = Some(FatalError::from(&err));
                report.status = RunStatus::Failed;
            }
        }

        report.stats.duration_ms = started.elapsed().as_millis() as u64;
        report.finished_at = Utc::now().to_rfc3339();
        log::info!(
            "Analysis {} finished as {:?} in {}ms ({} groups saved)",
            report.analysis_id,
            report.status,
            report.stats.duration_ms,
            report.stats.groups_saved
        );
        report
    }

    fn mark_cancelled(&self, report: &mut RunReport) {
        log::warn!("Analysis {} cancelled", report.analysis_id);
        report.stats.add_error(ErrorClass::Cancelled, "run cancelled");
        report.status = RunStatus::Cancelled;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.graph.retry_attempts,
            base_delay: Duration::from_millis(self.config.graph.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    fn record_ttl(&self) -> Option<chrono::Duration> {
        self.config
            .graph
            .snapshot_ttl_hours
            .and_then(chrono::Duration::try_hours)
    }

    async fn check_stores(&self, stats: &mut RunStats) -> Result<()> {
        self.services
            .graph
            .health_check()
            .await
            .map_err(|err| PipelineError::StoreUnavailable(format!("graph store: {err}")))?;
        self.services
            .vectors
            .health_check()
            .await
            .map_err(|err| PipelineError::StoreUnavailable(format!("vector store: {err}")))?;
        if let Err(err) = self.services.metadata.health_check().await {
            log::warn!("Metadata store unhealthy, every lookup will miss: {err}");
            stats.add_error(ErrorClass::Cache, format!("metadata store: {err}"));
        }
        Ok(())
    }

    async fn run_stages(
        &self,
        request: RunRequest,
        analysis_id: String,
        report: &mut RunReport,
    ) -> Result<()> {
        self.config.validate().map_err(PipelineError::Config)?;
        let is_dir = tokio::fs::metadata(&request.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(PipelineError::InvalidPath(format!(
                "{} is not a directory",
                request.root.display()
            )));
        }
        let metric = self.config.vector.metric()?;
        let chunker = self.config.vector.chunker()?;
        self.check_stores(&mut report.stats).await?;

        let data_dir = self.config.data_dir(&request.root);
        let commit = resolve_commit(&request.root, Some(&data_dir))
            .await
            .map_err(|err| {
                PipelineError::InvalidPath(format!("{}: {err}", request.root.display()))
            })?;
        log::info!("Commit {} ({:?})", commit.hash, commit.source);
        report.commit_hash = commit.hash.clone();
        report.commit_source = Some(commit.source);

        let walker = RepoWalker::new(&request.root)
            .with_max_file_size(self.config.parser.max_file_size_bytes);
        let files = tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|err| PipelineError::IoError(std::io::Error::other(err)))?;
        report.stats.files_discovered = files.len();
        log::info!("Discovered {} source files", files.len());

        let author = request
            .author
            .or_else(|| self.config.analysis.author.clone())
            .map(|author| author.trim().to_string())
            .filter(|author| !author.is_empty());
        let run = RunContext {
            data_dir,
            root: request.root,
            analysis_id,
            commit,
            files,
            force_rebuild: request.force_rebuild,
            author,
        };

        self.ensure_active()?;
        let started = Instant::now();
        let outcome = self.build_graph(&run, report).await;
        report.graph.duration_ms = started.elapsed().as_millis() as u64;
        report.builders.push(builder_envelope(
            GRAPH_BUILDER,
            &report.graph,
            &outcome,
            started.elapsed(),
        ));
        if let Err(err) = outcome {
            contain(&mut report.stats, &mut report.graph.error, err)?;
        }

        self.ensure_active()?;
        let embedder = Arc::new(CachedEmbedder::with_limit(
            Arc::clone(&self.services.embeddings),
            Arc::clone(&self.services.blob_cache),
            Arc::clone(&self.limits.embed),
        ));
        let semantic = Arc::new(
            SemanticIndex::new(Arc::clone(&embedder), Arc::clone(&self.services.vectors))
                .with_index_name(self.config.vector.index_name.clone())
                .with_metric(metric),
        );
        let started = Instant::now();
        let outcome = self.build_vectors(&run, &semantic, &chunker, report).await;
        report.vector.duration_ms = started.elapsed().as_millis() as u64;
        report.vector.cache = embedder.stats();
        report.builders.push(builder_envelope(
            VECTOR_BUILDER,
            &report.vector,
            &outcome,
            started.elapsed(),
        ));
        if let Err(err) = outcome {
            contain(&mut report.stats, &mut report.vector.error, err)?;
        }

        if let Some(author) = &run.author {
            self.ensure_active()?;
            self.measure_contributions(&run.root, author, report).await?;
        }

        self.ensure_active()?;
        let scope = report
            .vector
            .analysis_id
            .clone()
            .unwrap_or_else(|| run.analysis_id.clone());
        report.groups = self.analyze_groups(&run, semantic, scope).await;
        for group in &report.groups {
            report.stats.add_group(group);
            if let (Some(err), false) = (&group.error, self.cancel.is_cancelled()) {
                report
                    .stats
                    .add_error(ErrorClass::StoreWrite, format!("{}: {err}", group.group_id));
            }
        }
        report.vector.cache = embedder.stats();
        Ok(())
    }

    async fn measure_contributions(
        &self,
        root: &Path,
        author: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        let started = Instant::now();
        let outcome = ContributionAnalyzer::new(root, author)
            .analyze(&self.cancel)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(stats) => {
                report.builders.push(EventEnvelope::success(
                    CONTRIBUTION_ANALYZER,
                    ToolType::Builder,
                    None,
                    elapsed_ms,
                    BUILDER_VERSION,
                    as_payload(&stats),
                ));
                report.contribution = Some(stats);
                Ok(())
            }
            Err(AnalyzerError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                let err = PipelineError::from(err);
                report.builders.push(EventEnvelope::failure(
                    CONTRIBUTION_ANALYZER,
                    ToolType::Builder,
                    None,
                    elapsed_ms,
                    BUILDER_VERSION,
                    err.class().as_str(),
                    &err.to_string(),
                ));
                log::warn!("Contribution analysis of {author} failed: {err}");
                report.stats.add_error(err.class(), err.to_string());
                Ok(())
            }
        }
    }

    async fn build_graph(&self, run: &RunContext, report: &mut RunReport) -> Result<()> {
        let snapshots = SnapshotManager::new(Arc::clone(&self.services.metadata))
            .with_ttl(self.record_ttl());
        let stager = GraphStager::new(run.data_dir.join(STAGING_DIR));
        let loader = BulkLoader::new(Arc::clone(&self.services.graph))
            .with_batch_size(self.config.graph.batch_size)
            .with_retry(self.retry_policy());

        if run.force_rebuild {
            if let Err(err) = snapshots.invalidate(&run.commit.hash).await {
                log::warn!("Could not invalidate snapshots of {}: {err}", run.commit.hash);
                report.stats.add_error(ErrorClass::Cache, err.to_string());
            }
        } else if let Some(snapshot) = snapshots.reuse_snapshot(&run.commit.hash).await {
            if self.hydrate(&snapshot, &stager, &loader, report).await? {
                let graph = &mut report.graph;
                graph.reused = true;
                graph.snapshot_id = Some(snapshot.id.to_string());
                graph.node_count = snapshot.node_count;
                graph.edge_count = snapshot.edge_count;
                graph.node_types = snapshot.node_types;
                return Ok(());
            }
        }

        let started = Instant::now();
        let (parsed, failed) = self.parse_files(run, &mut report.stats).await?;
        let repo_graph = RepositoryGraph::from_parsed(parsed, failed);
        report.stats.files_parsed = repo_graph.files_parsed;
        report.stats.parse_failures = repo_graph.files_failed;

        let graph = &mut report.graph;
        graph.files_parsed = repo_graph.files_parsed;
        graph.files_failed = repo_graph.files_failed;
        graph.node_count = repo_graph.nodes.len();
        graph.edge_count = repo_graph.edges.len();
        graph.node_types = repo_graph.node_histogram();
        log::info!(
            "Parsed {} files ({} failed): {} nodes, {} edges",
            graph.files_parsed,
            graph.files_failed,
            graph.node_count,
            graph.edge_count
        );

        self.ensure_active()?;
        let staged = stager
            .stage(&repo_graph.nodes, &repo_graph.edges, &run.analysis_id)
            .await?;
        self.ensure_active()?;
        graph.load = Some(
            loader
                .bulk_load(&staged.nodes_path, &staged.edges_path)
                .await?,
        );

        let created = snapshots
            .create_snapshot(SnapshotDraft {
                analysis_id: run.analysis_id.clone(),
                commit_hash: run.commit.hash.clone(),
                repo_url: self.config.graph.repo_url.clone(),
                branch: self.config.graph.branch.clone(),
                node_count: graph.node_count,
                edge_count: graph.edge_count,
                node_types: graph.node_types.clone(),
                build_duration_seconds: started.elapsed().as_secs_f64(),
            })
            .await?;
        graph.snapshot_id = Some(created.snapshot().id.to_string());
        Ok(())
    }

    /// Makes a reused snapshot queryable. An empty store is reloaded from the
    /// snapshot's staged files; `false` means those are gone and the graph
    /// has to be rebuilt.
    async fn hydrate(
        &self,
        snapshot: &GraphSnapshot,
        stager: &GraphStager,
        loader: &BulkLoader,
        report: &mut RunReport,
    ) -> Result<bool> {
        if self.services.graph.node_count().await? > 0 {
            return Ok(true);
        }
        let dir = stager.staged_dir(&snapshot.analysis_id);
        let (nodes_path, edges_path) = (dir.join(NODES_FILE), dir.join(EDGES_FILE));
        let staged = tokio::fs::try_exists(&nodes_path).await.unwrap_or(false)
            && tokio::fs::try_exists(&edges_path).await.unwrap_or(false);
        if !staged {
            log::warn!(
                "Snapshot {} has no staged graph under {}, rebuilding",
                snapshot.id,
                dir.display()
            );
            return Ok(false);
        }
        log::info!("Reloading graph store from snapshot {}", snapshot.id);
        report.graph.load = Some(loader.bulk_load(&nodes_path, &edges_path).await?);
        Ok(true)
    }

    async fn parse_files(
        &self,
        run: &RunContext,
        stats: &mut RunStats,
    ) -> Result<(Vec<ParsedFile>, usize)> {
        let mut tasks = JoinSet::new();
        for file in run.files.iter().cloned() {
            let semaphore = Arc::clone(&self.limits.parse);
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    permit = acquire(&semaphore) => permit,
                };
                let relative = file.relative.clone();
                let parsed = tokio::task::spawn_blocking(move || {
                    let bytes = std::fs::read(&file.path).map_err(|err| err.to_string())?;
                    try_parse(&bytes, file.language, &file.relative).map_err(|err| err.to_string())
                })
                .await
                .unwrap_or_else(|err| Err(format!("parser task failed: {err}")));
                Ok::<_, PipelineError>((relative, parsed))
            });
        }

        let mut parsed = Vec::with_capacity(run.files.len());
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (relative, outcome) = match joined {
                Ok(result) => result?,
                Err(err) => (String::from("<unknown>"), Err(err.to_string())),
            };
            match outcome {
                Ok(file) => parsed.push(file),
                Err(err) => {
                    log::warn!("Failed to parse {relative}: {err}");
                    stats.add_error(ErrorClass::Parse, format!("{relative}: {err}"));
                    failed += 1;
                }
            }
        }
        Ok((parsed, failed))
    }

    async fn build_vectors(
        &self,
        run: &RunContext,
        semantic: &SemanticIndex,
        chunker: &Chunker,
        report: &mut RunReport,
    ) -> Result<()> {
        let metadata = &self.services.metadata;
        let index_name = semantic.index_name().to_string();
        let embedder = semantic.embedder();
        report.vector.index_name = index_name.clone();
        report.vector.embedding_model = embedder.model_id().to_string();
        report.vector.dimension = Some(embedder.dimension());

        if run.force_rebuild {
            if let Err(err) = metadata
                .invalidate_vector_index(&run.commit.hash, &index_name)
                .await
            {
                log::warn!("Could not invalidate index records of {}: {err}", run.commit.hash);
                report.stats.add_error(ErrorClass::Cache, err.to_string());
            }
        } else {
            match metadata
                .find_valid_vector_index(&run.commit.hash, &index_name)
                .await
            {
                Ok(Some(record)) => {
                    let live = semantic
                        .store()
                        .index_info(&index_name)
                        .await?
                        .is_some_and(|info| info.len > 0);
                    if live {
                        log::info!(
                            "Reusing vector index {index_name} ({} chunks) for commit {}",
                            record.chunk_count,
                            run.commit.hash
                        );
                        let vector = &mut report.vector;
                        vector.reused = true;
                        vector.analysis_id = Some(record.analysis_id);
                        vector.chunks = record.chunk_count;
                        vector.indexed = record.chunk_count;
                        vector.dimension = Some(record.embedding_dimension);
                        return Ok(());
                    }
                    log::info!("Vector index record {} has no live index, rebuilding", record.id);
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("Vector index lookup failed, rebuilding: {err}");
                    report.stats.add_error(ErrorClass::Cache, err.to_string());
                }
            }
        }

        // A rebuild may produce fewer chunks than the entries left behind
        let stale = semantic
            .store()
            .delete_by_metadata(&index_name, "commit_hash", &Value::String(run.commit.hash.clone()))
            .await?;
        if stale > 0 {
            log::info!("Dropped {stale} stale vector entries for commit {}", run.commit.hash);
        }

        let started = Instant::now();
        let mut inputs = Vec::new();
        for file in &run.files {
            self.ensure_active()?;
            let content = match tokio::fs::read_to_string(&file.path).await {
                Ok(content) => content,
                Err(err) => {
                    log::debug!("Not chunking {}: {err}", file.relative);
                    continue;
                }
            };
            let file_id = GraphNode::file_id(&file.relative);
            inputs.extend(chunker.chunk(&file_id, &content).into_iter().map(|chunk| {
                ChunkInput {
                    commit_hash: run.commit.hash.clone(),
                    analysis_id: run.analysis_id.clone(),
                    file_path: file.relative.clone(),
                    chunk,
                }
            }));
        }
        report.vector.chunks = inputs.len();
        report.stats.chunks = inputs.len();

        let retry = self.retry_policy();
        for batch in inputs.chunks(self.config.vector.upsert_batch_size.max(1)) {
            self.ensure_active()?;
            let outcome = retry
                .run("index chunk batch", VectorStoreError::is_retryable, || {
                    semantic.index_batch(batch)
                })
                .await
                .map_err(exhausted)?;
            report.vector.indexed += outcome.indexed;
            report.vector.degraded += outcome.degraded;
        }
        report.vector.analysis_id = Some(run.analysis_id.clone());
        report.stats.embeddings_degraded = report.vector.degraded;
        log::info!(
            "Indexed {} of {} chunks into {index_name} ({} degraded)",
            report.vector.indexed,
            report.vector.chunks,
            report.vector.degraded
        );

        if report.vector.degraded > 0 {
            log::warn!(
                "{} chunks have no embedding; the index is not recorded for reuse",
                report.vector.degraded
            );
            return Ok(());
        }
        let mut record = VectorIndexRecord::new(
            run.analysis_id.clone(),
            index_name,
            run.commit.hash.clone(),
            embedder.model_id(),
        )
        .with_ttl(self.record_ttl());
        record.chunk_count = report.vector.indexed;
        record.embedding_dimension = embedder.dimension();
        record.indexing_duration_seconds = started.elapsed().as_secs_f64();
        match metadata.insert_vector_index(&record).await {
            Ok(()) => log::info!("Recorded vector index {}", record.id),
            Err(err) if err.is_conflict() => {
                log::info!("Commit {} already has a vector index record", run.commit.hash)
            }
            Err(err) => {
                log::warn!("Could not record vector index: {err}");
                report.stats.add_error(ErrorClass::Cache, err.to_string());
            }
        }
        Ok(())
    }

    async fn analyze_groups(
        &self,
        run: &RunContext,
        semantic: Arc<SemanticIndex>,
        scope: String,
    ) -> Vec<crate::report::GroupReport> {
        let tools = match &self.services.tools {
            Some(tools) => tools.clone(),
            None => default_tools(&run.root, self.config.analysis.churn_window).await,
        };
        let analysis = &self.config.analysis;
        let agent_context = (analysis.run_agents && !self.services.agents.is_empty()).then(|| {
            AgentContext {
                analysis_id: scope,
                graph: Arc::clone(&self.services.graph),
                semantic,
                llm: Arc::clone(&self.services.llm),
                tool_results: BTreeMap::new(),
            }
        });

        let runner = Arc::new(GroupRunner {
            root: run.root.clone(),
            tools: Arc::new(tools),
            agents: self.services.agents.clone(),
            agent_context,
            filter: L2Filter::new(self.config.filter.clone()),
            reducer: L2Reducer::new(run_results_root(&run.data_dir, &run.analysis_id)),
            limits: self.limits.clone(),
            cancel: self.cancel.clone(),
            tool_timeout: Duration::from_secs(analysis.tool_timeout_secs),
            agent_timeout: Duration::from_secs(analysis.agent_timeout_secs),
        });
        let files = run.files.iter().map(|f| f.relative.clone()).collect();
        runner.run_all(files, analysis.group_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn results_root_is_one_directory_per_run() {
        let root = run_results_root(Path::new("/data"), "run 1/../x");
        assert_eq!(root, PathBuf::from("/data/runs/run_1_.._x"));
        assert_eq!(
            run_results_root(Path::new("/data"), ".."),
            PathBuf::from("/data/runs/_")
        );
    }

    #[test]
    fn only_fatal_errors_escape_containment() {
        let mut stats = RunStats::new();
        let mut slot = None;
        contain(
            &mut stats,
            &mut slot,
            PipelineError::Metadata(insight_metadata::MetadataError::Unavailable("db".into())),
        )
        .unwrap();
        assert!(slot.is_some());
        assert_eq!(stats.error_counts.get(&ErrorClass::Cache), Some(&1));

        let err = contain(&mut stats, &mut slot, PipelineError::Config("bad".into())).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Config);
        assert!(contain(&mut stats, &mut slot, PipelineError::Cancelled).is_err());
    }
}
