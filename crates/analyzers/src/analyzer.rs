use crate::envelope::{EventEnvelope, Payload, ToolType};
use crate::error::{AnalyzerError, Result};
use crate::llm::LlmProvider;
use async_trait::async_trait;
use insight_graph::GraphStore;
use insight_vector_store::SemanticIndex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);

/// File handed to an analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTarget {
    pub root: PathBuf,
    /// Repository-relative, `/`-separated
    pub file_path: String,
}

impl AnalysisTarget {
    pub fn new(root: impl Into<PathBuf>, file_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_path: file_path.into(),
        }
    }

    pub fn absolute(&self) -> PathBuf {
        self.root.join(&self.file_path)
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.file_path).extension().and_then(|e| e.to_str())
    }
}

/// Read-only collaborators for one agent invocation
#[derive(Clone)]
pub struct AgentContext {
    /// Scopes vector queries to the current build
    pub analysis_id: String,
    pub graph: Arc<dyn GraphStore>,
    pub semantic: Arc<SemanticIndex>,
    pub llm: Arc<dyn LlmProvider>,
    /// Successful tool envelopes for the same file, keyed by tool name
    pub tool_results: BTreeMap<String, EventEnvelope>,
}

/// Common contract of tools and agents.
///
/// Tools use `Context = ()`; agents use [`AgentContext`]. Implementations
/// return a payload or an error and never build envelopes themselves.
#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    type Context: Send + Sync + 'static;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn kind(&self) -> ToolType;

    fn is_applicable(&self, _file_path: &str) -> bool {
        true
    }

    /// Model reported in agent envelopes
    fn llm_model(&self, _ctx: &Self::Context) -> Option<String> {
        None
    }

    async fn analyze(&self, target: &AnalysisTarget, ctx: &Self::Context) -> Result<Payload>;
}

pub type Tool = dyn Analyzer<Context = ()>;
pub type Agent = dyn Analyzer<Context = AgentContext>;

/// Runs one analyzer and wraps the outcome in an [`EventEnvelope`].
///
/// The analysis runs on its own task, so a panic is contained and reported
/// as `error_type = "Panic"`. Timeouts and cancellation abort the task.
pub async fn execute<A>(
    analyzer: Arc<A>,
    target: AnalysisTarget,
    ctx: Arc<A::Context>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> EventEnvelope
where
    A: Analyzer + ?Sized,
{
    let started = Instant::now();
    let name = analyzer.name().to_string();
    let version = analyzer.version().to_string();
    let kind = analyzer.kind();
    let llm_model = analyzer.llm_model(&ctx);
    let file_path = Some(target.file_path.clone());

    let task = {
        let analyzer = Arc::clone(&analyzer);
        tokio::spawn(async move { analyzer.analyze(&target, &ctx).await })
    };
    let abort = task.abort_handle();

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(AnalyzerError::Cancelled),
        joined = tokio::time::timeout(timeout, task) => match joined {
            Err(_) => Err(AnalyzerError::Timeout(timeout)),
            Ok(Err(join_error)) => Err(from_join_error(join_error)),
            Ok(Ok(result)) => result,
        },
    };
    if outcome.is_err() {
        abort.abort();
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let envelope = match outcome {
        Ok(payload) => {
            let tokens_used = payload.get("tokens_used").cloned();
            let envelope =
                EventEnvelope::success(&name, kind, file_path, elapsed_ms, &version, payload);
            if kind == ToolType::Agent {
                envelope.with_metadata("tokens_used", tokens_used.unwrap_or_else(|| json!(0)))
            } else {
                envelope
            }
        }
        Err(err) => {
            log::warn!(
                "{name} failed on {}: {err}",
                file_path.as_deref().unwrap_or("<repository>")
            );
            EventEnvelope::failure(
                &name,
                kind,
                file_path,
                elapsed_ms,
                &version,
                err.error_type(),
                &err.to_string(),
            )
        }
    };
    match llm_model {
        Some(model) => envelope.with_metadata("llm_model", Value::from(model)),
        None => envelope,
    }
}

fn from_join_error(err: tokio::task::JoinError) -> AnalyzerError {
    if !err.is_panic() {
        return AnalyzerError::Cancelled;
    }
    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "analyzer panicked".to_string());
    AnalyzerError::Panic(message)
}

/// Every applicable tool on one file, in the given order
pub async fn run_tools(
    tools: &[Arc<Tool>],
    target: &AnalysisTarget,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<EventEnvelope> {
    let ctx = Arc::new(());
    let mut envelopes = Vec::new();
    for tool in tools {
        if !tool.is_applicable(&target.file_path) {
            log::debug!("{} skips {}", tool.name(), target.file_path);
            continue;
        }
        envelopes.push(
            execute(
                Arc::clone(tool),
                target.clone(),
                Arc::clone(&ctx),
                timeout,
                cancel,
            )
            .await,
        );
    }
    envelopes
}
