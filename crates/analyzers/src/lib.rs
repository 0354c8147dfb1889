//! # Insight Analyzers
//!
//! Per-file analysis in two tiers plus the L2 layer between them.
//!
//! ```text
//! files ──> Tools (every applicable file, cheap)
//!             │   PYLINT_TOOL, SECRET_SCAN_TOOL, COMPLEXITY_TOOL, DORA_CALCULATOR
//!             ▼
//!           L2Filter ── selection ratio guard
//!             ▼
//!           Agents (selected files, LLM-backed)
//!             │   PROFICIENCY_AGENT
//!             ▼
//!           L2Reducer ──> results/l2_summary_{group}.json
//! ```
//!
//! [`ContributionAnalyzer`] works on the whole repository instead: commits,
//! line churn and blame ownership of one author.
//!
//! Every invocation goes through [`execute`], which always yields an
//! [`EventEnvelope`]: failures, panics, timeouts and cancellation all become
//! failure envelopes instead of errors.
//!
//! ## Example
//!
//! ```no_run
//! use insight_analyzers::{run_tools, AnalysisTarget, L2Filter, SecretScanTool, Tool};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let tools: Vec<Arc<Tool>> = vec![Arc::new(SecretScanTool::new())];
//! let target = AnalysisTarget::new("/repo", "settings.py");
//! let envelopes = run_tools(&tools, &target, Duration::from_secs(30), &CancellationToken::new()).await;
//! let selected = L2Filter::default().select_significant_files(&envelopes);
//! # let _ = selected;
//! # }
//! ```

mod agents;
mod analyzer;
mod contribution;
mod envelope;
mod error;
mod filter;
mod llm;
mod reducer;
mod tools;

pub use agents::{
    default_agents, infer_layer, parse_assessment, Assessment, ProficiencyAgent,
    ProficiencyLevel, PROFICIENCY_AGENT,
};
pub use analyzer::{
    execute, run_tools, Agent, AgentContext, AnalysisTarget, Analyzer, Tool,
    DEFAULT_AGENT_TIMEOUT, DEFAULT_TOOL_TIMEOUT,
};
pub use contribution::{ContributionAnalyzer, ContributionStats, CONTRIBUTION_ANALYZER};
pub use envelope::{EventEnvelope, Payload, ToolType};
pub use error::{AnalyzerError, Result};
pub use filter::{
    selection_ratio, validate_threshold, FilterConfig, L2Filter, SEMGREP_TOOL, SONARQUBE_TOOL,
};
pub use llm::{
    LlmProvider, LlmResponse, OpenAiChatProvider, ScriptedLlmProvider, DEFAULT_LLM_MODEL,
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
pub use reducer::{L2Reducer, L2Summary, SummaryEntry};
pub use tools::{
    default_tools, function_complexity, parse_pylint_messages, parse_pylint_score, scan_secrets, ComplexityTool,
    DoraCalculator, FunctionComplexity, PylintTool, SecretFinding, SecretScanTool,
    COMPLEXITY_TOOL, DEFAULT_CHURN_WINDOW, DORA_CALCULATOR, PYLINT_TOOL, SECRET_SCAN_TOOL,
};
