//! Built-in tools: cheap, deterministic, run on every applicable file.

mod complexity;
mod dora;
mod pylint;
mod secret_scan;

pub use complexity::{function_complexity, ComplexityTool, FunctionComplexity, COMPLEXITY_TOOL};
pub use dora::{DoraCalculator, DEFAULT_CHURN_WINDOW, DORA_CALCULATOR};
pub use pylint::{parse_pylint_messages, parse_pylint_score, PylintTool, PYLINT_TOOL};
pub use secret_scan::{scan_secrets, SecretFinding, SecretScanTool, SECRET_SCAN_TOOL};


use crate::analyzer::Tool;
use std::path::Path;
use std::sync::Arc;

/// Default tool set for a repository
pub async fn default_tools(repo_root: &Path, churn_window: usize) -> Vec<Arc<Tool>> {
    vec![
        Arc::new(PylintTool::detect().await),
        Arc::new(SecretScanTool::new()),
        Arc::new(ComplexityTool::new()),
        Arc::new(DoraCalculator::new(repo_root, churn_window)),
    ]
}
