use crate::analyzer::{AnalysisTarget, Analyzer};
use crate::envelope::{Payload, ToolType};
use crate::error::{AnalyzerError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

pub const PYLINT_TOOL: &str = "PYLINT_TOOL";

const DEFAULT_SCORE: f64 = 10.0;

/// Exit status bit pylint sets for usage errors
const USAGE_ERROR_BIT: i32 = 32;

static SCORE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"rated at (-?[0-9]+(?:\.[0-9]+)?)/10").ok());

/// Runs `pylint` on Python files
pub struct PylintTool {
    program: String,
    version: String,
}

impl PylintTool {
    pub fn new(program: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            version: version.into(),
        }
    }

    /// Uses `pylint` from `PATH`, reading its version once
    pub async fn detect() -> Self {
        let version = match Command::new("pylint").arg("--version").output().await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or("unknown")
                .to_string(),
            Ok(_) | Err(_) => {
                log::debug!("pylint not found on PATH");
                "unknown".to_string()
            }
        };
        Self::new("pylint", version)
    }

    async fn run(&self, args: &[&str], target: &AnalysisTarget) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .arg(target.absolute())
            .current_dir(&target.root)
            .kill_on_drop(true)
            .output()
            .await?;
        // pylint encodes message categories in the exit status; only usage and fatal errors fail
        if let Some(code) = output.status.code() {
            if code & USAGE_ERROR_BIT != 0 || code & 1 != 0 {
                return Err(AnalyzerError::Execution(format!(
                    "pylint exited with status {code}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct PylintMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    line: u64,
    #[serde(default)]
    column: u64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    symbol: String,
    #[serde(rename = "message-id", default)]
    message_id: String,
}

/// Groups `--output-format=json` messages by category and counts them
pub fn parse_pylint_messages(stdout: &str) -> Result<Payload> {
    let messages: Vec<PylintMessage> = if stdout.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(stdout)?
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut conventions = Vec::new();
    let mut refactors = Vec::new();
    for msg in messages {
        let entry = json!({
            "line": msg.line,
            "column": msg.column,
            "message": msg.message,
            "symbol": msg.symbol,
            "message_id": msg.message_id,
        });
        match msg.kind.as_str() {
            "error" | "fatal" => errors.push(entry),
            "warning" => warnings.push(entry),
            "convention" => conventions.push(entry),
            "refactor" => refactors.push(entry),
            other => log::debug!("ignoring pylint message type {other}"),
        }
    }

    let stats = json!({
        "error_count": errors.len(),
        "warning_count": warnings.len(),
        "convention_count": conventions.len(),
        "refactor_count": refactors.len(),
        "total_issues": errors.len() + warnings.len() + conventions.len() + refactors.len(),
    });
    let mut payload = Payload::new();
    payload.insert("errors".into(), Value::Array(errors));
    payload.insert("warnings".into(), Value::Array(warnings));
    payload.insert("conventions".into(), Value::Array(conventions));
    payload.insert("refactors".into(), Value::Array(refactors));
    payload.insert("stats".into(), stats);
    Ok(payload)
}

/// Score from the "rated at X/10" line, 10.0 when absent
pub fn parse_pylint_score(stdout: &str) -> f64 {
    SCORE_RE
        .as_ref()
        .and_then(|re| re.captures(stdout))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_SCORE)
}

#[async_trait]
impl Analyzer for PylintTool {
    type Context = ();

    fn name(&self) -> &str {
        PYLINT_TOOL
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn kind(&self) -> ToolType {
        ToolType::Tool
    }

    fn is_applicable(&self, file_path: &str) -> bool {
        file_path.ends_with(".py")
    }

    async fn analyze(&self, target: &AnalysisTarget, _ctx: &()) -> Result<Payload> {
        let messages = self.run(&["--output-format=json"], target).await?;
        let mut payload = parse_pylint_messages(&messages)?;
        let report = self.run(&["--score=y"], target).await?;
        payload.insert("score".into(), json!(parse_pylint_score(&report)));
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"[
        {"type": "convention", "module": "app", "obj": "", "line": 1, "column": 0,
         "path": "app.py", "symbol": "missing-module-docstring",
         "message": "Missing module docstring", "message-id": "C0114"},
        {"type": "error", "module": "app", "obj": "main", "line": 4, "column": 4,
         "path": "app.py", "symbol": "undefined-variable",
         "message": "Undefined variable 'x'", "message-id": "E0602"},
        {"type": "warning", "module": "app", "obj": "main", "line": 3, "column": 4,
         "path": "app.py", "symbol": "unused-variable",
         "message": "Unused variable 'y'", "message-id": "W0612"}
    ]"#;

    #[test]
    fn messages_are_grouped_by_category() {
        let payload = parse_pylint_messages(SAMPLE).unwrap();
        assert_eq!(payload["errors"][0]["message_id"], json!("E0602"));
        assert_eq!(payload["errors"][0]["line"], json!(4));
        assert_eq!(payload["warnings"].as_array().unwrap().len(), 1);
        assert_eq!(payload["refactors"], json!([]));
        assert_eq!(payload["stats"]["total_issues"], json!(3));
        assert_eq!(payload["stats"]["convention_count"], json!(1));
    }

    #[test]
    fn empty_output_means_no_issues() {
        let payload = parse_pylint_messages("").unwrap();
        assert_eq!(payload["stats"]["total_issues"], json!(0));
        assert!(parse_pylint_messages("not json").is_err());
    }

    #[test]
    fn score_line_is_parsed() {
        let report = "\n------------------------------------\nYour code has been rated at 7.50/10 (previous run: 7.00/10, +0.50)\n";
        assert_eq!(parse_pylint_score(report), 7.5);
        assert_eq!(parse_pylint_score("rated at -3.33/10"), -3.33);
        assert_eq!(parse_pylint_score("no score here"), 10.0);
    }

    #[test]
    fn python_only() {
        let tool = PylintTool::new("pylint", "3.0.0");
        assert!(tool.is_applicable("pkg/app.py"));
        assert!(!tool.is_applicable("web/app.ts"));
    }
}
