use crate::analyzer::{AnalysisTarget, Analyzer};
use crate::envelope::{Payload, ToolType};
use crate::error::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SECRET_SCAN_TOOL: &str = "SECRET_SCAN_TOOL";

const VERSION: &str = "1.0.0";

/// Files larger than this are not scanned
const MAX_SCAN_BYTES: u64 = 2 * 1024 * 1024;

struct Rule {
    name: &'static str,
    severity: &'static str,
    message: &'static str,
    pattern: Regex,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    [
        (
            "aws_access_key",
            "high",
            "AWS access key id",
            r"\bAKIA[0-9A-Z]{16}\b",
        ),
        (
            "private_key",
            "high",
            "Private key block",
            r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY( BLOCK)?-----",
        ),
        (
            "github_token",
            "high",
            "GitHub token",
            r"\bgh[pousr]_[A-Za-z0-9]{36,}\b",
        ),
        (
            "hardcoded_credential",
            "medium",
            "Hard-coded credential",
            r#"(?i)\b(password|passwd|secret|token|api_key|apikey)\b\s*[:=]\s*["'][^"']{4,}["']"#,
        ),
    ]
    .into_iter()
    .filter_map(|(name, severity, message, pattern)| match Regex::new(pattern) {
        Ok(pattern) => Some(Rule {
            name,
            severity,
            message,
            pattern,
        }),
        Err(err) => {
            log::error!("secret rule {name} failed to compile: {err}");
            None
        }
    })
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFinding {
    pub rule: String,
    /// 1-based
    pub line: usize,
    pub severity: String,
    pub message: String,
}

/// At most one finding per rule and line
pub fn scan_secrets(content: &str) -> Vec<SecretFinding> {
    let mut findings = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        for rule in RULES.iter() {
            if rule.pattern.is_match(line) {
                findings.push(SecretFinding {
                    rule: rule.name.to_string(),
                    line: idx + 1,
                    severity: rule.severity.to_string(),
                    message: rule.message.to_string(),
                });
            }
        }
    }
    findings
}

/// Pattern-based scan for committed credentials
#[derive(Debug, Default)]
pub struct SecretScanTool;

impl SecretScanTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for SecretScanTool {
    type Context = ();

    fn name(&self) -> &str {
        SECRET_SCAN_TOOL
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ToolType {
        ToolType::Tool
    }

    async fn analyze(&self, target: &AnalysisTarget, _ctx: &()) -> Result<Payload> {
        let path = target.absolute();
        let size = tokio::fs::metadata(&path).await?.len();
        let findings = if size > MAX_SCAN_BYTES {
            log::debug!("{} too large to scan ({size} bytes)", target.file_path);
            Vec::new()
        } else {
            let bytes = tokio::fs::read(&path).await?;
            scan_secrets(&String::from_utf8_lossy(&bytes))
        };

        let mut payload = Payload::new();
        payload.insert("finding_count".into(), json!(findings.len()));
        payload.insert("findings".into(), serde_json::to_value(findings)?);
        Ok(payload)
    }
}
