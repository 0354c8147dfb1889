use crate::envelope::{EventEnvelope, Payload};
use crate::error::{AnalyzerError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

const RESULTS_DIR: &str = "results";
const SUMMARY_PREFIX: &str = "l2_summary_";
const RAW_ID_HASH_LEN: usize = 8;

/// One analyzer result inside a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub file_path: Option<String>,
    pub payload: Payload,
    pub execution_time_ms: u64,
    pub success: bool,
}

impl From<&EventEnvelope> for SummaryEntry {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            file_path: envelope.file_path.clone(),
            payload: envelope.payload.clone(),
            execution_time_ms: envelope.execution_time_ms,
            success: envelope.is_success(),
        }
    }
}

/// Reduced results of one group, keyed by analyzer name.
///
/// Keys are whatever analyzers ran; consumers iterate them rather than
/// expecting a fixed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Summary {
    pub group_id: String,
    pub file_count: usize,
    pub tools_summary: BTreeMap<String, Vec<SummaryEntry>>,
    pub agents_summary: BTreeMap<String, Vec<SummaryEntry>>,
    pub execution_time_ms: u64,
    pub timestamp: String,
}

fn group_by_name(envelopes: &[EventEnvelope]) -> BTreeMap<String, Vec<SummaryEntry>> {
    let mut grouped: BTreeMap<String, Vec<SummaryEntry>> = BTreeMap::new();
    for envelope in envelopes {
        grouped
            .entry(envelope.tool_name.clone())
            .or_default()
            .push(SummaryEntry::from(envelope));
    }
    grouped
}

/// File-name-safe form of a group id.
///
/// Ids that needed rewriting get a hash of the raw id appended, so `a/b`
/// and `a_b` never share a file.
fn file_stem(group_id: &str) -> String {
    let safe: String = group_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == group_id {
        return safe;
    }
    let digest = blake3::hash(group_id.as_bytes()).to_hex();
    format!("{safe}-{}", &digest.as_str()[..RAW_ID_HASH_LEN])
}

/// Aggregates and persists per-group summaries under `{root}/results/`
#[derive(Debug, Clone)]
pub struct L2Reducer {
    root: PathBuf,
}

impl L2Reducer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn summary_path(&self, group_id: &str) -> PathBuf {
        self.results_dir()
            .join(format!("{SUMMARY_PREFIX}{}.json", file_stem(group_id)))
    }

    pub fn aggregate(
        &self,
        group_id: &str,
        tool_envelopes: &[EventEnvelope],
        agent_envelopes: &[EventEnvelope],
    ) -> L2Summary {
        let started = Instant::now();
        let files: BTreeSet<&str> = tool_envelopes
            .iter()
            .chain(agent_envelopes)
            .filter_map(|e| e.file_path.as_deref())
            .collect();
        let tools_summary = group_by_name(tool_envelopes);
        let agents_summary = group_by_name(agent_envelopes);

        L2Summary {
            group_id: group_id.to_string(),
            file_count: files.len(),
            tools_summary,
            agents_summary,
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub async fn save(&self, summary: &L2Summary) -> Result<PathBuf> {
        let path = self.summary_path(&summary.group_id);
        tokio::fs::create_dir_all(self.results_dir()).await?;
        let bytes = serde_json::to_vec_pretty(summary)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        log::debug!("saved summary {} to {}", summary.group_id, path.display());
        Ok(path)
    }

    pub async fn load(&self, group_id: &str) -> Result<L2Summary> {
        let path = self.summary_path(group_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AnalyzerError::NotFound(format!("summary for group {group_id}")))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every saved summary, sorted by group id. Unreadable files are skipped.
    pub async fn load_all(&self) -> Result<Vec<L2Summary>> {
        let pattern = format!(
            "{}/{SUMMARY_PREFIX}*.json",
            glob::Pattern::escape(&self.results_dir().to_string_lossy())
        );
        let paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| AnalyzerError::Execution(format!("summary pattern: {e}")))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(err) => {
                    log::warn!("skipping unreadable summary entry: {err}");
                    None
                }
            })
            .collect();

        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            match read_summary(&path).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => log::warn!("skipping summary {}: {err}", path.display()),
            }
        }
        summaries.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Ok(summaries)
    }
}

async fn read_summary(path: &Path) -> Result<L2Summary> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
