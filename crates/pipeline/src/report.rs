use crate::commit::CommitSource;
use crate::error::{ErrorClass, PipelineError};
use crate::limits::StageLimitsSnapshot;
use chrono::Utc;
use insight_analyzers::{ContributionStats, EventEnvelope};
use insight_graph::LoadOutcome;
use insight_vector_store::EmbedStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Cap on error messages kept in [`RunStats`]; counts stay exact
const MAX_ERROR_MESSAGES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&PipelineError> for FatalError {
    fn from(err: &PipelineError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStageReport {
    /// A valid snapshot for the commit made parsing unnecessary
    pub reused: bool,
    pub snapshot_id: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub node_types: BTreeMap<String, usize>,
    pub files_parsed: usize,
    pub files_failed: usize,
    pub load: Option<LoadOutcome>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStageReport {
    pub reused: bool,
    /// Build whose chunks the index holds; agent queries are scoped to it
    pub analysis_id: Option<String>,
    pub index_name: String,
    pub embedding_model: String,
    pub dimension: Option<usize>,
    pub chunks: usize,
    pub indexed: usize,
    /// Chunks whose embedding fell back and were left out of the index
    pub degraded: usize,
    pub cache: EmbedStats,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub group_id: String,
    pub files: usize,
    pub selected: Vec<String>,
    pub selection_ratio: f64,
    /// Selection exceeded the configured ceiling; the filter needs tuning
    pub threshold_exceeded: bool,
    pub tool_runs: usize,
    pub tool_failures: usize,
    pub agent_runs: usize,
    pub agent_failures: usize,
    pub summary_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub parse_failures: usize,
    pub chunks: usize,
    pub embeddings_degraded: usize,
    pub tool_runs: usize,
    pub tool_failures: usize,
    pub agent_runs: usize,
    pub agent_failures: usize,
    pub files_selected: usize,
    pub groups_saved: usize,
    pub error_counts: BTreeMap<ErrorClass, usize>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, class: ErrorClass, message: impl Into<String>) {
        *self.error_counts.entry(class).or_insert(0) += 1;
        if self.errors.len() < MAX_ERROR_MESSAGES {
            self.errors.push(message.into());
        }
    }

    pub fn add_group(&mut self, group: &GroupReport) {
        self.tool_runs += group.tool_runs;
        self.tool_failures += group.tool_failures;
        self.agent_runs += group.agent_runs;
        self.agent_failures += group.agent_failures;
        self.files_selected += group.selected.len();
        if group.summary_path.is_some() {
            self.groups_saved += 1;
        }
        if group.tool_failures + group.agent_failures > 0 {
            *self.error_counts.entry(ErrorClass::Analyzer).or_insert(0) +=
                group.tool_failures + group.agent_failures;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub analysis_id: String,
    pub commit_hash: String,
    pub commit_source: Option<CommitSource>,
    pub status: RunStatus,
    pub fatal_error: Option<FatalError>,
    pub graph: GraphStageReport,
    pub vector: VectorStageReport,
    pub groups: Vec<GroupReport>,
    /// One envelope per repository-wide build step
    pub builders: Vec<EventEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution: Option<ContributionStats>,
    pub limits: StageLimitsSnapshot,
    pub stats: RunStats,
    pub started_at: String,
    pub finished_at: String,
}

impl RunReport {
    /// Empty report for a run that has just begun
    pub fn new(analysis_id: impl Into<String>, limits: StageLimitsSnapshot) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            analysis_id: analysis_id.into(),
            commit_hash: String::new(),
            commit_source: None,
            status: RunStatus::Completed,
            fatal_error: None,
            graph: GraphStageReport::default(),
            vector: VectorStageReport::default(),
            groups: Vec::new(),
            builders: Vec::new(),
            contribution: None,
            limits,
            stats: RunStats::new(),
            started_at: now.clone(),
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn group_totals_roll_up() {
        let mut stats = RunStats::new();
        stats.add_group(&GroupReport {
            group_id: "group-0".into(),
            files: 3,
            selected: vec!["a.py".into()],
            tool_runs: 9,
            tool_failures: 1,
            agent_runs: 1,
            summary_path: Some(PathBuf::from("results/l2_summary_group-0.json")),
            ..GroupReport::default()
        });
        stats.add_error(ErrorClass::Parse, "bad.py: invalid utf-8");

        assert_eq!(stats.tool_runs, 9);
        assert_eq!(stats.files_selected, 1);
        assert_eq!(stats.groups_saved, 1);
        assert_eq!(stats.error_counts.get(&ErrorClass::Analyzer), Some(&1));
        assert_eq!(stats.error_counts.get(&ErrorClass::Parse), Some(&1));
        assert_eq!(stats.errors, vec!["bad.py: invalid utf-8".to_string()]);
    }

    #[test]
    fn fatal_error_carries_class() {
        let fatal = FatalError::from(&PipelineError::StoreUnavailable("graph store down".into()));
        assert_eq!(fatal.class, ErrorClass::StoreUnavailable);
        assert!(fatal.message.contains("graph store down"));
    }
}
