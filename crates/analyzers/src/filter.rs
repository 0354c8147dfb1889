use crate::envelope::EventEnvelope;
use crate::tools::{COMPLEXITY_TOOL, DORA_CALCULATOR, PYLINT_TOOL, SECRET_SCAN_TOOL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const SONARQUBE_TOOL: &str = "SONARQUBE_TOOL";
pub const SEMGREP_TOOL: &str = "SEMGREP_TOOL";

/// Thresholds deciding which files deserve an agent pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_complexity: u64,
    pub min_lines: u64,
    /// Pylint scores below this select the file
    pub max_quality_score: f64,
    /// More pylint errors than this select the file
    pub max_error_count: usize,
    pub max_churn_rate: f64,
    /// Share of files the agent tier may see before the filter counts as mis-tuned
    pub max_selection_ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_complexity: 10,
            min_lines: 100,
            max_quality_score: 8.0,
            max_error_count: 5,
            max_churn_rate: 0.5,
            max_selection_ratio: 0.2,
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default_value: T) -> T {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default_value)
}

impl FilterConfig {
    /// Applies `L2_FILTER_*` variables on top of `self`
    pub fn with_env(self) -> Self {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            min_complexity: parse_or(
                lookup("L2_FILTER_MIN_COMPLEXITY").as_deref(),
                self.min_complexity,
            ),
            min_lines: parse_or(lookup("L2_FILTER_MIN_LINES").as_deref(), self.min_lines),
            max_quality_score: parse_or(
                lookup("L2_FILTER_MAX_QUALITY_SCORE").as_deref(),
                self.max_quality_score,
            ),
            max_error_count: parse_or(
                lookup("L2_FILTER_MAX_ERROR_COUNT").as_deref(),
                self.max_error_count,
            ),
            max_churn_rate: parse_or(
                lookup("L2_FILTER_MAX_CHURN_RATE").as_deref(),
                self.max_churn_rate,
            ),
            max_selection_ratio: parse_or(
                lookup("L2_FILTER_MAX_SELECTION_RATIO").as_deref(),
                self.max_selection_ratio,
            ),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_selection_ratio > 0.0 && self.max_selection_ratio <= 1.0) {
            return Err(format!(
                "max_selection_ratio must be in (0, 1], got {}",
                self.max_selection_ratio
            ));
        }
        if !(self.max_churn_rate >= 0.0 && self.max_churn_rate <= 1.0) {
            return Err(format!(
                "max_churn_rate must be in [0, 1], got {}",
                self.max_churn_rate
            ));
        }
        if !self.max_quality_score.is_finite() {
            return Err("max_quality_score must be finite".to_string());
        }
        Ok(())
    }
}

/// Picks the files whose tool results mark them as worth an agent pass.
#[derive(Debug, Clone, Default)]
pub struct L2Filter {
    config: FilterConfig,
}

impl L2Filter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    fn selects(&self, envelope: &EventEnvelope) -> bool {
        let cfg = &self.config;
        match envelope.tool_name.as_str() {
            PYLINT_TOOL => {
                envelope.payload_f64("score", 10.0) < cfg.max_quality_score
                    || envelope.payload_count("errors") > cfg.max_error_count
            }
            SONARQUBE_TOOL => {
                envelope.payload_count("bugs") > 0 || envelope.payload_count("vulnerabilities") > 0
            }
            SEMGREP_TOOL | SECRET_SCAN_TOOL => envelope.payload_count("findings") > 0,
            DORA_CALCULATOR => envelope.payload_f64("churn_rate", 0.0) > cfg.max_churn_rate,
            COMPLEXITY_TOOL => {
                envelope.payload_f64("max_complexity", 0.0) >= cfg.min_complexity as f64
                    && envelope.payload_f64("lines", 0.0) >= cfg.min_lines as f64
            }
            _ => false,
        }
    }

    /// Union of the files any rule selects. Failed envelopes and envelopes
    /// without a file never select; input order does not matter.
    pub fn select_significant_files(&self, envelopes: &[EventEnvelope]) -> BTreeSet<String> {
        envelopes
            .iter()
            .filter(|e| e.is_success())
            .filter_map(|e| {
                let path = e.file_path.as_ref()?;
                self.selects(e).then(|| path.clone())
            })
            .collect()
    }

    pub fn validate(&self, total: usize, selected: usize) -> bool {
        validate_threshold(total, selected, self.config.max_selection_ratio)
    }
}

/// `selected / total`, zero for an empty run
pub fn selection_ratio(total: usize, selected: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        selected as f64 / total as f64
    }
}

/// True while the selection stays within `max_ratio`
pub fn validate_threshold(total: usize, selected: usize, max_ratio: f64) -> bool {
    selection_ratio(total, selected) <= max_ratio
}
