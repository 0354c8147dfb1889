//! LLM-backed agents, run only on files the L2 filter selects.

mod proficiency;

pub use proficiency::{
    infer_layer, parse_assessment, Assessment, ProficiencyAgent, ProficiencyLevel,
    PROFICIENCY_AGENT,
};

use crate::analyzer::Agent;
use std::sync::Arc;

pub fn default_agents() -> Vec<Arc<Agent>> {
    vec![Arc::new(ProficiencyAgent::new())]
}
