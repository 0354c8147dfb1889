use crate::analyzer::{AgentContext, AnalysisTarget, Analyzer};
use crate::envelope::{Payload, ToolType};
use crate::error::Result;
use crate::tools::PYLINT_TOOL;
use async_trait::async_trait;
use insight_graph::{file_degree, reachable, Direction};
use insight_parser::{EdgeType, GraphNode};
use insight_vector_store::MetadataFilter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;

pub const PROFICIENCY_AGENT: &str = "PROFICIENCY_AGENT";

const VERSION: &str = "1.0.0";
const SIMILAR_K: usize = 5;
const DEPENDENT_DEPTH: usize = 3;

const SYSTEM_PROMPT: &str = r#"You are an experienced code reviewer.
Judge the proficiency of the author of a source file from its structural position
in the code graph and its similarity to the rest of the codebase.

Levels:
- Junior: knows the syntax, little grasp of architecture
- Mid: understands the structure and applies suitable patterns
- Senior: manages complex dependencies, chooses efficient algorithms
- Expert: drives architectural design, introduces new patterns

Reply with JSON only:
{"level": "Junior" | "Mid" | "Senior" | "Expert", "confidence": 0.0-1.0,
 "reasoning": "one or two sentences", "suggestions": ["...", "..."]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProficiencyLevel {
    Junior,
    Mid,
    Senior,
    Expert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub level: ProficiencyLevel,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Assessment {
    fn fallback() -> Self {
        Self {
            level: ProficiencyLevel::Mid,
            confidence: 0.5,
            reasoning: "Could not parse the model reply; using the default level".to_string(),
            suggestions: Vec::new(),
        }
    }
}

/// Reads the model's JSON verdict, tolerating a fenced code block.
/// Anything unparseable becomes Mid with confidence 0.5.
pub fn parse_assessment(content: &str) -> Assessment {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    match serde_json::from_str::<Assessment>(body.trim()) {
        Ok(mut assessment) => {
            assessment.confidence = assessment.confidence.clamp(0.0, 1.0);
            assessment
        }
        Err(err) => {
            log::warn!("unparseable proficiency reply: {err}");
            Assessment::fallback()
        }
    }
}

const LAYERS: &[(&str, &[&str])] = &[
    ("infrastructure", &["database", "db", "repository", "dao"]),
    ("business_logic", &["service", "business", "logic", "usecase"]),
    ("api", &["api", "controller", "router", "endpoint"]),
    ("presentation", &["ui", "view", "component", "frontend"]),
];

/// Architectural layer guessed from path keywords.
///
/// Short keywords must match a whole path token, so `build/` is not `ui`.
pub fn infer_layer(file_path: &str) -> &'static str {
    let lower = file_path.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    for (layer, keywords) in LAYERS {
        let hit = keywords.iter().any(|keyword| {
            if keyword.len() <= 3 {
                tokens.contains(keyword)
            } else {
                lower.contains(keyword)
            }
        });
        if hit {
            return *layer;
        }
    }
    "unknown"
}

fn dependency_band(total: usize) -> &'static str {
    match total {
        0..=4 => "low",
        5..=14 => "medium",
        _ => "high",
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scores a file's author by combining graph position, code similarity and an
/// LLM verdict.
#[derive(Debug, Default)]
pub struct ProficiencyAgent;

impl ProficiencyAgent {
    pub fn new() -> Self {
        Self
    }

    async fn graph_insights(&self, file_path: &str, ctx: &AgentContext) -> Value {
        let edge_types = [EdgeType::Calls, EdgeType::Imports];
        let layer = infer_layer(file_path);
        let degree = match file_degree(ctx.graph.as_ref(), file_path, &edge_types).await {
            Ok(Some(degree)) => degree,
            Ok(None) => {
                return json!({
                    "importance_score": 0.0,
                    "dependency_complexity": "low",
                    "layer": layer,
                    "note": "file not found in graph",
                })
            }
            Err(err) => {
                return json!({
                    "importance_score": 0.0,
                    "dependency_complexity": "unknown",
                    "layer": layer,
                    "error": err.to_string(),
                })
            }
        };

        let file_id = GraphNode::file_id(file_path);
        let dependents = reachable(
            ctx.graph.as_ref(),
            &file_id,
            &[EdgeType::Imports],
            Direction::Incoming,
            DEPENDENT_DEPTH,
        )
        .await
        .map(|reached| reached.len())
        .unwrap_or(0);
        let loc = match ctx.graph.get_node(&file_id).await {
            Ok(Some(node)) => node.attribute("loc").cloned().unwrap_or(json!(0)),
            _ => json!(0),
        };

        let importance =
            ((degree.incoming as f64 * 0.7 + degree.outgoing as f64 * 0.3) / 20.0).min(1.0);
        json!({
            "importance_score": round2(importance),
            "dependency_complexity": dependency_band(degree.total()),
            "layer": layer,
            "incoming_deps": degree.incoming,
            "outgoing_deps": degree.outgoing,
            "transitive_dependents": dependents,
            "lines_of_code": loc,
        })
    }

    async fn vector_insights(&self, file_path: &str, ctx: &AgentContext) -> Value {
        let file_name = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file_path);
        let query = format!("Similar code patterns and algorithms for {file_name}");
        let mut filters = MetadataFilter::new();
        filters.insert("analysis_id".into(), json!(ctx.analysis_id));

        let hits = match ctx.semantic.query(&query, SIMILAR_K, &filters).await {
            Ok(hits) => hits,
            Err(err) => {
                return json!({
                    "similarity_score": 0.0,
                    "pattern_reuse": "unknown",
                    "error": err.to_string(),
                })
            }
        };
        let Some(top) = hits.first() else {
            return json!({
                "similarity_score": 0.0,
                "pattern_reuse": "unknown",
                "note": "no similar code indexed",
            });
        };

        let top_score = f64::from(top.score);
        let reuse = if top_score > 0.8 {
            "high"
        } else if top_score > 0.6 {
            "medium"
        } else {
            "low"
        };
        let similar_files: BTreeSet<&str> = hits
            .iter()
            .filter_map(|hit| hit.file_path())
            .filter(|path| *path != file_path)
            .collect();
        json!({
            "similarity_score": round2(top_score),
            "pattern_reuse": reuse,
            "similar_files_count": similar_files.len(),
            "top_similar_file": top.file_path().unwrap_or("unknown"),
        })
    }

    fn prompt(file_path: &str, graph: &Value, vector: &Value, ctx: &AgentContext) -> String {
        let pylint = ctx.tool_results.get(PYLINT_TOOL);
        let score = pylint
            .and_then(|e| e.payload.get("score"))
            .map(Value::to_string)
            .unwrap_or_else(|| "N/A".to_string());
        let errors = pylint.map(|e| e.payload_count("errors")).unwrap_or(0);

        format!(
            "File: {file_path}\n\n\
             Structure (code graph):\n\
             - importance: {}\n\
             - dependency complexity: {}\n\
             - layer: {}\n\
             - outgoing dependencies: {}\n\
             - incoming dependencies: {}\n\n\
             Similarity (vector index):\n\
             - top similarity: {}\n\
             - pattern reuse: {}\n\n\
             Static analysis (pylint):\n\
             - score: {score}\n\
             - errors: {errors}\n\n\
             Assess the author's proficiency and answer in JSON.",
            graph["importance_score"],
            graph["dependency_complexity"],
            graph["layer"],
            graph.get("outgoing_deps").unwrap_or(&json!(0)),
            graph.get("incoming_deps").unwrap_or(&json!(0)),
            vector["similarity_score"],
            vector["pattern_reuse"],
        )
    }
}

#[async_trait]
impl Analyzer for ProficiencyAgent {
    type Context = AgentContext;

    fn name(&self) -> &str {
        PROFICIENCY_AGENT
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ToolType {
        ToolType::Agent
    }

    fn llm_model(&self, ctx: &AgentContext) -> Option<String> {
        Some(ctx.llm.model_id().to_string())
    }

    async fn analyze(&self, target: &AnalysisTarget, ctx: &AgentContext) -> Result<Payload> {
        let graph = self.graph_insights(&target.file_path, ctx).await;
        let vector = self.vector_insights(&target.file_path, ctx).await;
        let prompt = Self::prompt(&target.file_path, &graph, &vector, ctx);

        let response = ctx.llm.invoke(&prompt, Some(SYSTEM_PROMPT)).await?;
        let assessment = parse_assessment(&response.content);

        let mut payload = Payload::new();
        payload.insert("level".into(), serde_json::to_value(assessment.level)?);
        payload.insert("confidence".into(), json!(assessment.confidence));
        payload.insert("reasoning".into(), json!(assessment.reasoning));
        payload.insert("suggestions".into(), json!(assessment.suggestions));
        payload.insert("graph_insights".into(), graph);
        payload.insert("vector_insights".into(), vector);
        payload.insert("tokens_used".into(), json!(response.tokens_used));
        Ok(payload)
    }
}
