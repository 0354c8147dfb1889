use crate::analyzer::{AnalysisTarget, Analyzer};
use crate::envelope::{Payload, ToolType};
use crate::error::{AnalyzerError, Result};
use async_trait::async_trait;
use insight_parser::Language;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tree_sitter::{Node, Parser};

pub const COMPLEXITY_TOOL: &str = "COMPLEXITY_TOOL";

const VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionComplexity {
    pub name: String,
    /// 1-based
    pub line: usize,
    pub complexity: usize,
}

struct Rules {
    functions: &'static [&'static str],
    decisions: &'static [&'static str],
}

const PYTHON: Rules = Rules {
    functions: &["function_definition", "lambda"],
    decisions: &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "except_clause",
        "conditional_expression",
        "boolean_operator",
        "for_in_clause",
        "if_clause",
        "case_clause",
    ],
};

const JAVASCRIPT: Rules = Rules {
    functions: &[
        "function_declaration",
        "function_expression",
        "generator_function_declaration",
        "arrow_function",
        "method_definition",
    ],
    decisions: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_case",
        "catch_clause",
        "ternary_expression",
        "&&",
        "||",
        "??",
    ],
};

const RUST: Rules = Rules {
    functions: &["function_item", "closure_expression"],
    decisions: &[
        "if_expression",
        "match_arm",
        "for_expression",
        "while_expression",
        "loop_expression",
        "try_expression",
        "&&",
        "||",
    ],
};

fn rules_for(language: Language) -> &'static Rules {
    match language {
        Language::Python => &PYTHON,
        Language::Rust => &RUST,
        Language::JavaScript | Language::TypeScript | Language::Tsx => &JAVASCRIPT,
    }
}

/// Cyclomatic complexity of every function: one plus its decision points.
///
/// Decisions inside a nested function belong to that function only.
pub fn function_complexity(
    source: &str,
    language: Language,
) -> Result<Vec<FunctionComplexity>> {
    let grammar = language
        .tree_sitter_language()
        .map_err(|e| AnalyzerError::Execution(e.to_string()))?;
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| AnalyzerError::Execution(format!("grammar for {language}: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AnalyzerError::Execution("tree-sitter produced no tree".into()))?;

    let rules = rules_for(language);
    let mut out = Vec::new();
    collect(tree.root_node(), source.as_bytes(), rules, &mut out);
    Ok(out)
}

fn collect(root: Node, source: &[u8], rules: &Rules, out: &mut Vec<FunctionComplexity>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if rules.functions.contains(&node.kind()) {
            let name = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(source).ok())
                .unwrap_or("<anonymous>")
                .to_string();
            out.push(FunctionComplexity {
                name,
                line: node.start_position().row + 1,
                complexity: 1 + decisions(node, rules),
            });
        }
        push_children(node, &mut stack);
    }
}

/// Decision points below `function`, not counting nested functions
fn decisions(function: Node, rules: &Rules) -> usize {
    let mut total = 0;
    let mut stack = Vec::new();
    push_children(function, &mut stack);
    while let Some(node) = stack.pop() {
        if rules.functions.contains(&node.kind()) {
            continue;
        }
        if rules.decisions.contains(&node.kind()) {
            total += 1;
        }
        push_children(node, &mut stack);
    }
    total
}

/// Children in reverse so pops come out in source order
fn push_children<'t>(node: Node<'t>, stack: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev());
}

#[derive(Debug, Default)]
pub struct ComplexityTool;

impl ComplexityTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for ComplexityTool {
    type Context = ();

    fn name(&self) -> &str {
        COMPLEXITY_TOOL
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ToolType {
        ToolType::Tool
    }

    fn is_applicable(&self, file_path: &str) -> bool {
        Language::from_path(file_path).is_some()
    }

    async fn analyze(&self, target: &AnalysisTarget, _ctx: &()) -> Result<Payload> {
        let language = Language::from_path(&target.file_path).ok_or_else(|| {
            AnalyzerError::NotApplicable {
                analyzer: COMPLEXITY_TOOL.to_string(),
                file_path: target.file_path.clone(),
            }
        })?;
        let bytes = tokio::fs::read(target.absolute()).await?;
        let source = String::from_utf8_lossy(&bytes).into_owned();
        let (functions, lines) = tokio::task::spawn_blocking(move || {
            function_complexity(&source, language).map(|f| (f, source.lines().count()))
        })
        .await
        .map_err(|e| AnalyzerError::Execution(e.to_string()))??;

        let max = functions.iter().map(|f| f.complexity).max().unwrap_or(0);
        let total: usize = functions.iter().map(|f| f.complexity).sum();
        let average = if functions.is_empty() {
            0.0
        } else {
            (total as f64 / functions.len() as f64 * 100.0).round() / 100.0
        };

        let mut payload = Payload::new();
        payload.insert("language".into(), json!(language.as_str()));
        payload.insert("function_count".into(), json!(functions.len()));
        payload.insert("max_complexity".into(), json!(max));
        payload.insert("total_complexity".into(), json!(total));
        payload.insert("average_complexity".into(), json!(average));
        payload.insert("lines".into(), json!(lines));
        payload.insert("functions".into(), serde_json::to_value(functions)?);
        Ok(payload)
    }
}
