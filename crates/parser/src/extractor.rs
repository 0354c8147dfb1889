use crate::error::{ParserError, Result};
use crate::language::Language;
use crate::types::{EdgeType, GraphEdge, GraphNode, NodeType, ParsedFile};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;
use tree_sitter::{Node, Parser};

/// Extract typed nodes and edges from one file.
///
/// Never fails: any error is logged and degrades to an empty extraction so a
/// single broken file cannot abort a repository walk.
pub fn parse(bytes: &[u8], language: Language, path: &str) -> ParsedFile {
    match try_parse(bytes, language, path) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("Failed to parse {path}: {err}");
            ParsedFile::default()
        }
    }
}

/// Fallible variant of [`parse`] for callers that count failures.
pub fn try_parse(bytes: &[u8], language: Language, path: &str) -> Result<ParsedFile> {
    let source = std::str::from_utf8(bytes).map_err(|source| ParserError::InvalidUtf8 {
        path: path.to_string(),
        source,
    })?;

    let ts_language = language.tree_sitter_language()?;
    let mut parser = Parser::new();
    parser
        .set_language(&ts_language)
        .map_err(|e| ParserError::tree_sitter(format!("Failed to set language: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParserError::tree_sitter("Failed to parse source code"))?;

    let mut extractor = Extractor::new(source, language, path);
    let scope = Scope::file(&extractor.file_id);
    extractor.visit(tree.root_node(), scope);
    Ok(extractor.finish())
}

/// Where newly found symbols attach
#[derive(Clone)]
struct Scope {
    /// Source of CONTAINS edges (file or class id)
    owner_id: String,
    /// Qualifier for members (`Service` in `Service.run`)
    class_name: Option<String>,
    /// Source of CALLS edges (innermost function, or the file at top level)
    caller_id: String,
}

impl Scope {
    fn file(file_id: &str) -> Self {
        Self {
            owner_id: file_id.to_string(),
            class_name: None,
            caller_id: file_id.to_string(),
        }
    }
}

enum Syntax<'t> {
    Function(Node<'t>),
    Class(Node<'t>),
    Impl(String),
    Imports(Vec<String>),
    Call(String),
    Other,
}

struct Extractor<'a> {
    source: &'a str,
    language: Language,
    path: &'a str,
    file_id: String,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    /// simple name -> (qualified name, node id)
    functions: BTreeMap<String, Vec<(String, String)>>,
    /// (caller id, callee simple name)
    calls: Vec<(String, String)>,
    modules: BTreeSet<String>,
}

impl<'a> Extractor<'a> {
    fn new(source: &'a str, language: Language, path: &'a str) -> Self {
        Self {
            source,
            language,
            path,
            file_id: GraphNode::file_id(path),
            nodes: Vec::new(),
            edges: Vec::new(),
            functions: BTreeMap::new(),
            calls: Vec::new(),
            modules: BTreeSet::new(),
        }
    }

    /// Pre-order walk over an explicit stack; nesting depth is bounded by
    /// the heap, not the thread stack.
    fn visit(&mut self, root: Node<'a>, scope: Scope) {
        let mut stack: Vec<(Node<'a>, Rc<Scope>)> = vec![(root, Rc::new(scope))];
        while let Some((node, scope)) = stack.pop() {
            let inner = match self.classify(node) {
                Syntax::Function(name) => {
                    let name = self.text(name).to_string();
                    let (id, _) = self.add_symbol(node, NodeType::Function, &name, &scope);
                    Rc::new(Scope {
                        caller_id: id,
                        ..(*scope).clone()
                    })
                }
                Syntax::Class(name) => {
                    let name = self.text(name).to_string();
                    let (id, qualified) = self.add_symbol(node, NodeType::Class, &name, &scope);
                    Rc::new(Scope {
                        owner_id: id,
                        class_name: Some(qualified),
                        caller_id: scope.caller_id.clone(),
                    })
                }
                Syntax::Impl(target) => Rc::new(Scope {
                    owner_id: GraphNode::class_id(self.path, &target),
                    class_name: Some(target),
                    caller_id: scope.caller_id.clone(),
                }),
                Syntax::Imports(modules) => {
                    self.modules
                        .extend(modules.into_iter().filter(|m| !m.is_empty()));
                    continue;
                }
                Syntax::Call(callee) => {
                    self.calls.push((scope.caller_id.clone(), callee));
                    scope
                }
                Syntax::Other => scope,
            };

            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                stack.push((child, Rc::clone(&inner)));
            }
        }
    }

    fn classify(&self, node: Node<'a>) -> Syntax<'a> {
        match self.language {
            Language::Python => self.classify_python(node),
            Language::JavaScript | Language::TypeScript | Language::Tsx => self.classify_js(node),
            Language::Rust => self.classify_rust(node),
        }
    }

    fn classify_python(&self, node: Node<'a>) -> Syntax<'a> {
        match node.kind() {
            "function_definition" => named(node, Syntax::Function),
            "class_definition" => named(node, Syntax::Class),
            "import_statement" => {
                let mut modules = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    let target = match child.kind() {
                        "aliased_import" => child.child_by_field_name("name"),
                        "dotted_name" => Some(child),
                        _ => None,
                    };
                    if let Some(target) = target {
                        modules.push(self.text(target).to_string());
                    }
                }
                Syntax::Imports(modules)
            }
            "import_from_statement" => node
                .child_by_field_name("module_name")
                .map(|m| Syntax::Imports(vec![self.text(m).to_string()]))
                .unwrap_or(Syntax::Other),
            "call" => self.call(node),
            _ => Syntax::Other,
        }
    }

    fn classify_js(&self, node: Node<'a>) -> Syntax<'a> {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" | "method_definition" => {
                named(node, Syntax::Function)
            }
            "variable_declarator" => {
                let is_function = node.child_by_field_name("value").is_some_and(|value| {
                    matches!(
                        value.kind(),
                        "arrow_function" | "function_expression" | "function"
                    )
                });
                if is_function {
                    named(node, Syntax::Function)
                } else {
                    Syntax::Other
                }
            }
            "class_declaration"
            | "abstract_class_declaration"
            | "interface_declaration"
            | "enum_declaration" => named(node, Syntax::Class),
            "import_statement" => node
                .child_by_field_name("source")
                .map(|s| Syntax::Imports(vec![unquote(self.text(s))]))
                .unwrap_or(Syntax::Other),
            "call_expression" => {
                let is_require = node
                    .child_by_field_name("function")
                    .is_some_and(|f| f.kind() == "identifier" && self.text(f) == "require");
                if is_require {
                    let module = node
                        .child_by_field_name("arguments")
                        .and_then(|args| args.named_child(0))
                        .filter(|arg| arg.kind() == "string")
                        .map(|arg| unquote(self.text(arg)));
                    if let Some(module) = module {
                        return Syntax::Imports(vec![module]);
                    }
                }
                self.call(node)
            }
            _ => Syntax::Other,
        }
    }

    fn classify_rust(&self, node: Node<'a>) -> Syntax<'a> {
        match node.kind() {
            "function_item" => named(node, Syntax::Function),
            "struct_item" | "enum_item" | "trait_item" | "union_item" => {
                named(node, Syntax::Class)
            }
            "impl_item" => node
                .child_by_field_name("type")
                .and_then(|ty| self.rust_type_name(ty))
                .map(Syntax::Impl)
                .unwrap_or(Syntax::Other),
            "use_declaration" => node
                .child_by_field_name("argument")
                .map(|arg| Syntax::Imports(vec![self.rust_use_module(arg)]))
                .unwrap_or(Syntax::Other),
            "call_expression" => self.call(node),
            _ => Syntax::Other,
        }
    }

    fn call(&self, node: Node<'a>) -> Syntax<'a> {
        node.child_by_field_name("function")
            .and_then(|function| self.callee_name(function))
            .map(Syntax::Call)
            .unwrap_or(Syntax::Other)
    }

    /// Last identifier segment of a call target (`self.repo.save` -> `save`)
    fn callee_name(&self, node: Node<'a>) -> Option<String> {
        let target = match node.kind() {
            "identifier" | "property_identifier" | "field_identifier" => Some(node),
            "attribute" => node.child_by_field_name("attribute"),
            "member_expression" => node.child_by_field_name("property"),
            "field_expression" => node.child_by_field_name("field"),
            "scoped_identifier" => node.child_by_field_name("name"),
            "generic_function" => {
                return node
                    .child_by_field_name("function")
                    .and_then(|inner| self.callee_name(inner));
            }
            _ => None,
        }?;
        let name = self.text(target);
        (!name.is_empty()).then(|| name.to_string())
    }

    fn rust_type_name(&self, node: Node<'a>) -> Option<String> {
        match node.kind() {
            "type_identifier" => Some(self.text(node).to_string()),
            "generic_type" => node
                .child_by_field_name("type")
                .and_then(|inner| self.rust_type_name(inner)),
            "scoped_type_identifier" => node
                .child_by_field_name("name")
                .map(|name| self.text(name).to_string()),
            _ => None,
        }
    }

    fn rust_use_module(&self, argument: Node<'a>) -> String {
        let path_node = match argument.kind() {
            "use_as_clause" | "scoped_use_list" => {
                argument.child_by_field_name("path").unwrap_or(argument)
            }
            _ => argument,
        };
        let text: String = self
            .text(path_node)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        text.trim_end_matches("::*")
            .trim_start_matches("::")
            .to_string()
    }

    fn add_symbol(
        &mut self,
        node: Node<'a>,
        node_type: NodeType,
        name: &str,
        scope: &Scope,
    ) -> (String, String) {
        let qualified = match &scope.class_name {
            Some(class) => format!("{class}{}{name}", self.language.scope_separator()),
            None => name.to_string(),
        };
        let id = match node_type {
            NodeType::Class => GraphNode::class_id(self.path, &qualified),
            _ => GraphNode::function_id(self.path, &qualified),
        };

        self.nodes.push(
            self.node(id.clone(), node_type, self.path)
                .with_attribute("name", name)
                .with_attribute("qualified_name", qualified.as_str())
                .with_attribute("start_line", node.start_position().row + 1)
                .with_attribute("end_line", node.end_position().row + 1),
        );
        self.edges.push(GraphEdge::new(
            scope.owner_id.clone(),
            id.clone(),
            EdgeType::Contains,
        ));
        if node_type == NodeType::Function {
            self.functions
                .entry(name.to_string())
                .or_default()
                .push((qualified.clone(), id.clone()));
        }
        (id, qualified)
    }

    /// Resolve a callee to a function defined in this file.
    ///
    /// A top-level definition wins; otherwise the name must be unambiguous.
    fn resolve_call(&self, callee: &str) -> Option<&str> {
        let candidates = self.functions.get(callee)?;
        if let Some((_, id)) = candidates.iter().find(|(qualified, _)| qualified == callee) {
            return Some(id);
        }
        match candidates.as_slice() {
            [(_, id)] => Some(id),
            _ => None,
        }
    }

    fn finish(mut self) -> ParsedFile {
        let loc = self.source.matches('\n').count() + 1;
        let file = self
            .node(self.file_id.clone(), NodeType::File, self.path)
            .with_attribute("loc", loc)
            .with_attribute("size_bytes", self.source.len());
        self.nodes.push(file);

        for module in std::mem::take(&mut self.modules) {
            let id = GraphNode::module_id(&module);
            self.nodes.push(
                self.node(id.clone(), NodeType::Module, &module)
                    .with_attribute("name", module.as_str()),
            );
            self.edges
                .push(GraphEdge::new(self.file_id.clone(), id, EdgeType::Imports));
        }

        let calls = std::mem::take(&mut self.calls);
        for (caller, callee) in calls {
            if let Some(target) = self.resolve_call(&callee) {
                let mut edge = GraphEdge::new(caller, target, EdgeType::Calls);
                edge.properties.insert("callee".to_string(), json!(callee));
                self.edges.push(edge);
            }
        }

        // impl blocks may target a type declared in another file
        let known: HashSet<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        for edge in &mut self.edges {
            if edge.edge_type == EdgeType::Contains && !known.contains(&edge.from_id) {
                edge.from_id = self.file_id.clone();
            }
        }

        let mut parsed = ParsedFile {
            nodes: self.nodes,
            edges: self.edges,
        };
        parsed.normalize();
        parsed
    }

    fn node(&self, id: String, node_type: NodeType, path: &str) -> GraphNode {
        GraphNode {
            id,
            node_type,
            path: path.to_string(),
            language: self.language.as_str().to_string(),
            attributes: BTreeMap::new(),
        }
    }

    fn text(&self, node: Node<'a>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }
}

fn named<'t>(node: Node<'t>, make: fn(Node<'t>) -> Syntax<'t>) -> Syntax<'t> {
    node.child_by_field_name("name")
        .map(make)
        .unwrap_or(Syntax::Other)
}

fn unquote(raw: &str) -> String {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}
