use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Function,
    Class,
    Module,
}

impl NodeType {
    pub const ALL: [NodeType; 4] = [
        NodeType::File,
        NodeType::Function,
        NodeType::Class,
        NodeType::Module,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::File => "File",
            NodeType::Function => "Function",
            NodeType::Class => "Class",
            NodeType::Module => "Module",
        }
    }
}

/// Kind of a relationship between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeType {
    /// File contains a symbol, class contains a method
    Contains,
    /// Caller invokes callee
    Calls,
    /// File imports a module or another file
    Imports,
}

impl EdgeType {
    pub const ALL: [EdgeType; 3] = [EdgeType::Contains, EdgeType::Calls, EdgeType::Imports];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::Contains => "CONTAINS",
            EdgeType::Calls => "CALLS",
            EdgeType::Imports => "IMPORTS",
        }
    }
}

/// Node in the code graph.
///
/// Ids are derived from type plus qualified path/name (`file:src/app.py`,
/// `func:src/app.py:Service.run`, `class:src/app.py:Service`, `module:os.path`),
/// so two parses of the same bytes produce the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub path: String,
    pub language: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl GraphNode {
    pub fn file_id(path: &str) -> String {
        format!("file:{path}")
    }

    pub fn function_id(path: &str, qualified_name: &str) -> String {
        format!("func:{path}:{qualified_name}")
    }

    pub fn class_id(path: &str, qualified_name: &str) -> String {
        format!("class:{path}:{qualified_name}")
    }

    pub fn module_id(name: &str) -> String {
        format!("module:{name}")
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// Directed edge between two node ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl GraphEdge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            edge_type,
            properties: BTreeMap::new(),
        }
    }

    /// Identity used for deduplication
    pub fn key(&self) -> (&str, &str, EdgeType) {
        (&self.from_id, &self.to_id, self.edge_type)
    }
}

/// Extraction result for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl ParsedFile {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Sort by identity and drop duplicates so output is stable across runs
    pub fn normalize(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.nodes.dedup_by(|a, b| a.id == b.id);
        self.edges.sort_by(|a, b| a.key().cmp(&b.key()));
        self.edges.dedup_by(|a, b| a.key() == b.key());
    }
}
