//! # Insight Parser
//!
//! Turns source files into a typed code graph.
//!
//! ## Pipeline
//!
//! ```text
//! Repository
//!     │
//!     ├──> RepoWalker (.gitignore aware, fixed ignore set)
//!     │      └─> SourceFile[] (language from extension)
//!     │
//!     ├──> Tree-sitter parse → AST
//!     │      ├─> File / Function / Class / Module nodes
//!     │      └─> CONTAINS / CALLS / IMPORTS edges
//!     │
//!     └──> RepositoryGraph (merged, imports linked, sorted)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use insight_parser::{parse, Language, NodeType};
//!
//! let parsed = parse(b"def main():\n    pass\n", Language::Python, "main.py");
//! assert!(parsed.nodes.iter().any(|n| n.node_type == NodeType::Function));
//! ```

mod error;
mod extractor;
mod language;
mod types;
mod walker;

pub use error::{ParserError, Result};
pub use extractor::{parse, try_parse};
pub use language::Language;
pub use types::{EdgeType, GraphEdge, GraphNode, NodeType, ParsedFile};
pub use walker::{
    normalize_path, parse_repository, RepoWalker, RepositoryGraph, SourceFile, IGNORED_DIRS,
    MAX_FILE_SIZE_BYTES,
};
