use crate::extractor::try_parse;
use crate::language::Language;
use crate::types::{EdgeType, GraphEdge, GraphNode, NodeType, ParsedFile};
use ignore::WalkBuilder;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

/// Files above this size are generated or vendored more often than not
pub const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

/// Directory names never descended into
pub const IGNORED_DIRS: &[&str] = &[
    // VCS
    ".git",
    ".hg",
    ".svn",
    // dependencies
    "node_modules",
    "vendor",
    "venv",
    ".venv",
    ".tox",
    // build output / caches
    "dist",
    "build",
    "target",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
];

/// A supported source file found by the walker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Root-relative path with `/` separators
    pub relative: String,
    pub language: Language,
    pub size_bytes: u64,
}

/// Walks a repository for files with a supported grammar
pub struct RepoWalker {
    root: PathBuf,
    max_file_size_bytes: u64,
}

impl RepoWalker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted list of supported source files (.gitignore aware)
    pub fn walk(&self) -> Vec<SourceFile> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false);
        builder.filter_entry(move |entry| !is_ignored_dir(entry.path(), &root));

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Failed to read entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            let Some(language) = Language::from_path(path) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size_bytes > self.max_file_size_bytes {
                log::debug!(
                    "Skipping large file {} ({} bytes > {})",
                    path.display(),
                    size_bytes,
                    self.max_file_size_bytes
                );
                continue;
            }

            files.push(SourceFile {
                path: path.to_path_buf(),
                relative: normalize_path(&self.root, path),
                language,
                size_bytes,
            });
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        log::info!("Found {} source files", files.len());
        files
    }
}

fn is_ignored_dir(path: &Path, root: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            IGNORED_DIRS.iter().any(|ignored| *ignored == name)
        }
        _ => false,
    })
}

/// Root-relative path with forward slashes
pub fn normalize_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut normalized = relative.to_string_lossy().to_string();
    if normalized.contains('\\') {
        normalized = normalized.replace('\\', "/");
    }
    normalized
}

/// Combined extraction for a whole repository
#[derive(Debug, Clone, Default)]
pub struct RepositoryGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub files_parsed: usize,
    pub files_failed: usize,
}

impl RepositoryGraph {
    /// Merge per-file results, link imports between files, and normalize.
    pub fn from_parsed(files: impl IntoIterator<Item = ParsedFile>, failed: usize) -> Self {
        let mut merged = ParsedFile::default();
        let mut files_parsed = 0;
        for file in files {
            files_parsed += 1;
            merged.nodes.extend(file.nodes);
            merged.edges.extend(file.edges);
        }
        let links = link_imports(&merged.nodes, &merged.edges);
        merged.edges.extend(links);
        merged.normalize();

        Self {
            nodes: merged.nodes,
            edges: merged.edges,
            files_parsed,
            files_failed: failed,
        }
    }

    pub fn node_histogram(&self) -> BTreeMap<String, usize> {
        let mut histogram = BTreeMap::new();
        for node in &self.nodes {
            *histogram
                .entry(node.node_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        histogram
    }
}

/// Walk and parse a repository sequentially.
pub fn parse_repository(root: impl AsRef<Path>) -> std::io::Result<RepositoryGraph> {
    let walker = RepoWalker::new(root);
    let mut parsed = Vec::new();
    let mut failed = 0;
    for file in walker.walk() {
        let bytes = std::fs::read(&file.path)?;
        match try_parse(&bytes, file.language, &file.relative) {
            Ok(result) => parsed.push(result),
            Err(err) => {
                log::warn!("Failed to parse {}: {err}", file.relative);
                failed += 1;
            }
        }
    }
    Ok(RepositoryGraph::from_parsed(parsed, failed))
}

/// File-to-file IMPORTS edges for modules that resolve inside the repository.
///
/// Python dotted names map to `a/b.py` or `a/b/__init__.py`; JavaScript
/// relative specifiers resolve against the importing file's directory.
fn link_imports(nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<GraphEdge> {
    let files: HashMap<&str, &GraphNode> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::File)
        .map(|n| (n.path.as_str(), n))
        .collect();
    let modules: HashMap<&str, &GraphNode> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Module)
        .map(|n| (n.id.as_str(), n))
        .collect();

    let mut links = Vec::new();
    for edge in edges.iter().filter(|e| e.edge_type == EdgeType::Imports) {
        let Some(module) = modules.get(edge.to_id.as_str()) else {
            continue;
        };
        let Some(importer) = edge.from_id.strip_prefix("file:") else {
            continue;
        };
        let Some(language) = Language::from_path(importer) else {
            continue;
        };

        let candidates = if language == Language::Python {
            python_candidates(&module.path)
        } else if language.is_javascript_family() {
            js_candidates(importer, &module.path)
        } else {
            Vec::new()
        };

        if let Some(target) = candidates.iter().find(|c| files.contains_key(c.as_str())) {
            if target != importer {
                let mut link =
                    GraphEdge::new(edge.from_id.clone(), GraphNode::file_id(target), EdgeType::Imports);
                link.properties
                    .insert("module".to_string(), module.path.clone().into());
                links.push(link);
            }
        }
    }
    links
}

fn python_candidates(module: &str) -> Vec<String> {
    if module.starts_with('.') || module.is_empty() {
        return Vec::new();
    }
    let base = module.replace('.', "/");
    vec![format!("{base}.py"), format!("{base}/__init__.py")]
}

fn js_candidates(importer: &str, specifier: &str) -> Vec<String> {
    if !specifier.starts_with('.') {
        return Vec::new();
    }
    let dir = Path::new(importer).parent().unwrap_or(Path::new(""));
    let mut parts: Vec<String> = Vec::new();
    for component in dir.join(specifier).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    let base = parts.join("/");
    let mut candidates = vec![base.clone()];
    for ext in ["ts", "tsx", "js", "jsx", "mjs"] {
        candidates.push(format!("{base}.{ext}"));
    }
    for ext in ["ts", "js"] {
        candidates.push(format!("{base}/index.{ext}"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn skips_ignored_directories_and_unknown_extensions() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        for dir in ["node_modules/pkg", "build", "src", "__pycache__"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("node_modules/pkg/index.js"), b"function x() {}").unwrap();
        fs::write(root.join("build/out.py"), b"def x(): pass").unwrap();
        fs::write(root.join("__pycache__/m.py"), b"").unwrap();
        fs::write(root.join("src/app.py"), b"def main(): pass").unwrap();
        fs::write(root.join("README.md"), b"# readme").unwrap();

        let files = RepoWalker::new(root).walk();
        let relative: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(relative, vec!["src/app.py"]);
        assert_eq!(files[0].language, Language::Python);
    }

    #[test]
    fn js_relative_specifiers_resolve() {
        assert!(js_candidates("web/app.ts", "./api").contains(&"web/api.ts".to_string()));
        assert!(js_candidates("web/pages/a.ts", "../lib/util")
            .contains(&"web/lib/util.js".to_string()));
        assert!(js_candidates("web/app.ts", "react").is_empty());
    }

    #[test]
    fn python_dotted_modules_resolve() {
        assert_eq!(
            python_candidates("app.db"),
            vec!["app/db.py".to_string(), "app/db/__init__.py".to_string()]
        );
        assert!(python_candidates(".models").is_empty());
    }
}
