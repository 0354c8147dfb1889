use insight_parser::{parse_repository, EdgeType, NodeType};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

fn write(root: &std::path::Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

#[test]
fn links_imports_between_repository_files() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    write(root, "app/__init__.py", "");
    write(root, "app/db.py", "def connect():\n    return None\n");
    write(
        root,
        "app/service.py",
        "from app.db import connect\nimport json\n\ndef handle():\n    return connect()\n",
    );
    write(root, "node_modules/lib/index.js", "function ignored() {}\n");
    write(root, "notes.txt", "not code");

    let graph = parse_repository(root).unwrap();

    assert_eq!(graph.files_parsed, 3);
    assert_eq!(graph.files_failed, 0);

    let histogram = graph.node_histogram();
    assert_eq!(histogram.get("File"), Some(&3));
    assert_eq!(histogram.get("Function"), Some(&2));
    assert_eq!(histogram.get("Module"), Some(&2));

    assert!(graph.edges.iter().any(|e| e.edge_type == EdgeType::Imports
        && e.from_id == "file:app/service.py"
        && e.to_id == "file:app/db.py"));
    assert!(graph.edges.iter().any(|e| e.edge_type == EdgeType::Imports
        && e.from_id == "file:app/service.py"
        && e.to_id == "module:json"));
    assert!(graph
        .nodes
        .iter()
        .all(|n| n.node_type != NodeType::Function || !n.path.contains("node_modules")));
}

#[test]
fn broken_file_does_not_abort_the_walk() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    write(root, "good.py", "def ok():\n    pass\n");
    fs::write(root.join("bad.py"), [0xff, 0xfe, 0xfd]).unwrap();

    let graph = parse_repository(root).unwrap();
    assert_eq!(graph.files_parsed, 1);
    assert_eq!(graph.files_failed, 1);
    assert!(graph.nodes.iter().any(|n| n.id == "func:good.py:ok"));
}

#[test]
fn repeated_parses_are_identical() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    write(root, "a.py", "def a():\n    b()\n\ndef b():\n    a()\n");
    write(root, "web/app.ts", "import { b } from './b';\nexport function a() { return b(); }\n");
    write(root, "web/b.ts", "export function b() { return 1; }\n");

    let first = parse_repository(root).unwrap();
    let second = parse_repository(root).unwrap();
    assert_eq!(first.nodes, second.nodes);
    assert_eq!(first.edges, second.edges);
    assert!(first
        .edges
        .iter()
        .any(|e| e.from_id == "file:web/app.ts" && e.to_id == "file:web/b.ts"));
}
