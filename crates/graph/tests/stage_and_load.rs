use async_trait::async_trait;
use insight_graph::{
    file_degree, BulkLoader, Direction, EdgeWrite, GraphError, GraphStager, GraphStore,
    MemoryGraphStore, NodeWrite, RetryPolicy,
};
use insight_parser::{parse_repository, EdgeType, GraphEdge, GraphNode, NodeType};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn write_repo(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("pkg")).unwrap();
    std::fs::write(
        root.join("pkg/util.py"),
        "def helper(x):\n    return x + 1\n",
    )
    .unwrap();
    std::fs::write(
        root.join("main.py"),
        "import pkg.util\n\ndef run():\n    return helper(1)\n\ndef helper(x):\n    return x\n",
    )
    .unwrap();
}

#[tokio::test]
async fn loading_twice_does_not_duplicate() {
    let repo = tempdir().unwrap();
    write_repo(repo.path());
    let graph = parse_repository(repo.path()).unwrap();

    let staging = tempdir().unwrap();
    let staged = GraphStager::new(staging.path())
        .stage(&graph.nodes, &graph.edges, "analysis-1")
        .await
        .unwrap();

    let store = Arc::new(MemoryGraphStore::new());
    let loader = BulkLoader::new(store.clone());
    let first = loader
        .bulk_load(&staged.nodes_path, &staged.edges_path)
        .await
        .unwrap();
    let nodes_after_first = store.node_count().await.unwrap();
    let edges_after_first = store.edge_count().await.unwrap();

    let second = loader
        .bulk_load(&staged.nodes_path, &staged.edges_path)
        .await
        .unwrap();

    assert_eq!(first.nodes_created, graph.nodes.len());
    assert_eq!(second.nodes_created, 0);
    assert_eq!(second.nodes_updated, graph.nodes.len());
    assert_eq!(second.edges_created, 0);
    assert_eq!(store.node_count().await.unwrap(), nodes_after_first);
    assert_eq!(store.edge_count().await.unwrap(), edges_after_first);

    let degree = file_degree(store.as_ref(), "pkg/util.py", &[EdgeType::Imports])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(degree.incoming, 1);
}

/// Fails the first `failures` writes with a retryable error
struct FlakyStore {
    inner: MemoryGraphStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }

    fn trip(&self) -> Result<(), GraphError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GraphError::StoreWrite("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn upsert_nodes(
        &self,
        node_type: NodeType,
        nodes: Vec<GraphNode>,
    ) -> insight_graph::Result<NodeWrite> {
        self.trip()?;
        self.inner.upsert_nodes(node_type, nodes).await
    }

    async fn create_edges(
        &self,
        edge_type: EdgeType,
        edges: Vec<GraphEdge>,
    ) -> insight_graph::Result<EdgeWrite> {
        self.trip()?;
        self.inner.create_edges(edge_type, edges).await
    }

    async fn find_nodes(&self, property: &str, value: &Value) -> insight_graph::Result<Vec<GraphNode>> {
        self.inner.find_nodes(property, value).await
    }

    async fn get_node(&self, id: &str) -> insight_graph::Result<Option<GraphNode>> {
        self.inner.get_node(id).await
    }

    async fn edges_of(&self, id: &str, direction: Direction) -> insight_graph::Result<Vec<GraphEdge>> {
        self.inner.edges_of(id, direction).await
    }

    async fn node_count(&self) -> insight_graph::Result<usize> {
        self.inner.node_count().await
    }

    async fn edge_count(&self) -> insight_graph::Result<usize> {
        self.inner.edge_count().await
    }

    async fn health_check(&self) -> insight_graph::Result<()> {
        self.inner.health_check().await
    }
}

fn single_file_graph() -> (Vec<GraphNode>, Vec<GraphEdge>) {
    let file = GraphNode {
        id: GraphNode::file_id("a.py"),
        node_type: NodeType::File,
        path: "a.py".into(),
        language: "python".into(),
        attributes: Default::default(),
    };
    (vec![file], Vec::new())
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let staging = tempdir().unwrap();
    let (nodes, edges) = single_file_graph();
    let staged = GraphStager::new(staging.path())
        .stage(&nodes, &edges, "flaky")
        .await
        .unwrap();

    let store = Arc::new(FlakyStore::new(2));
    let outcome = BulkLoader::new(store.clone())
        .with_retry(RetryPolicy::immediate(3))
        .bulk_load(&staged.nodes_path, &staged.edges_path)
        .await
        .unwrap();
    assert_eq!(outcome.nodes_created, 1);
}

#[tokio::test]
async fn exhausted_retries_surface_as_unavailable() {
    let staging = tempdir().unwrap();
    let (nodes, edges) = single_file_graph();
    let staged = GraphStager::new(staging.path())
        .stage(&nodes, &edges, "down")
        .await
        .unwrap();

    let store = Arc::new(FlakyStore::new(10));
    let err = BulkLoader::new(store)
        .with_retry(RetryPolicy::immediate(3))
        .bulk_load(&staged.nodes_path, &staged.edges_path)
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::StoreUnavailable(_)));
}
