use async_trait::async_trait;
use insight_graph::{Direction, EdgeWrite, GraphError, GraphStore, NodeWrite};
use insight_parser::{EdgeType, GraphEdge, GraphNode, NodeType};
use insight_pipeline::{ErrorClass, Pipeline, PipelineConfig, PipelineServices, RunRequest, RunStatus};
use serde_json::Value;
use std::sync::Arc;

/// Refuses every call
struct DownGraphStore;

fn down<T>() -> insight_graph::Result<T> {
    Err(GraphError::StoreUnavailable("connection refused".to_string()))
}

#[async_trait]
impl GraphStore for DownGraphStore {
    async fn upsert_nodes(&self, _: NodeType, _: Vec<GraphNode>) -> insight_graph::Result<NodeWrite> {
        down()
    }

    async fn create_edges(&self, _: EdgeType, _: Vec<GraphEdge>) -> insight_graph::Result<EdgeWrite> {
        down()
    }

    async fn find_nodes(&self, _: &str, _: &Value) -> insight_graph::Result<Vec<GraphNode>> {
        down()
    }

    async fn get_node(&self, _: &str) -> insight_graph::Result<Option<GraphNode>> {
        down()
    }

    async fn edges_of(&self, _: &str, _: Direction) -> insight_graph::Result<Vec<GraphEdge>> {
        down()
    }

    async fn node_count(&self) -> insight_graph::Result<usize> {
        down()
    }

    async fn edge_count(&self) -> insight_graph::Result<usize> {
        down()
    }

    async fn health_check(&self) -> insight_graph::Result<()> {
        down()
    }
}

#[tokio::test]
async fn unreachable_graph_store_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.py"), "def main():\n    pass\n").unwrap();

    let mut services = PipelineServices::in_memory().unwrap().with_tools(Vec::new());
    services.graph = Arc::new(DownGraphStore);
    let mut config = PipelineConfig::default();
    config.data_dir = Some(dir.path().join("data"));

    let report = Pipeline::new(config, services)
        .run(RunRequest::new(dir.path()))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    let fatal = report.fatal_error.unwrap();
    assert_eq!(fatal.class, ErrorClass::StoreUnavailable);
    assert!(fatal.message.contains("connection refused"));
    assert!(report.groups.is_empty());
    assert_eq!(
        report.stats.error_counts.get(&ErrorClass::StoreUnavailable),
        Some(&1)
    );
}
