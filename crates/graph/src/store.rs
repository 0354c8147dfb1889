use crate::error::{GraphError, Result};
use async_trait::async_trait;
use insight_parser::{EdgeType, GraphEdge, GraphNode, NodeType};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Edge direction relative to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl From<Direction> for petgraph::Direction {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Outgoing => petgraph::Direction::Outgoing,
            Direction::Incoming => petgraph::Direction::Incoming,
        }
    }
}

/// Outcome of one node batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeWrite {
    pub created: usize,
    pub updated: usize,
}

/// Outcome of one edge batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeWrite {
    pub created: usize,
    /// Already present under the same (from, to, type)
    pub existing: usize,
    /// An endpoint is missing from the store
    pub skipped: usize,
}

/// Graph database port.
///
/// Writes are batched and typed: every call carries records of a single
/// node or edge type. Node writes are upserts keyed by id.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_nodes(&self, node_type: NodeType, nodes: Vec<GraphNode>) -> Result<NodeWrite>;

    async fn create_edges(&self, edge_type: EdgeType, edges: Vec<GraphEdge>) -> Result<EdgeWrite>;

    /// Nodes whose `property` equals `value`. Top-level fields (`id`, `path`,
    /// `type`, `language`) are checked first, then attributes.
    async fn find_nodes(&self, property: &str, value: &Value) -> Result<Vec<GraphNode>>;

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    async fn edges_of(&self, id: &str, direction: Direction) -> Result<Vec<GraphEdge>>;

    async fn node_count(&self) -> Result<usize>;

    async fn edge_count(&self) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
    edge_keys: HashSet<(String, String, EdgeType)>,
}

/// In-process graph store backed by petgraph.
///
/// Nodes live in an adjacency structure addressed by id, so call cycles are
/// plain edges rather than owning references.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn node_property(node: &GraphNode, property: &str) -> Option<Value> {
    match property {
        "id" => Some(Value::from(node.id.as_str())),
        "path" => Some(Value::from(node.path.as_str())),
        "type" => Some(Value::from(node.node_type.as_str())),
        "language" => Some(Value::from(node.language.as_str())),
        other => node.attributes.get(other).cloned(),
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_nodes(&self, node_type: NodeType, nodes: Vec<GraphNode>) -> Result<NodeWrite> {
        let mut inner = self.inner.write().await;
        let mut outcome = NodeWrite::default();
        for node in nodes {
            if node.node_type != node_type {
                return Err(GraphError::InvalidBatch(format!(
                    "node {} has type {} in a {} batch",
                    node.id,
                    node.node_type.as_str(),
                    node_type.as_str()
                )));
            }
            match inner.index.get(&node.id).copied() {
                Some(idx) => {
                    if let Some(existing) = inner.graph.node_weight_mut(idx) {
                        *existing = node;
                    }
                    outcome.updated += 1;
                }
                None => {
                    let id = node.id.clone();
                    let idx = inner.graph.add_node(node);
                    inner.index.insert(id, idx);
                    outcome.created += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn create_edges(&self, edge_type: EdgeType, edges: Vec<GraphEdge>) -> Result<EdgeWrite> {
        let mut inner = self.inner.write().await;
        let mut outcome = EdgeWrite::default();
        for edge in edges {
            if edge.edge_type != edge_type {
                return Err(GraphError::InvalidBatch(format!(
                    "edge {} -> {} has type {} in a {} batch",
                    edge.from_id,
                    edge.to_id,
                    edge.edge_type.as_str(),
                    edge_type.as_str()
                )));
            }
            let (Some(from), Some(to)) = (
                inner.index.get(&edge.from_id).copied(),
                inner.index.get(&edge.to_id).copied(),
            ) else {
                outcome.skipped += 1;
                continue;
            };
            let key = (edge.from_id.clone(), edge.to_id.clone(), edge.edge_type);
            if !inner.edge_keys.insert(key) {
                outcome.existing += 1;
                continue;
            }
            inner.graph.add_edge(from, to, edge);
            outcome.created += 1;
        }
        Ok(outcome)
    }

    async fn find_nodes(&self, property: &str, value: &Value) -> Result<Vec<GraphNode>> {
        let inner = self.inner.read().await;
        if property == "id" {
            let found = value
                .as_str()
                .and_then(|id| inner.index.get(id))
                .and_then(|idx| inner.graph.node_weight(*idx))
                .cloned();
            return Ok(found.into_iter().collect());
        }
        let mut found: Vec<GraphNode> = inner
            .graph
            .node_weights()
            .filter(|node| node_property(node, property).as_ref() == Some(value))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .get(id)
            .and_then(|idx| inner.graph.node_weight(*idx))
            .cloned())
    }

    async fn edges_of(&self, id: &str, direction: Direction) -> Result<Vec<GraphEdge>> {
        let inner = self.inner.read().await;
        let Some(idx) = inner.index.get(id).copied() else {
            return Ok(Vec::new());
        };
        let mut edges: Vec<GraphEdge> = inner
            .graph
            .edges_directed(idx, direction.into())
            .map(|e| e.weight().clone())
            .collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(edges)
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.graph.node_count())
    }

    async fn edge_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.graph.edge_count())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use crate::retry::RetryPolicy;

    fn node(id: &str, node_type: NodeType, path: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            node_type,
            path: path.to_string(),
            language: "python".to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = MemoryGraphStore::new();
        let nodes = vec![
            node("file:a.py", NodeType::File, "a.py"),
            node("file:b.py", NodeType::File, "b.py"),
        ];
        let first = store.upsert_nodes(NodeType::File, nodes.clone()).await.unwrap();
        let second = store.upsert_nodes(NodeType::File, nodes).await.unwrap();

        assert_eq!(first, NodeWrite { created: 2, updated: 0 });
        assert_eq!(second, NodeWrite { created: 0, updated: 2 });
        assert_eq!(store.node_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn edges_need_both_endpoints() {
        let store = MemoryGraphStore::new();
        store
            .upsert_nodes(
                NodeType::Function,
                vec![
                    node("func:a.py:f", NodeType::Function, "a.py"),
                    node("func:a.py:g", NodeType::Function, "a.py"),
                ],
            )
            .await
            .unwrap();

        let outcome = store
            .create_edges(
                EdgeType::Calls,
                vec![
                    GraphEdge::new("func:a.py:f", "func:a.py:g", EdgeType::Calls),
                    GraphEdge::new("func:a.py:g", "func:a.py:f", EdgeType::Calls),
                    GraphEdge::new("func:a.py:f", "func:missing", EdgeType::Calls),
                    GraphEdge::new("func:a.py:f", "func:a.py:g", EdgeType::Calls),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EdgeWrite {
                created: 2,
                existing: 1,
                skipped: 1
            }
        );
        let incoming = store.edges_of("func:a.py:g", Direction::Incoming).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].from_id, "func:a.py:f");
    }

    #[tokio::test]
    async fn mixed_type_batch_is_rejected_without_retry() {
        let store = MemoryGraphStore::new();
        let err = store
            .upsert_nodes(NodeType::File, vec![node("func:a.py:f", NodeType::Function, "a.py")])
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidBatch(_)));
        assert!(!err.is_retryable());

        let attempts = std::sync::atomic::AtomicU32::new(0);
        let edge = GraphEdge::new("file:a.py", "func:a.py:f", EdgeType::Calls);
        let result = RetryPolicy::immediate(3)
            .run("mixed edges", GraphError::is_retryable, || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                store.create_edges(EdgeType::Contains, vec![edge.clone()])
            })
            .await;
        assert!(matches!(result, Err(GraphError::InvalidBatch(_))));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.node_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_nodes_by_field_and_attribute() {
        let store = MemoryGraphStore::new();
        let mut file = node("file:a.py", NodeType::File, "a.py");
        file.attributes.insert("loc".into(), Value::from(12));
        store.upsert_nodes(NodeType::File, vec![file]).await.unwrap();
        store
            .upsert_nodes(
                NodeType::Function,
                vec![node("func:a.py:f", NodeType::Function, "a.py")],
            )
            .await
            .unwrap();

        let by_path = store.find_nodes("path", &Value::from("a.py")).await.unwrap();
        assert_eq!(by_path.len(), 2);
        let by_loc = store.find_nodes("loc", &Value::from(12)).await.unwrap();
        assert_eq!(by_loc.len(), 1);
        let by_id = store.find_nodes("id", &Value::from("func:a.py:f")).await.unwrap();
        assert_eq!(by_id[0].node_type, NodeType::Function);
    }
}
