use crate::error::{GraphError, Result};
use crate::retry::RetryPolicy;
use crate::store::GraphStore;
use insight_parser::{EdgeType, GraphEdge, GraphNode, NodeType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Totals for one bulk load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
    pub edges_skipped: usize,
    /// Staged lines that did not decode
    pub malformed: usize,
}

/// Streams staged JSONL into a [`GraphStore`].
///
/// All nodes are written before any edge so edge endpoints resolve. Within a
/// batch, records are grouped by type and each group is written concurrently.
pub struct BulkLoader {
    store: Arc<dyn GraphStore>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl BulkLoader {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn bulk_load(&self, nodes_path: &Path, edges_path: &Path) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::default();

        let mut nodes = JsonlBatches::<GraphNode>::open(nodes_path).await?;
        while let Some(batch) = nodes.next_batch(self.batch_size).await? {
            self.write_nodes(batch, &mut outcome).await?;
        }
        outcome.malformed += nodes.malformed;

        let mut edges = JsonlBatches::<GraphEdge>::open(edges_path).await?;
        while let Some(batch) = edges.next_batch(self.batch_size).await? {
            self.write_edges(batch, &mut outcome).await?;
        }
        outcome.malformed += edges.malformed;

        if outcome.malformed > 0 {
            log::warn!("Skipped {} malformed staged records", outcome.malformed);
        }
        log::info!(
            "Loaded graph: {} nodes created, {} updated, {} edges created, {} skipped",
            outcome.nodes_created,
            outcome.nodes_updated,
            outcome.edges_created,
            outcome.edges_skipped
        );
        Ok(outcome)
    }

    async fn write_nodes(&self, batch: Vec<GraphNode>, outcome: &mut LoadOutcome) -> Result<()> {
        let mut groups: BTreeMap<NodeType, Vec<GraphNode>> = BTreeMap::new();
        for node in batch {
            groups.entry(node.node_type).or_default().push(node);
        }

        let mut tasks = JoinSet::new();
        for (node_type, group) in groups {
            let store = Arc::clone(&self.store);
            let retry = self.retry;
            tasks.spawn(async move {
                let label = format!("upsert {} nodes", node_type.as_str());
                retry
                    .run(&label, GraphError::is_retryable, || {
                        store.upsert_nodes(node_type, group.clone())
                    })
                    .await
                    .map_err(unavailable)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let write = joined.map_err(|err| GraphError::StoreUnavailable(err.to_string()))??;
            outcome.nodes_created += write.created;
            outcome.nodes_updated += write.updated;
        }
        Ok(())
    }

    async fn write_edges(&self, batch: Vec<GraphEdge>, outcome: &mut LoadOutcome) -> Result<()> {
        let mut groups: BTreeMap<EdgeType, Vec<GraphEdge>> = BTreeMap::new();
        for edge in batch {
            groups.entry(edge.edge_type).or_default().push(edge);
        }

        let mut tasks = JoinSet::new();
        for (edge_type, group) in groups {
            let store = Arc::clone(&self.store);
            let retry = self.retry;
            tasks.spawn(async move {
                let label = format!("create {} edges", edge_type.as_str());
                retry
                    .run(&label, GraphError::is_retryable, || {
                        store.create_edges(edge_type, group.clone())
                    })
                    .await
                    .map_err(unavailable)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let write = joined.map_err(|err| GraphError::StoreUnavailable(err.to_string()))??;
            outcome.edges_created += write.created;
            outcome.edges_existing += write.existing;
            outcome.edges_skipped += write.skipped;
        }
        Ok(())
    }
}

fn unavailable(err: GraphError) -> GraphError {
    match err {
        GraphError::StoreWrite(message) => GraphError::StoreUnavailable(message),
        other => other,
    }
}

struct JsonlBatches<T> {
    lines: tokio::io::Lines<BufReader<tokio::fs::File>>,
    malformed: usize,
    _record: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> JsonlBatches<T> {
    async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await.map_err(|err| {
            GraphError::Staging(format!("open {}: {err}", path.display()))
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            malformed: 0,
            _record: std::marker::PhantomData,
        })
    }

    async fn next_batch(&mut self, size: usize) -> Result<Option<Vec<T>>> {
        let mut batch = Vec::with_capacity(size.min(DEFAULT_BATCH_SIZE));
        while batch.len() < size {
            let Some(line) = self.lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => batch.push(record),
                Err(err) => {
                    log::debug!("Malformed staged record: {err}");
                    self.malformed += 1;
                }
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}
