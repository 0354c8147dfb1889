//! # Insight Graph
//!
//! Persistence side of the code graph: staging, bulk loading, traversal and
//! commit-keyed snapshots.
//!
//! ## Architecture
//!
//! ```text
//! RepositoryGraph (insight-parser)
//!     │
//!     ├──> GraphStager
//!     │      └─ {staging_dir}/{analysis_id}/graph_nodes.jsonl + graph_edges.jsonl
//!     │
//!     ├──> BulkLoader
//!     │      ├─ nodes first, then edges
//!     │      ├─ batches grouped by type, one task per group
//!     │      └─ RetryPolicy on transient write failures
//!     │
//!     ├──> GraphStore (MemoryGraphStore on petgraph)
//!     │      └─ reachable / file_degree traversals
//!     │
//!     └──> SnapshotManager
//!            └─ one valid GraphSnapshot per commit
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use insight_graph::{BulkLoader, GraphStager, MemoryGraphStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> insight_graph::Result<()> {
//! let graph = insight_parser::parse_repository(std::path::Path::new("."))?;
//! let staged = GraphStager::new("/tmp/staging")
//!     .stage(&graph.nodes, &graph.edges, "analysis-1")
//!     .await?;
//! let loader = BulkLoader::new(Arc::new(MemoryGraphStore::new()));
//! let outcome = loader.bulk_load(&staged.nodes_path, &staged.edges_path).await?;
//! println!("{} nodes created", outcome.nodes_created);
//! # Ok(())
//! # }
//! ```

mod error;
mod loader;
mod retry;
mod snapshot;
mod stager;
mod store;
mod traversal;

pub use error::{GraphError, Result};
pub use loader::{BulkLoader, LoadOutcome, DEFAULT_BATCH_SIZE};
pub use retry::RetryPolicy;
pub use snapshot::{SnapshotCreated, SnapshotDraft, SnapshotManager};
pub use stager::{GraphStager, StagedGraph, EDGES_FILE, NODES_FILE};
pub use store::{Direction, EdgeWrite, GraphStore, MemoryGraphStore, NodeWrite};
pub use traversal::{file_degree, reachable, Degree, Reached};
