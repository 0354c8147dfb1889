use crate::error::{GraphError, Result};
use fs2::FileExt;
use insight_parser::{GraphEdge, GraphNode};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const NODES_FILE: &str = "graph_nodes.jsonl";
pub const EDGES_FILE: &str = "graph_edges.jsonl";
const LOCK_FILE: &str = ".stage.lock";

/// Location and size of one staged graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedGraph {
    pub analysis_id: String,
    pub nodes_path: PathBuf,
    pub edges_path: PathBuf,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Writes parsed graphs as line-delimited JSON for the bulk loader.
///
/// Each analysis gets its own directory; re-staging the same analysis
/// replaces its files.
#[derive(Debug, Clone)]
pub struct GraphStager {
    staging_dir: PathBuf,
}

impl GraphStager {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Directory holding the staged files of `analysis_id`
    pub fn staged_dir(&self, analysis_id: &str) -> PathBuf {
        self.staging_dir.join(safe_component(analysis_id))
    }

    pub async fn stage(
        &self,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
        analysis_id: &str,
    ) -> Result<StagedGraph> {
        let dir = self.staged_dir(analysis_id);
        tokio::fs::create_dir_all(&dir).await?;

        let node_lines = to_lines(nodes)?;
        let edge_lines = to_lines(edges)?;
        let staged = StagedGraph {
            analysis_id: analysis_id.to_string(),
            nodes_path: dir.join(NODES_FILE),
            edges_path: dir.join(EDGES_FILE),
            node_count: nodes.len(),
            edge_count: edges.len(),
        };

        let lock_path = dir.join(LOCK_FILE);
        let nodes_path = staged.nodes_path.clone();
        let edges_path = staged.edges_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let lock = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            lock.lock_exclusive().map_err(|err| {
                GraphError::Staging(format!("acquire {}: {err}", lock_path.display()))
            })?;
            let written =
                write_atomic(&nodes_path, &node_lines).and_then(|_| write_atomic(&edges_path, &edge_lines));
            let _ = lock.unlock();
            written
        })
        .await
        .map_err(|err| GraphError::Staging(format!("join staging task: {err}")))??;

        log::debug!(
            "Staged {} nodes and {} edges for {analysis_id}",
            staged.node_count,
            staged.edge_count
        );
        Ok(staged)
    }
}

fn to_lines<T: Serialize>(records: &[T]) -> Result<Vec<String>> {
    records
        .iter()
        .map(|record| serde_json::to_string(record).map_err(GraphError::from))
        .collect()
}

fn write_atomic(path: &Path, lines: &[String]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut out = BufWriter::new(std::fs::File::create(&tmp)?);
        for line in lines {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

pub(crate) fn safe_component(raw: &str) -> String {
    let out: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    match out.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => out,
    }
}
