use crate::error::Result;
use crate::store::{Direction, GraphStore};
use insight_parser::{EdgeType, GraphNode};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Node reached during a traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reached {
    pub id: String,
    pub depth: usize,
}

/// Breadth-first walk over edges of the given types.
///
/// The visited set makes cycles safe; the start node is not reported.
/// Results are ordered by depth, then id.
pub async fn reachable(
    store: &dyn GraphStore,
    start: &str,
    edge_types: &[EdgeType],
    direction: Direction,
    max_depth: usize,
) -> Result<Vec<Reached>> {
    let mut visited = HashSet::from([start.to_string()]);
    let mut queue = VecDeque::from([(start.to_string(), 0usize)]);
    let mut result = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for edge in store.edges_of(&current, direction).await? {
            if !edge_types.contains(&edge.edge_type) {
                continue;
            }
            let next = match direction {
                Direction::Outgoing => edge.to_id,
                Direction::Incoming => edge.from_id,
            };
            if visited.insert(next.clone()) {
                result.push(Reached {
                    id: next.clone(),
                    depth: depth + 1,
                });
                queue.push_back((next, depth + 1));
            }
        }
    }

    result.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
    Ok(result)
}

/// Connectivity of a file and the symbols it contains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degree {
    pub incoming: usize,
    pub outgoing: usize,
}

impl Degree {
    pub fn total(&self) -> usize {
        self.incoming + self.outgoing
    }
}

/// Edges of the given types that cross the boundary of a file.
///
/// The file node and everything it contains (transitively) count as one unit,
/// so a method calling a sibling in the same file adds nothing.
pub async fn file_degree(
    store: &dyn GraphStore,
    file_path: &str,
    edge_types: &[EdgeType],
) -> Result<Option<Degree>> {
    let file_id = GraphNode::file_id(file_path);
    if store.get_node(&file_id).await?.is_none() {
        return Ok(None);
    }

    let mut members: HashSet<String> = reachable(
        store,
        &file_id,
        &[EdgeType::Contains],
        Direction::Outgoing,
        usize::MAX,
    )
    .await?
    .into_iter()
    .map(|r| r.id)
    .collect();
    members.insert(file_id);

    let mut degree = Degree::default();
    let mut ordered: Vec<&String> = members.iter().collect();
    ordered.sort();
    for member in ordered {
        for edge in store.edges_of(member, Direction::Outgoing).await? {
            if edge_types.contains(&edge.edge_type) && !members.contains(&edge.to_id) {
                degree.outgoing += 1;
            }
        }
        for edge in store.edges_of(member, Direction::Incoming).await? {
            if edge_types.contains(&edge.edge_type) && !members.contains(&edge.from_id) {
                degree.incoming += 1;
            }
        }
    }
    Ok(Some(degree))
}
