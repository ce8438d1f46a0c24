//! Backend-agnostic level-by-level BFS (§4.2 `traverseBFS`,
//! `findShortestPath`). Each backend supplies a `fetch_neighbors`
//! closure that batches one round-trip per level; this function owns the
//! visited-set, depth/node bounds, and the deterministic
//! (ascending-by-name) ordering within a level.

use kgrag_core::error::Result;
use kgrag_core::traits::storage::TraversalStep;
use kgrag_core::types::Entity;
use std::collections::HashMap;
use std::future::Future;

/// One entity's outgoing+incoming neighbors: `(neighbor_entity,
/// relation_label)`, unordered — this function sorts them.
pub type NeighborMap = HashMap<String, Vec<(Entity, String)>>;

/// Runs BFS from `start_name`, emitting the start entity itself as the
/// depth-0 step. `max_nodes == 0` means unlimited; otherwise traversal
/// stops once that many nodes (including the start node) have been
/// visited. Neighbor order within a level is deterministic ascending by
/// neighbor name, regardless of what order the backend returns rows in.
/// Returns an empty result if `start_name` does not resolve to an entity.
pub async fn run_bfs<F, Fut, G, GFut>(
    start_name: &str,
    max_depth: usize,
    max_nodes: usize,
    mut fetch_neighbors: F,
    fetch_start: G,
) -> Result<Vec<TraversalStep>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<NeighborMap>>,
    G: FnOnce(&str) -> GFut,
    GFut: Future<Output = Result<Option<Entity>>>,
{
    let Some(start_entity) = fetch_start(start_name).await? else {
        return Ok(Vec::new());
    };

    let mut visited = std::collections::HashSet::new();
    visited.insert(start_entity.normalized_key());

    let mut steps = vec![TraversalStep {
        entity: start_entity,
        depth: 0,
        via_relation: String::new(),
    }];
    let mut frontier = vec![start_name.to_string()];
    let mut depth = 0usize;

    let within_node_budget = |count: usize| max_nodes == 0 || count < max_nodes;

    while !frontier.is_empty() && depth < max_depth {
        if !within_node_budget(visited.len()) {
            break;
        }
        let neighbor_map = fetch_neighbors(frontier.clone()).await?;
        depth += 1;

        let mut level_entities: Vec<(Entity, String)> = Vec::new();
        for name in &frontier {
            if let Some(neighbors) = neighbor_map.get(name) {
                for (entity, relation) in neighbors {
                    let key = entity.normalized_key();
                    if visited.contains(&key) {
                        continue;
                    }
                    level_entities.push((entity.clone(), relation.clone()));
                }
            }
        }

        level_entities.sort_by(|a, b| a.0.entity_name.cmp(&b.0.entity_name));
        level_entities.dedup_by(|a, b| a.0.normalized_key() == b.0.normalized_key());

        let mut next_frontier = Vec::new();
        for (entity, relation) in level_entities {
            if !within_node_budget(visited.len()) {
                break;
            }
            let key = entity.normalized_key();
            if !visited.insert(key) {
                continue;
            }
            next_frontier.push(entity.entity_name.clone());
            steps.push(TraversalStep {
                entity,
                depth,
                via_relation: relation,
            });
        }
        frontier = next_frontier;
    }

    Ok(steps)
}

/// Shortest path by unweighted BFS; ties broken by lexicographic
/// neighbor order (inherited from [`run_bfs`]'s sort). Returns the path
/// of entity names from `src` to `tgt` inclusive, or `None` if
/// unreachable within the search.
pub async fn shortest_path<F, Fut>(
    src: &str,
    tgt: &str,
    max_depth: usize,
    mut fetch_neighbors: F,
) -> Result<Option<Vec<String>>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<NeighborMap>>,
{
    let tgt_key = kgrag_core::ids::normalize_entity_name(tgt);
    if kgrag_core::ids::normalize_entity_name(src) == tgt_key {
        return Ok(Some(vec![src.to_string()]));
    }

    let mut visited = std::collections::HashSet::new();
    visited.insert(kgrag_core::ids::normalize_entity_name(src));
    let mut parent: HashMap<String, String> = HashMap::new();
    let mut frontier = vec![src.to_string()];
    let mut depth = 0usize;

    while !frontier.is_empty() && depth < max_depth {
        let neighbor_map = fetch_neighbors(frontier.clone()).await?;
        depth += 1;
        let mut next_frontier = Vec::new();

        let mut ordered_pairs: Vec<(String, String)> = Vec::new();
        for name in &frontier {
            if let Some(neighbors) = neighbor_map.get(name) {
                for (entity, _relation) in neighbors {
                    ordered_pairs.push((name.clone(), entity.entity_name.clone()));
                }
            }
        }
        ordered_pairs.sort_by(|a, b| a.1.cmp(&b.1));

        for (from, to) in ordered_pairs {
            let key = kgrag_core::ids::normalize_entity_name(&to);
            if !visited.insert(key.clone()) {
                continue;
            }
            parent.insert(to.clone(), from);
            if key == tgt_key {
                let mut path = vec![to.clone()];
                let mut cursor = to;
                while let Some(p) = parent.get(&cursor) {
                    path.push(p.clone());
                    cursor = p.clone();
                    if cursor == src {
                        path.push(src.to_string());
                        break;
                    }
                }
                path.reverse();
                return Ok(Some(path));
            }
            next_frontier.push(to);
        }
        frontier = next_frontier;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgrag_core::ids::ProjectId;

    fn entity(name: &str) -> Entity {
        Entity::new(ProjectId::new(), name, "NODE")
    }

    /// Linear graph A -> B -> C -> D -> E, each neighbor map built fresh
    /// per call from a fixed adjacency table.
    fn adjacency() -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::from([
            ("A", vec!["B"]),
            ("B", vec!["C"]),
            ("C", vec!["D"]),
            ("D", vec!["E"]),
            ("E", vec![]),
        ])
    }

    #[tokio::test]
    async fn bfs_depth_bound() {
        let adj = adjacency();
        let steps = run_bfs(
            "A",
            2,
            0,
            |frontier| {
                let adj = adj.clone();
                async move {
                    let mut map = NeighborMap::new();
                    for name in frontier {
                        let neighbors = adj
                            .get(name.as_str())
                            .map(|ns| ns.iter().map(|n| (entity(n), "next".to_string())).collect())
                            .unwrap_or_default();
                        map.insert(name, neighbors);
                    }
                    Ok(map)
                }
            },
            |name| {
                let name = name.to_string();
                async move { Ok(Some(entity(&name))) }
            },
        )
        .await
        .unwrap();

        let names: Vec<String> = steps.iter().map(|s| s.entity.entity_name.clone()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(steps[0].depth, 0);
        assert_eq!(steps[1].depth, 1);
        assert_eq!(steps[2].depth, 2);
    }

    #[tokio::test]
    async fn bfs_node_cap() {
        let adj = adjacency();
        let steps = run_bfs(
            "A",
            10,
            3,
            |frontier| {
                let adj = adj.clone();
                async move {
                    let mut map = NeighborMap::new();
                    for name in frontier {
                        let neighbors = adj
                            .get(name.as_str())
                            .map(|ns| ns.iter().map(|n| (entity(n), "next".to_string())).collect())
                            .unwrap_or_default();
                        map.insert(name, neighbors);
                    }
                    Ok(map)
                }
            },
            |name| {
                let name = name.to_string();
                async move { Ok(Some(entity(&name))) }
            },
        )
        .await
        .unwrap();

        // max_nodes=3 includes the start node (A), so 2 more may be visited.
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].entity.entity_name, "A");
        assert_eq!(steps[1].entity.entity_name, "B");
        assert_eq!(steps[2].entity.entity_name, "C");
    }
}
