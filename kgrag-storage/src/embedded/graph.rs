//! `GraphStorage` over the embedded single-file database. Traversal reuses
//! [`crate::common::bfs`] exactly as the distributed backend does, with
//! `fetch_neighbors` issuing one query per level against the shared
//! connection instead of a pooled one.

use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::{normalize_entity_name, ProjectId};
use kgrag_core::traits::storage::{GraphStats, GraphStorage, TraversalStep};
use kgrag_core::types::{merge_entity_descriptions, push_source_chunk_id, Entity, Relation};

use super::pool::EmbeddedPool;

pub struct EmbeddedGraphStorage {
    pool: EmbeddedPool,
}

impl EmbeddedGraphStorage {
    #[must_use]
    pub fn new(pool: EmbeddedPool) -> Self {
        Self { pool }
    }
}

fn encode_ids(ids: &[String]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

fn decode_ids(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn map_sql_err(e: libsql::Error) -> KgError {
    KgError::storage(ErrorKind::TransientStorage, e.to_string())
}

#[async_trait]
impl GraphStorage for EmbeddedGraphStorage {
    async fn create_project_graph(&self, project_id: ProjectId) -> Result<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO project_graphs (project_id, namespace) VALUES (?1, ?2)
             ON CONFLICT (project_id) DO NOTHING",
            libsql::params![project_id.to_string(), project_id.graph_namespace()],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn delete_project_graph(&self, project_id: ProjectId) -> Result<()> {
        let conn = self.pool.lock().await;
        let pid = project_id.to_string();
        conn.execute("DELETE FROM entities WHERE project_id = ?1", libsql::params![pid.clone()])
            .await
            .map_err(map_sql_err)?;
        conn.execute("DELETE FROM relations WHERE project_id = ?1", libsql::params![pid.clone()])
            .await
            .map_err(map_sql_err)?;
        conn.execute(
            "DELETE FROM project_graphs WHERE project_id = ?1",
            libsql::params![pid],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn graph_exists(&self, project_id: ProjectId) -> Result<bool> {
        let conn = self.pool.lock().await;
        let mut rows = conn
            .query(
                "SELECT 1 FROM project_graphs WHERE project_id = ?1",
                libsql::params![project_id.to_string()],
            )
            .await
            .map_err(map_sql_err)?;
        Ok(rows.next().await.map_err(map_sql_err)?.is_some())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<()> {
        self.upsert_entities(vec![entity]).await
    }

    async fn upsert_entities(&self, entities: Vec<Entity>) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let conn = self.pool.lock().await;
        let tx = conn.transaction().await.map_err(map_sql_err)?;
        for entity in entities {
            let pid = entity.project_id.to_string();
            let normalized = normalize_entity_name(&entity.entity_name);
            let mut rows = tx
                .query(
                    "SELECT description, source_chunk_ids FROM entities
                     WHERE project_id = ?1 AND normalized_name = ?2",
                    libsql::params![pid.clone(), normalized.clone()],
                )
                .await
                .map_err(map_sql_err)?;
            let existing = rows.next().await.map_err(map_sql_err)?;

            let (description, mut source_chunk_ids) = match &existing {
                Some(row) => {
                    let desc: String = row.get(0).map_err(map_sql_err)?;
                    let ids_raw: String = row.get(1).map_err(map_sql_err)?;
                    (
                        merge_entity_descriptions(&desc, &entity.description),
                        decode_ids(&ids_raw),
                    )
                }
                None => (entity.description.clone(), Vec::new()),
            };
            for id in &entity.source_chunk_ids {
                push_source_chunk_id(&mut source_chunk_ids, id.clone());
            }

            tx.execute(
                "INSERT INTO entities (project_id, normalized_name, entity_name, entity_type, description, source_chunk_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (project_id, normalized_name) DO UPDATE SET
                     description = excluded.description,
                     source_chunk_ids = excluded.source_chunk_ids",
                libsql::params![
                    pid,
                    normalized,
                    entity.entity_name.clone(),
                    entity.entity_type.clone(),
                    description,
                    encode_ids(&source_chunk_ids),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        }
        tx.commit().await.map_err(map_sql_err)?;
        Ok(())
    }

    async fn upsert_relation(&self, relation: Relation) -> Result<()> {
        self.upsert_relations(vec![relation]).await
    }

    async fn upsert_relations(&self, relations: Vec<Relation>) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        let conn = self.pool.lock().await;
        let tx = conn.transaction().await.map_err(map_sql_err)?;
        for relation in relations {
            if relation.is_self_loop() {
                return Err(KgError::MergeValidation {
                    message: format!("self-loop relation rejected: {}", relation.src_id),
                });
            }
            let pid = relation.project_id.to_string();
            let norm_src = normalize_entity_name(&relation.src_id);
            let norm_tgt = normalize_entity_name(&relation.tgt_id);

            let mut rows = tx
                .query(
                    "SELECT description, keywords, weight, source_chunk_ids FROM relations
                     WHERE project_id = ?1 AND normalized_src = ?2 AND normalized_tgt = ?3",
                    libsql::params![pid.clone(), norm_src.clone(), norm_tgt.clone()],
                )
                .await
                .map_err(map_sql_err)?;
            let existing = rows.next().await.map_err(map_sql_err)?;

            let (description, mut keywords, weight, mut source_chunk_ids) = match &existing {
                Some(row) => {
                    let desc: String = row.get(0).map_err(map_sql_err)?;
                    let kw_raw: String = row.get(1).map_err(map_sql_err)?;
                    let w: f64 = row.get(2).map_err(map_sql_err)?;
                    let ids_raw: String = row.get(3).map_err(map_sql_err)?;
                    (
                        merge_entity_descriptions(&desc, &relation.description),
                        decode_ids(&kw_raw),
                        w as f32 + relation.weight,
                        decode_ids(&ids_raw),
                    )
                }
                None => (
                    relation.description.clone(),
                    Vec::new(),
                    relation.weight,
                    Vec::new(),
                ),
            };
            for kw in &relation.keywords {
                if !keywords.contains(kw) {
                    keywords.push(kw.clone());
                }
            }
            for id in &relation.source_chunk_ids {
                push_source_chunk_id(&mut source_chunk_ids, id.clone());
            }

            tx.execute(
                "INSERT INTO relations (project_id, normalized_src, normalized_tgt, src_id, tgt_id, description, keywords, weight, source_chunk_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (project_id, normalized_src, normalized_tgt) DO UPDATE SET
                     description = excluded.description,
                     keywords = excluded.keywords,
                     weight = excluded.weight,
                     source_chunk_ids = excluded.source_chunk_ids",
                libsql::params![
                    pid,
                    norm_src,
                    norm_tgt,
                    relation.src_id.clone(),
                    relation.tgt_id.clone(),
                    description,
                    encode_ids(&keywords),
                    f64::from(weight),
                    encode_ids(&source_chunk_ids),
                ],
            )
            .await
            .map_err(map_sql_err)?;
        }
        tx.commit().await.map_err(map_sql_err)?;
        Ok(())
    }

    async fn get_entity(&self, project_id: ProjectId, name: &str) -> Result<Option<Entity>> {
        let conn = self.pool.lock().await;
        let mut rows = conn
            .query(
                "SELECT entity_name, entity_type, description, source_chunk_ids FROM entities
                 WHERE project_id = ?1 AND normalized_name = ?2",
                libsql::params![project_id.to_string(), normalize_entity_name(name)],
            )
            .await
            .map_err(map_sql_err)?;
        let Some(row) = rows.next().await.map_err(map_sql_err)? else {
            return Ok(None);
        };
        Ok(Some(Entity {
            project_id,
            entity_name: row.get(0).map_err(map_sql_err)?,
            entity_type: row.get(1).map_err(map_sql_err)?,
            description: row.get(2).map_err(map_sql_err)?,
            source_chunk_ids: decode_ids(&row.get::<String>(3).map_err(map_sql_err)?),
        }))
    }

    async fn get_entities(&self, project_id: ProjectId, names: &[String]) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if let Some(entity) = self.get_entity(project_id, name).await? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    async fn delete_entity(&self, project_id: ProjectId, name: &str) -> Result<()> {
        let conn = self.pool.lock().await;
        let pid = project_id.to_string();
        let normalized = normalize_entity_name(name);
        conn.execute(
            "DELETE FROM relations WHERE project_id = ?1 AND (normalized_src = ?2 OR normalized_tgt = ?2)",
            libsql::params![pid.clone(), normalized.clone()],
        )
        .await
        .map_err(map_sql_err)?;
        conn.execute(
            "DELETE FROM entities WHERE project_id = ?1 AND normalized_name = ?2",
            libsql::params![pid, normalized],
        )
        .await
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn get_node_degrees_batch(
        &self,
        project_id: ProjectId,
        names: &[String],
    ) -> Result<Vec<(String, u32)>> {
        let conn = self.pool.lock().await;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let normalized = normalize_entity_name(name);
            let mut rows = conn
                .query(
                    "SELECT count(*) FROM relations
                     WHERE project_id = ?1 AND (normalized_src = ?2 OR normalized_tgt = ?2)",
                    libsql::params![project_id.to_string(), normalized],
                )
                .await
                .map_err(map_sql_err)?;
            let degree: i64 = rows
                .next()
                .await
                .map_err(map_sql_err)?
                .map(|r| r.get(0))
                .transpose()
                .map_err(map_sql_err)?
                .unwrap_or(0);
            out.push((name.clone(), degree as u32));
        }
        Ok(out)
    }

    async fn get_relations_for_entity(
        &self,
        project_id: ProjectId,
        name: &str,
    ) -> Result<Vec<Relation>> {
        let conn = self.pool.lock().await;
        let normalized = normalize_entity_name(name);
        let mut rows = conn
            .query(
                "SELECT src_id, tgt_id, description, keywords, weight, source_chunk_ids FROM relations
                 WHERE project_id = ?1 AND (normalized_src = ?2 OR normalized_tgt = ?2)",
                libsql::params![project_id.to_string(), normalized],
            )
            .await
            .map_err(map_sql_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql_err)? {
            let weight: f64 = row.get(4).map_err(map_sql_err)?;
            out.push(Relation {
                project_id,
                src_id: row.get(0).map_err(map_sql_err)?,
                tgt_id: row.get(1).map_err(map_sql_err)?,
                description: row.get(2).map_err(map_sql_err)?,
                keywords: decode_ids(&row.get::<String>(3).map_err(map_sql_err)?),
                weight: weight as f32,
                source_chunk_ids: decode_ids(&row.get::<String>(5).map_err(map_sql_err)?),
            });
        }
        Ok(out)
    }

    async fn traverse_bfs(
        &self,
        project_id: ProjectId,
        start_name: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Vec<TraversalStep>> {
        crate::common::bfs::run_bfs(
            start_name,
            max_depth,
            max_nodes,
            |frontier| async move { self.fetch_neighbors(project_id, &frontier).await },
            |name| self.get_entity(project_id, name),
        )
        .await
    }

    async fn find_shortest_path(
        &self,
        project_id: ProjectId,
        src: &str,
        tgt: &str,
    ) -> Result<Option<Vec<String>>> {
        crate::common::bfs::shortest_path(src, tgt, 64, |frontier| async move {
            self.fetch_neighbors(project_id, &frontier).await
        })
        .await
    }

    async fn delete_by_source_id(&self, project_id: ProjectId, source_id: &str) -> Result<u64> {
        let conn = self.pool.lock().await;
        let pid = project_id.to_string();
        let mut rows = conn
            .query(
                "SELECT normalized_name, source_chunk_ids FROM entities WHERE project_id = ?1",
                libsql::params![pid.clone()],
            )
            .await
            .map_err(map_sql_err)?;
        let mut entity_keys_to_delete = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql_err)? {
            let key: String = row.get(0).map_err(map_sql_err)?;
            let ids: String = row.get(1).map_err(map_sql_err)?;
            if decode_ids(&ids).iter().any(|id| id == source_id) {
                entity_keys_to_delete.push(key);
            }
        }
        let mut n = 0u64;
        for key in entity_keys_to_delete {
            conn.execute(
                "DELETE FROM entities WHERE project_id = ?1 AND normalized_name = ?2",
                libsql::params![pid.clone(), key],
            )
            .await
            .map_err(map_sql_err)?;
            n += 1;
        }

        let mut rel_rows = conn
            .query(
                "SELECT normalized_src, normalized_tgt, source_chunk_ids FROM relations WHERE project_id = ?1",
                libsql::params![pid.clone()],
            )
            .await
            .map_err(map_sql_err)?;
        let mut relation_keys_to_delete = Vec::new();
        while let Some(row) = rel_rows.next().await.map_err(map_sql_err)? {
            let src: String = row.get(0).map_err(map_sql_err)?;
            let tgt: String = row.get(1).map_err(map_sql_err)?;
            let ids: String = row.get(2).map_err(map_sql_err)?;
            if decode_ids(&ids).iter().any(|id| id == source_id) {
                relation_keys_to_delete.push((src, tgt));
            }
        }
        for (src, tgt) in relation_keys_to_delete {
            conn.execute(
                "DELETE FROM relations WHERE project_id = ?1 AND normalized_src = ?2 AND normalized_tgt = ?3",
                libsql::params![pid.clone(), src, tgt],
            )
            .await
            .map_err(map_sql_err)?;
            n += 1;
        }
        Ok(n)
    }

    async fn get_stats(&self, project_id: ProjectId) -> Result<GraphStats> {
        let conn = self.pool.lock().await;
        let pid = project_id.to_string();
        let mut entity_rows = conn
            .query(
                "SELECT count(*) FROM entities WHERE project_id = ?1",
                libsql::params![pid.clone()],
            )
            .await
            .map_err(map_sql_err)?;
        let entity_count: i64 = entity_rows
            .next()
            .await
            .map_err(map_sql_err)?
            .map(|r| r.get(0))
            .transpose()
            .map_err(map_sql_err)?
            .unwrap_or(0);

        let mut relation_rows = conn
            .query(
                "SELECT count(*) FROM relations WHERE project_id = ?1",
                libsql::params![pid],
            )
            .await
            .map_err(map_sql_err)?;
        let relation_count: i64 = relation_rows
            .next()
            .await
            .map_err(map_sql_err)?
            .map(|r| r.get(0))
            .transpose()
            .map_err(map_sql_err)?
            .unwrap_or(0);

        Ok(GraphStats {
            entity_count: entity_count as u64,
            relation_count: relation_count as u64,
        })
    }
}

impl EmbeddedGraphStorage {
    async fn fetch_neighbors(
        &self,
        project_id: ProjectId,
        frontier: &[String],
    ) -> Result<crate::common::bfs::NeighborMap> {
        let conn = self.pool.lock().await;
        let pid = project_id.to_string();
        let mut map = crate::common::bfs::NeighborMap::new();

        for name in frontier {
            let normalized = normalize_entity_name(name);
            let mut rows = conn
                .query(
                    "SELECT normalized_src, normalized_tgt, description FROM relations
                     WHERE project_id = ?1 AND (normalized_src = ?2 OR normalized_tgt = ?2)",
                    libsql::params![pid.clone(), normalized.clone()],
                )
                .await
                .map_err(map_sql_err)?;

            let mut neighbor_keys = Vec::new();
            while let Some(row) = rows.next().await.map_err(map_sql_err)? {
                let norm_src: String = row.get(0).map_err(map_sql_err)?;
                let norm_tgt: String = row.get(1).map_err(map_sql_err)?;
                let relation_label: String = row.get(2).map_err(map_sql_err)?;
                if norm_src == norm_tgt {
                    continue;
                }
                let other = if norm_src == normalized { norm_tgt } else { norm_src };
                neighbor_keys.push((other, relation_label));
            }

            let mut neighbors = Vec::new();
            for (other_normalized, relation_label) in neighbor_keys {
                let mut entity_rows = conn
                    .query(
                        "SELECT entity_name, entity_type, description, source_chunk_ids FROM entities
                         WHERE project_id = ?1 AND normalized_name = ?2",
                        libsql::params![pid.clone(), other_normalized],
                    )
                    .await
                    .map_err(map_sql_err)?;
                if let Some(row) = entity_rows.next().await.map_err(map_sql_err)? {
                    neighbors.push((
                        Entity {
                            project_id,
                            entity_name: row.get(0).map_err(map_sql_err)?,
                            entity_type: row.get(1).map_err(map_sql_err)?,
                            description: row.get(2).map_err(map_sql_err)?,
                            source_chunk_ids: decode_ids(&row.get::<String>(3).map_err(map_sql_err)?),
                        },
                        relation_label,
                    ));
                }
            }
            map.insert(name.clone(), neighbors);
        }
        Ok(map)
    }
}
