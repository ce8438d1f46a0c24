//! `GraphStorage` over a per-project Postgres schema. Traversal reuses
//! [`crate::common::bfs::run_bfs`]/`shortest_path`, fetching one level's
//! neighbors per round trip via a single `IN (...)`-style query against
//! both `src_id` and `tgt_id`.

use async_trait::async_trait;
use kgrag_core::error::{ErrorKind, KgError, Result};
use kgrag_core::ids::{normalize_entity_name, ProjectId};
use kgrag_core::traits::storage::{GraphStats, GraphStorage, TraversalStep};
use kgrag_core::types::{merge_entity_descriptions, push_source_chunk_id, Entity, Relation};
use std::collections::HashMap;
use tokio_postgres::Row;

use super::pool::DistributedPool;
use super::schema::{create_schema_ddl, drop_schema_ddl, validate_namespace};

pub struct DistributedGraphStorage {
    pool: DistributedPool,
}

impl DistributedGraphStorage {
    #[must_use]
    pub fn new(pool: DistributedPool) -> Self {
        Self { pool }
    }

    fn namespace(project_id: ProjectId) -> Result<String> {
        let ns = project_id.graph_namespace();
        validate_namespace(&ns)?;
        Ok(ns)
    }
}

fn row_to_entity(row: &Row, project_id: ProjectId) -> Entity {
    Entity {
        project_id,
        entity_name: row.get("entity_name"),
        entity_type: row.get("entity_type"),
        description: row.get("description"),
        source_chunk_ids: row.get("source_chunk_ids"),
    }
}

fn row_to_relation(row: &Row, project_id: ProjectId) -> Relation {
    Relation {
        project_id,
        src_id: row.get("src_id"),
        tgt_id: row.get("tgt_id"),
        description: row.get("description"),
        keywords: row.get("keywords"),
        weight: row.get("weight"),
        source_chunk_ids: row.get("source_chunk_ids"),
    }
}

#[async_trait]
impl GraphStorage for DistributedGraphStorage {
    async fn create_project_graph(&self, project_id: ProjectId) -> Result<()> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        client
            .batch_execute(&create_schema_ddl(&ns))
            .await
            .map_err(|e| {
                KgError::storage(ErrorKind::TransientStorage, format!("create schema: {e}"))
            })?;
        client
            .execute(
                "INSERT INTO project_graphs (project_id, namespace) VALUES ($1, $2)
                 ON CONFLICT (project_id) DO NOTHING",
                &[&project_id.as_uuid(), &ns],
            )
            .await
            .map_err(|e| {
                KgError::storage(ErrorKind::TransientStorage, format!("register project: {e}"))
            })?;
        Ok(())
    }

    async fn delete_project_graph(&self, project_id: ProjectId) -> Result<()> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        client.batch_execute(&drop_schema_ddl(&ns)).await.map_err(|e| {
            KgError::storage(ErrorKind::TransientStorage, format!("drop schema: {e}"))
        })?;
        client
            .execute(
                "DELETE FROM project_graphs WHERE project_id = $1",
                &[&project_id.as_uuid()],
            )
            .await
            .map_err(|e| {
                KgError::storage(ErrorKind::TransientStorage, format!("deregister project: {e}"))
            })?;
        Ok(())
    }

    async fn graph_exists(&self, project_id: ProjectId) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM project_graphs WHERE project_id = $1",
                &[&project_id.as_uuid()],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(row.is_some())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<()> {
        self.upsert_entities(vec![entity]).await
    }

    async fn upsert_entities(&self, entities: Vec<Entity>) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let project_id = entities[0].project_id;
        let ns = Self::namespace(project_id)?;
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

        for entity in entities {
            let normalized = normalize_entity_name(&entity.entity_name);
            let select_sql = format!(
                r#"SELECT description, source_chunk_ids FROM "{ns}".entities WHERE normalized_name = $1"#
            );
            let existing = tx
                .query_opt(&select_sql, &[&normalized])
                .await
                .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

            let (description, mut source_chunk_ids) = match &existing {
                Some(row) => {
                    let desc: String = row.get("description");
                    let ids: Vec<String> = row.get("source_chunk_ids");
                    (
                        merge_entity_descriptions(&desc, &entity.description),
                        ids,
                    )
                }
                None => (entity.description.clone(), Vec::new()),
            };
            for id in &entity.source_chunk_ids {
                push_source_chunk_id(&mut source_chunk_ids, id.clone());
            }

            let upsert_sql = format!(
                r#"INSERT INTO "{ns}".entities
                   (normalized_name, entity_name, entity_type, description, source_chunk_ids)
                   VALUES ($1, $2, $3, $4, $5)
                   ON CONFLICT (normalized_name) DO UPDATE SET
                       description = EXCLUDED.description,
                       source_chunk_ids = EXCLUDED.source_chunk_ids"#
            );
            tx.execute(
                &upsert_sql,
                &[
                    &normalized,
                    &entity.entity_name,
                    &entity.entity_type,
                    &description,
                    &source_chunk_ids,
                ],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn upsert_relation(&self, relation: Relation) -> Result<()> {
        self.upsert_relations(vec![relation]).await
    }

    async fn upsert_relations(&self, relations: Vec<Relation>) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        let project_id = relations[0].project_id;
        let ns = Self::namespace(project_id)?;
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

        for relation in relations {
            if relation.is_self_loop() {
                return Err(KgError::MergeValidation {
                    message: format!("self-loop relation rejected: {}", relation.src_id),
                });
            }
            let norm_src = normalize_entity_name(&relation.src_id);
            let norm_tgt = normalize_entity_name(&relation.tgt_id);

            let select_sql = format!(
                r#"SELECT description, keywords, weight, source_chunk_ids FROM "{ns}".relations
                   WHERE normalized_src = $1 AND normalized_tgt = $2"#
            );
            let existing = tx
                .query_opt(&select_sql, &[&norm_src, &norm_tgt])
                .await
                .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

            let (description, mut keywords, weight, mut source_chunk_ids) = match &existing {
                Some(row) => {
                    let desc: String = row.get("description");
                    let kw: Vec<String> = row.get("keywords");
                    let w: f32 = row.get("weight");
                    let ids: Vec<String> = row.get("source_chunk_ids");
                    (
                        merge_entity_descriptions(&desc, &relation.description),
                        kw,
                        w + relation.weight,
                        ids,
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

            let upsert_sql = format!(
                r#"INSERT INTO "{ns}".relations
                   (normalized_src, normalized_tgt, src_id, tgt_id, description, keywords, weight, source_chunk_ids)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                   ON CONFLICT (normalized_src, normalized_tgt) DO UPDATE SET
                       description = EXCLUDED.description,
                       keywords = EXCLUDED.keywords,
                       weight = EXCLUDED.weight,
                       source_chunk_ids = EXCLUDED.source_chunk_ids"#
            );
            tx.execute(
                &upsert_sql,
                &[
                    &norm_src,
                    &norm_tgt,
                    &relation.src_id,
                    &relation.tgt_id,
                    &description,
                    &keywords,
                    &weight,
                    &source_chunk_ids,
                ],
            )
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn get_entity(&self, project_id: ProjectId, name: &str) -> Result<Option<Entity>> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let sql = format!(r#"SELECT * FROM "{ns}".entities WHERE normalized_name = $1"#);
        let row = client
            .query_opt(&sql, &[&normalize_entity_name(name)])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(row.map(|r| row_to_entity(&r, project_id)))
    }

    async fn delete_entity(&self, project_id: ProjectId, name: &str) -> Result<()> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let normalized = normalize_entity_name(name);
        let del_relations = format!(
            r#"DELETE FROM "{ns}".relations WHERE normalized_src = $1 OR normalized_tgt = $1"#
        );
        client
            .execute(&del_relations, &[&normalized])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        let del_entity = format!(r#"DELETE FROM "{ns}".entities WHERE normalized_name = $1"#);
        client
            .execute(&del_entity, &[&normalized])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(())
    }

    async fn get_entities(&self, project_id: ProjectId, names: &[String]) -> Result<Vec<Entity>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let normalized: Vec<String> = names.iter().map(|n| normalize_entity_name(n)).collect();
        let sql = format!(r#"SELECT * FROM "{ns}".entities WHERE normalized_name = ANY($1)"#);
        let rows = client
            .query(&sql, &[&normalized])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(rows.iter().map(|r| row_to_entity(r, project_id)).collect())
    }

    async fn get_node_degrees_batch(
        &self,
        project_id: ProjectId,
        names: &[String],
    ) -> Result<Vec<(String, u32)>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let normalized: Vec<String> = names.iter().map(|n| normalize_entity_name(n)).collect();
        let sql = format!(
            r#"SELECT normalized_src AS name, count(*) AS degree FROM "{ns}".relations
               WHERE normalized_src = ANY($1) GROUP BY normalized_src
               UNION ALL
               SELECT normalized_tgt AS name, count(*) AS degree FROM "{ns}".relations
               WHERE normalized_tgt = ANY($1) GROUP BY normalized_tgt"#
        );
        let rows = client
            .query(&sql, &[&normalized])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

        let mut degrees: HashMap<String, u32> = names.iter().map(|n| (n.clone(), 0)).collect();
        let by_norm: HashMap<String, String> = names
            .iter()
            .map(|n| (normalize_entity_name(n), n.clone()))
            .collect();
        for row in rows {
            let norm: String = row.get("name");
            let degree: i64 = row.get("degree");
            if let Some(orig) = by_norm.get(&norm) {
                *degrees.entry(orig.clone()).or_insert(0) += degree as u32;
            }
        }
        Ok(degrees.into_iter().collect())
    }

    async fn get_relations_for_entity(
        &self,
        project_id: ProjectId,
        name: &str,
    ) -> Result<Vec<Relation>> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let sql = format!(
            r#"SELECT * FROM "{ns}".relations WHERE normalized_src = $1 OR normalized_tgt = $1"#
        );
        let rows = client
            .query(&sql, &[&normalize_entity_name(name)])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(rows.iter().map(|r| row_to_relation(r, project_id)).collect())
    }

    async fn traverse_bfs(
        &self,
        project_id: ProjectId,
        start_name: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<Vec<TraversalStep>> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;

        crate::common::bfs::run_bfs(
            start_name,
            max_depth,
            max_nodes,
            |frontier| {
                let client = &client;
                let ns = ns.clone();
                async move { fetch_neighbors(client, &ns, project_id, &frontier).await }
            },
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
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;

        crate::common::bfs::shortest_path(src, tgt, 64, |frontier| {
            let client = &client;
            let ns = ns.clone();
            async move { fetch_neighbors(client, &ns, project_id, &frontier).await }
        })
        .await
    }

    async fn delete_by_source_id(&self, project_id: ProjectId, source_id: &str) -> Result<u64> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let del_entities = format!(
            r#"DELETE FROM "{ns}".entities WHERE $1 = ANY(source_chunk_ids)"#
        );
        let del_relations = format!(
            r#"DELETE FROM "{ns}".relations WHERE $1 = ANY(source_chunk_ids)"#
        );
        let a = client
            .execute(&del_entities, &[&source_id])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        let b = client
            .execute(&del_relations, &[&source_id])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        Ok(a + b)
    }

    async fn get_stats(&self, project_id: ProjectId) -> Result<GraphStats> {
        let ns = Self::namespace(project_id)?;
        let client = self.pool.get().await?;
        let sql = format!(
            r#"SELECT
                 (SELECT count(*) FROM "{ns}".entities) AS entity_count,
                 (SELECT count(*) FROM "{ns}".relations) AS relation_count"#
        );
        let row = client
            .query_one(&sql, &[])
            .await
            .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;
        let entity_count: i64 = row.get("entity_count");
        let relation_count: i64 = row.get("relation_count");
        Ok(GraphStats {
            entity_count: entity_count as u64,
            relation_count: relation_count as u64,
        })
    }
}

/// One round trip per BFS level: every relation touching any name in
/// `frontier`, joined back to the neighbor entity row.
async fn fetch_neighbors(
    client: &deadpool_postgres::Client,
    ns: &str,
    project_id: ProjectId,
    frontier: &[String],
) -> Result<crate::common::bfs::NeighborMap> {
    let normalized: Vec<String> = frontier.iter().map(|n| normalize_entity_name(n)).collect();
    let sql = format!(
        r#"SELECT r.normalized_src, r.normalized_tgt, r.description AS relation_label,
                  e.entity_name, e.entity_type, e.description, e.source_chunk_ids
           FROM "{ns}".relations r
           JOIN "{ns}".entities e ON e.normalized_name =
               CASE WHEN r.normalized_src = ANY($1) THEN r.normalized_tgt ELSE r.normalized_src END
           WHERE r.normalized_src = ANY($1) OR r.normalized_tgt = ANY($1)"#
    );
    let rows = client
        .query(&sql, &[&normalized])
        .await
        .map_err(|e| KgError::storage(ErrorKind::TransientStorage, e.to_string()))?;

    let by_norm: HashMap<String, String> = frontier
        .iter()
        .map(|n| (normalize_entity_name(n), n.clone()))
        .collect();

    let mut map = crate::common::bfs::NeighborMap::new();
    for row in rows {
        let norm_src: String = row.get("normalized_src");
        let norm_tgt: String = row.get("normalized_tgt");
        let relation_label: String = row.get("relation_label");
        if norm_src == norm_tgt {
            continue;
        }
        let origin = if by_norm.contains_key(&norm_src) {
            &norm_src
        } else {
            &norm_tgt
        };
        let Some(original_name) = by_norm.get(origin) else {
            continue;
        };
        let entity = Entity {
            project_id,
            entity_name: row.get("entity_name"),
            entity_type: row.get("entity_type"),
            description: row.get("description"),
            source_chunk_ids: row.get("source_chunk_ids"),
        };
        map.entry(original_name.clone())
            .or_default()
            .push((entity, relation_label));
    }
    Ok(map)
}
