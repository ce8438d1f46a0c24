//! Entity merge service (C7): redirect relations, filter self-loops,
//! deduplicate edges, merge descriptions, union source chunk ids (§4.7).
//!
//! The transaction shape is collect, mutate a working set, then persist:
//! validate the merge sources, redirect relations onto the target,
//! dedupe and merge in memory, and only then issue the deletes and
//! upserts against storage.

use kgrag_core::error::{KgError, Result};
use kgrag_core::ids::{normalize_entity_name, ProjectId};
use kgrag_core::prelude::{GraphStorage, VectorStorage};
use kgrag_core::types::{push_source_chunk_id, Entity, Relation};
use kgrag_observability::{EventContext, MergeCompletedFields};
use kgrag_providers::capability::LLMCapability;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionMergeStrategy {
    Concatenate,
    KeepFirst,
    KeepLongest,
    LlmSummarize,
}

/// Merges a set of descriptions per the configured strategy. `LlmSummarize`
/// has no synchronous fallback path here — callers needing the LLM variant
/// use [`MergeService::merge_descriptions_async`], which falls back to
/// `Concatenate` on LLM failure.
#[must_use]
pub fn merge_descriptions(descriptions: &[String], strategy: DescriptionMergeStrategy) -> String {
    let non_empty: Vec<&String> = descriptions.iter().filter(|d| !d.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return String::new();
    }
    match strategy {
        DescriptionMergeStrategy::KeepFirst => non_empty[0].clone(),
        DescriptionMergeStrategy::KeepLongest => non_empty
            .iter()
            .max_by_key(|d| d.chars().count())
            .map(|d| (*d).clone())
            .unwrap_or_default(),
        DescriptionMergeStrategy::Concatenate | DescriptionMergeStrategy::LlmSummarize => {
            let mut seen = std::collections::HashSet::new();
            let mut parts = Vec::new();
            for d in non_empty {
                if seen.insert(d.as_str()) {
                    parts.push(d.clone());
                }
            }
            parts.join(" | ")
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub sources: usize,
    pub relations_redirected: usize,
    pub relations_deduped: usize,
    pub self_loops_filtered: usize,
}

pub struct MergeService {
    graph: Arc<dyn GraphStorage>,
    vector: Arc<dyn VectorStorage>,
    llm: Option<Arc<dyn LLMCapability>>,
}

impl MergeService {
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStorage>, vector: Arc<dyn VectorStorage>) -> Self {
        Self {
            graph,
            vector,
            llm: None,
        }
    }

    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LLMCapability>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Merges `sources` into `target` (§4.7). Steps 1-7 operate on an
    /// in-memory working set; step 8 is the single point where storage is
    /// mutated, so a storage-layer transaction wrapping this call makes
    /// the whole operation all-or-nothing.
    pub async fn merge(
        &self,
        project_id: ProjectId,
        sources: &[String],
        target: &str,
        strategy: DescriptionMergeStrategy,
    ) -> Result<MergeReport> {
        self.validate_sources(project_id, sources, target).await?;

        let mut source_entities = Vec::with_capacity(sources.len());
        for name in sources {
            if let Some(e) = self.graph.get_entity(project_id, name).await? {
                source_entities.push(e);
            }
        }

        let target_entity = self.graph.get_entity(project_id, target).await?;

        let mut touched: HashMap<String, Relation> = HashMap::new();
        let mut relations_redirected = 0u64;
        let mut self_loops_filtered = 0u64;

        for source in sources {
            for relation in self.graph.get_relations_for_entity(project_id, source).await? {
                relations_redirected += 1;
                let mut redirected = relation;
                if normalize_entity_name(&redirected.src_id) == normalize_entity_name(source) {
                    redirected.src_id = target.to_string();
                }
                if normalize_entity_name(&redirected.tgt_id) == normalize_entity_name(source) {
                    redirected.tgt_id = target.to_string();
                }

                if normalize_entity_name(&redirected.src_id) == normalize_entity_name(&redirected.tgt_id) {
                    self_loops_filtered += 1;
                    continue;
                }

                let key = format!(
                    "{}\u{0}{}",
                    normalize_entity_name(&redirected.src_id),
                    normalize_entity_name(&redirected.tgt_id)
                );

                touched
                    .entry(key)
                    .and_modify(|existing| {
                        existing.weight += redirected.weight;
                        for kw in &redirected.keywords {
                            if !existing.keywords.contains(kw) {
                                existing.keywords.push(kw.clone());
                            }
                        }
                        existing.description = merge_descriptions(
                            &[existing.description.clone(), redirected.description.clone()],
                            strategy,
                        );
                        for id in &redirected.source_chunk_ids {
                            push_source_chunk_id(&mut existing.source_chunk_ids, id.clone());
                        }
                    })
                    .or_insert(redirected);
            }
        }

        let relations_deduped = relations_redirected.saturating_sub(touched.len() as u64 + self_loops_filtered);

        let mut descriptions: Vec<String> = source_entities.iter().map(|e| e.description.clone()).collect();
        if let Some(t) = &target_entity {
            descriptions.insert(0, t.description.clone());
        }

        let merged_description = if strategy == DescriptionMergeStrategy::LlmSummarize {
            self.merge_descriptions_async(&descriptions).await
        } else {
            merge_descriptions(&descriptions, strategy)
        };

        let mut merged_target = target_entity.unwrap_or_else(|| {
            Entity::new(
                project_id,
                target,
                source_entities
                    .first()
                    .map(|e| e.entity_type.clone())
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
            )
        });
        merged_target.description = merged_description;
        for source in &source_entities {
            for id in &source.source_chunk_ids {
                push_source_chunk_id(&mut merged_target.source_chunk_ids, id.clone());
            }
        }

        // Step 8: delete sources and their entity embeddings, upsert merged
        // target and redirected relations.
        for name in sources {
            self.graph.delete_entity(project_id, name).await?;
        }
        self.vector.delete_entity_embeddings(project_id, sources).await?;
        self.graph.upsert_entity(merged_target).await?;
        self.graph
            .upsert_relations(touched.into_values().collect())
            .await?;

        kgrag_observability::merge_completed(
            &EventContext::new("merge.merge").with_project(project_id),
            MergeCompletedFields {
                sources: sources.len(),
                relations_redirected: relations_redirected as usize,
                relations_deduped: relations_deduped as usize,
                self_loops_filtered: self_loops_filtered as usize,
            },
        );

        Ok(MergeReport {
            sources: sources.len(),
            relations_redirected: relations_redirected as usize,
            relations_deduped: relations_deduped as usize,
            self_loops_filtered: self_loops_filtered as usize,
        })
    }

    async fn validate_sources(&self, project_id: ProjectId, sources: &[String], target: &str) -> Result<()> {
        if sources.is_empty() {
            return Err(KgError::MergeValidation {
                message: "merge requires at least one source entity".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for name in sources {
            let key = normalize_entity_name(name);
            if !seen.insert(key.clone()) {
                return Err(KgError::MergeValidation {
                    message: format!("duplicate source entity: {name}"),
                });
            }
            if key == normalize_entity_name(target) {
                return Err(KgError::MergeValidation {
                    message: format!("source entity {name} is the same as target {target}"),
                });
            }
            if self.graph.get_entity(project_id, name).await?.is_none() {
                return Err(KgError::MergeValidation {
                    message: format!("source entity does not exist: {name}"),
                });
            }
        }
        Ok(())
    }

    async fn merge_descriptions_async(&self, descriptions: &[String]) -> String {
        let Some(llm) = &self.llm else {
            return merge_descriptions(descriptions, DescriptionMergeStrategy::Concatenate);
        };
        let joined = descriptions
            .iter()
            .filter(|d| !d.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if joined.is_empty() {
            return String::new();
        }
        let system = "Synthesize the following descriptions of the same entity into one concise unified description.";
        match llm.complete(system, &joined, &Default::default()).await {
            Ok(output) => output.text,
            Err(err) => {
                warn!(error = %err, "LLM_SUMMARIZE failed, falling back to CONCATENATE");
                merge_descriptions(descriptions, DescriptionMergeStrategy::Concatenate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgrag_core::traits::storage::{MockGraphStorage, MockVectorStorage};

    fn entity(project_id: ProjectId, name: &str, description: &str) -> Entity {
        let mut e = Entity::new(project_id, name, "ORGANIZATION");
        e.description = description.to_string();
        e
    }

    fn relation(project_id: ProjectId, src: &str, tgt: &str, description: &str, weight: f32) -> Relation {
        Relation {
            project_id,
            src_id: src.to_string(),
            tgt_id: tgt.to_string(),
            description: description.to_string(),
            keywords: Vec::new(),
            weight,
            source_chunk_ids: Vec::new(),
        }
    }

    /// Merging "AI" into "Artificial Intelligence" must not leave a
    /// self-loop behind the redirected `(AI, Artificial Intelligence,
    /// "same")` relation, and must delete the source entity plus its
    /// embedding rather than leaving it dangling.
    #[tokio::test]
    async fn merge_prevents_self_loop_and_deletes_source() {
        let project_id = ProjectId::new();

        let mut graph = MockGraphStorage::new();
        graph
            .expect_get_entity()
            .withf(move |_, name| name == "AI")
            .returning(move |pid, _| Ok(Some(entity(pid, "AI", "an abbreviation"))));
        graph
            .expect_get_entity()
            .withf(move |_, name| name == "Artificial Intelligence")
            .returning(move |pid, _| Ok(Some(entity(pid, "Artificial Intelligence", "a field of study"))));
        graph.expect_get_relations_for_entity().withf(move |_, name| name == "AI").returning(move |pid, _| {
            Ok(vec![
                relation(pid, "AI", "Artificial Intelligence", "same", 1.0),
                relation(pid, "Artificial Intelligence", "ML", "includes", 1.0),
            ])
        });

        graph
            .expect_delete_entity()
            .withf(move |_, name| name == "AI")
            .times(1)
            .returning(|_, _| Ok(()));

        graph.expect_upsert_entity().times(1).returning(|_| Ok(()));
        graph
            .expect_upsert_relations()
            .withf(|relations: &Vec<Relation>| {
                relations.len() == 1
                    && relations[0].src_id == "Artificial Intelligence"
                    && relations[0].tgt_id == "ML"
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut vector = MockVectorStorage::new();
        vector
            .expect_delete_entity_embeddings()
            .withf(|_, names: &[String]| names == ["AI".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));

        let service = MergeService::new(Arc::new(graph), Arc::new(vector));
        let report = service
            .merge(project_id, &["AI".to_string()], "Artificial Intelligence", DescriptionMergeStrategy::Concatenate)
            .await
            .unwrap();

        assert_eq!(report.sources, 1);
        assert_eq!(report.self_loops_filtered, 1);
        assert_eq!(report.relations_redirected, 2);
    }

    #[test]
    fn concatenate_dedupes_and_joins() {
        let result = merge_descriptions(
            &["a".to_string(), "b".to_string(), "a".to_string()],
            DescriptionMergeStrategy::Concatenate,
        );
        assert_eq!(result, "a | b");
    }

    #[test]
    fn keep_first_skips_empty() {
        let result = merge_descriptions(
            &["".to_string(), "first".to_string(), "second".to_string()],
            DescriptionMergeStrategy::KeepFirst,
        );
        assert_eq!(result, "first");
    }

    #[test]
    fn keep_longest_picks_max_length() {
        let result = merge_descriptions(
            &["short".to_string(), "a much longer description".to_string()],
            DescriptionMergeStrategy::KeepLongest,
        );
        assert_eq!(result, "a much longer description");
    }

    #[test]
    fn all_empty_yields_empty_string() {
        let result = merge_descriptions(&["".to_string(), "   ".to_string()], DescriptionMergeStrategy::Concatenate);
        assert_eq!(result, "");
    }
}
