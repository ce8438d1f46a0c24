//! Entity resolver / deduper (C6): multi-metric similarity, type-aware
//! blocking, connected-component clustering, cluster merging (§4.6).
//!
//! Candidates are scored with a weighted multi-metric mix and kept once
//! they clear a cutoff threshold, then folded into connected components
//! over an undirected similarity graph so resolution is transitive.

mod metrics;

pub use metrics::{acronym_match, containment, jaccard, normalized_edit_similarity, tokenize};

use crate::extraction::ExtractedEntity;
use kgrag_core::error::{KgError, Result};
use kgrag_core::ids::normalize_entity_name;
use kgrag_core::types::{Entity, MergeCluster};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Similarity metric weights (§4.6). MUST sum to 1.0 within tolerance
/// 0.01 — validated at construction, not at call time.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityWeights {
    pub jaccard: f64,
    pub containment: f64,
    pub edit: f64,
    pub acronym: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        // Containment dominates the blend: nested organization names (e.g.
        // "Warren Home" inside "Warren State Home and Training School")
        // differ mostly by token count, not by edit distance or Jaccard
        // overlap, so a jaccard/edit-heavy mix under-scores exactly the
        // pairs the resolver exists to catch.
        Self {
            jaccard: 0.13,
            containment: 0.62,
            edit: 0.15,
            acronym: 0.10,
        }
    }
}

impl SimilarityWeights {
    /// Validates `|sum(weights) - 1.0| <= 0.01` (§8 testable property).
    pub fn validate(&self) -> Result<()> {
        let sum = self.jaccard + self.containment + self.edit + self.acronym;
        if (sum - 1.0).abs() > 0.01 {
            return Err(KgError::ResolutionConfig {
                message: format!("similarity weights must sum to 1.0 (+/- 0.01), got {sum}"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub weights: SimilarityWeights,
    pub max_aliases: usize,
    pub parallel_threads: usize,
    pub batch_size: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.75,
            weights: SimilarityWeights::default(),
            max_aliases: 5,
            parallel_threads: 4,
            batch_size: 200,
        }
    }
}

impl ResolutionConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(KgError::ResolutionConfig {
                message: format!("threshold must be in [0, 1], got {}", self.threshold),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub clusters_formed: usize,
    pub singletons: usize,
    pub entities_in: usize,
}

/// Computes the combined similarity score between two already-tokenized
/// names under the configured weight mix.
fn similarity(a: &str, b: &str, tokens_a: &HashSet<String>, tokens_b: &HashSet<String>, weights: &SimilarityWeights) -> f64 {
    weights.jaccard * jaccard(tokens_a, tokens_b)
        + weights.containment * containment(tokens_a, tokens_b)
        + weights.edit * normalized_edit_similarity(a, b)
        + weights.acronym * f64::from(u8::from(acronym_match(a, b)))
}

/// Cheap pre-filter (§4.6 step 3): skip the heavy metrics when length
/// ratio diverges too far, or when neither name could possibly contain
/// the other's tokens.
fn may_be_similar(a: &str, b: &str, tokens_a: &HashSet<String>, tokens_b: &HashSet<String>) -> bool {
    let (la, lb) = (a.chars().count().max(1), b.chars().count().max(1));
    let len_ratio = (la as f64 - lb as f64).abs() / la.max(lb) as f64;
    if len_ratio > 0.5 {
        let first_a = a.split_whitespace().next();
        let first_b = b.split_whitespace().next();
        if first_a != first_b && tokens_a.is_disjoint(tokens_b) {
            return false;
        }
    }
    true
}

/// Union-find over entity indices, used to build connected components
/// from the pairwise similarity graph.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Resolves a batch of raw extracted entities into canonical clusters.
///
/// Blocks by `entity_type` (step 1), scores pairs within each block (step
/// 2), builds an undirected similarity graph with an edge where
/// `sim >= threshold` and takes connected components as clusters (step
/// 4) — transitive merges are therefore possible even between two
/// members that individually score below threshold. Canonical selection
/// (step 5) picks the longest description, ties broken lexicographically.
pub struct EntityResolver {
    config: ResolutionConfig,
}

impl EntityResolver {
    pub fn new(config: ResolutionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Returns the resolved clusters plus a raw-name -> canonical-name map.
    pub fn resolve(
        &self,
        raw_entities: &[ExtractedEntity],
    ) -> (Vec<MergeCluster>, HashMap<String, String>, ResolutionReport) {
        if raw_entities.is_empty() {
            return (
                Vec::new(),
                HashMap::new(),
                ResolutionReport {
                    clusters_formed: 0,
                    singletons: 0,
                    entities_in: 0,
                },
            );
        }

        if !self.config.enabled {
            // Feature toggle off: every entity is its own singleton cluster so
            // extraction output still reaches persistence, just unmerged.
            let clusters: Vec<MergeCluster> = raw_entities
                .iter()
                .map(|raw| MergeCluster {
                    canonical_name: raw.name.clone(),
                    aliases: Vec::new(),
                    members: vec![{
                        let mut e = Entity::new(
                            kgrag_core::ids::ProjectId::new(),
                            raw.name.clone(),
                            raw.entity_type.clone(),
                        );
                        e.description = raw.description.clone();
                        e
                    }],
                    merged_description: raw.description.clone(),
                })
                .collect();
            let map = raw_entities
                .iter()
                .map(|raw| (raw.name.clone(), raw.name.clone()))
                .collect();
            return (
                clusters,
                map,
                ResolutionReport {
                    clusters_formed: raw_entities.len(),
                    singletons: raw_entities.len(),
                    entities_in: raw_entities.len(),
                },
            );
        }

        // Step 1: block by entity_type.
        let mut blocks: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, e) in raw_entities.iter().enumerate() {
            blocks.entry(e.entity_type.as_str()).or_default().push(idx);
        }

        let tokens: Vec<HashSet<String>> = raw_entities.iter().map(|e| tokenize(&e.name)).collect();
        let mut uf = UnionFind::new(raw_entities.len());

        for (_type, members) in &blocks {
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    let (ia, ib) = (members[i], members[j]);
                    let (a, b) = (&raw_entities[ia].name, &raw_entities[ib].name);
                    if !may_be_similar(a, b, &tokens[ia], &tokens[ib]) {
                        continue;
                    }
                    let sim = similarity(a, b, &tokens[ia], &tokens[ib], &self.config.weights);
                    if sim >= self.config.threshold {
                        uf.union(ia, ib);
                    }
                }
            }
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for idx in 0..raw_entities.len() {
            let root = uf.find(idx);
            components.entry(root).or_default().push(idx);
        }

        let mut clusters = Vec::new();
        let mut raw_to_canonical = HashMap::new();
        let mut singletons = 0;

        for members_idx in components.values() {
            let entities: Vec<Entity> = members_idx
                .iter()
                .map(|&i| {
                    let raw = &raw_entities[i];
                    let mut e = Entity::new(
                        kgrag_core::ids::ProjectId::new(),
                        raw.name.clone(),
                        raw.entity_type.clone(),
                    );
                    e.description = raw.description.clone();
                    e
                })
                .collect();

            if entities.len() == 1 {
                singletons += 1;
            }

            // Step 5: canonical = longest description, ties by lexicographic name.
            let canonical = entities
                .iter()
                .max_by(|a, b| {
                    a.description
                        .len()
                        .cmp(&b.description.len())
                        .then_with(|| b.entity_name.cmp(&a.entity_name))
                })
                .cloned()
                .expect("component is non-empty");

            let mut aliases: Vec<String> = entities
                .iter()
                .map(|e| e.entity_name.clone())
                .filter(|name| normalize_entity_name(name) != normalize_entity_name(&canonical.entity_name))
                .collect();
            aliases.sort();
            aliases.dedup();
            if aliases.len() > self.config.max_aliases {
                warn!(
                    cluster = %canonical.entity_name,
                    total_aliases = aliases.len(),
                    cap = self.config.max_aliases,
                    "cluster has more aliases than max_aliases display cap"
                );
            }

            for e in &entities {
                raw_to_canonical.insert(e.entity_name.clone(), canonical.entity_name.clone());
            }

            let merged_description = super::merge::merge_descriptions(
                &entities.iter().map(|e| e.description.clone()).collect::<Vec<_>>(),
                super::merge::DescriptionMergeStrategy::Concatenate,
            );

            debug!(
                canonical = %canonical.entity_name,
                aliases = aliases.len(),
                "resolved entity cluster"
            );

            clusters.push(MergeCluster {
                canonical_name: canonical.entity_name,
                aliases,
                members: entities,
                merged_description,
            });
        }

        let report = ResolutionReport {
            clusters_formed: clusters.len(),
            singletons,
            entities_in: raw_entities.len(),
        };

        (clusters, raw_to_canonical, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, ty: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type: ty.to_string(),
            description: format!("{name} description"),
            type_is_known: true,
        }
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!(SimilarityWeights::default().validate().is_ok());
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let weights = SimilarityWeights {
            jaccard: 0.9,
            containment: 0.5,
            edit: 0.1,
            acronym: 0.1,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn warren_home_cluster_plus_singleton() {
        let resolver = EntityResolver::new(ResolutionConfig::default()).unwrap();
        let entities = vec![
            entity("Warren State Home and Training School", "ORG"),
            entity("Warren State Home", "ORG"),
            entity("Warren Home", "ORG"),
            entity("Warren Home School", "ORG"),
            entity("Warwick Home", "ORG"),
        ];

        let (clusters, _map, report) = resolver.resolve(&entities);
        assert_eq!(report.entities_in, 5);

        let big_cluster = clusters.iter().find(|c| c.members.len() == 4);
        assert!(big_cluster.is_some(), "expected a 4-member cluster, got {clusters:?}");

        let singleton = clusters.iter().find(|c| c.members.len() == 1).unwrap();
        assert_eq!(singleton.canonical_name, "Warwick Home");
    }

    #[test]
    fn different_types_never_cluster() {
        let resolver = EntityResolver::new(ResolutionConfig::default()).unwrap();
        let entities = vec![entity("Acme Corp", "ORG"), entity("Acme Corp", "PERSON")];
        let (clusters, _map, _report) = resolver.resolve(&entities);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn disabled_resolver_yields_all_singletons() {
        let config = ResolutionConfig {
            enabled: false,
            ..ResolutionConfig::default()
        };
        let resolver = EntityResolver::new(config).unwrap();
        let entities = vec![entity("A", "ORG"), entity("A Inc", "ORG")];
        let (clusters, map, report) = resolver.resolve(&entities);
        assert_eq!(clusters.len(), 2, "disabling resolution must not drop entities");
        assert_eq!(report.singletons, 2);
        assert_eq!(map.get("A"), Some(&"A".to_string()));
        assert_eq!(map.get("A Inc"), Some(&"A Inc".to_string()));
    }
}
