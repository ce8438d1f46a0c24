//! Opaque identifiers and the entity-name normalization rule shared by
//! the resolver, the graph storage backends, and the merge service.

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// A project is the tenancy and isolation boundary. Opaque by design: the
/// core never interprets its contents beyond equality and hex-prefix
/// derivation for the distributed backend's graph namespace name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(Uuid);

impl ProjectId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Graph namespace name used by the distributed backend:
    /// `graph_<hex-prefix-of-uuid>`.
    #[must_use]
    pub fn graph_namespace(&self) -> String {
        let hex = self.0.simple().to_string();
        format!("graph_{}", &hex[..12])
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalizes an entity name per the storage-layer key rule: Unicode NFKC,
/// case-folded, internal whitespace collapsed, trimmed.
///
/// `(projectId, normalize(entityName))` is the entity key; two raw names
/// that normalize equal are the same entity.
#[must_use]
pub fn normalize_entity_name(raw: &str) -> String {
    let nfkc: String = raw.nfkc().collect();
    let folded = nfkc.to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_entity_name("  Warren   State\tHome "),
            "warren state home"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_entity_name("Ångström Ltd.");
        let twice = normalize_entity_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn graph_namespace_is_stable_hex_prefix() {
        let id = ProjectId::from_uuid(Uuid::nil());
        assert_eq!(id.graph_namespace(), "graph_000000000000");
    }
}
