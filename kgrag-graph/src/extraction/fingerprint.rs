//! Fingerprint = SHA-256(canonicalized prompt template + entity-type list +
//! language + chunk content). Used as the extraction cache key (§4.5).

use sha2::{Digest, Sha256};

#[must_use]
pub fn fingerprint(prompt_template: &str, known_types: &[String], language: Option<&str>, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt_template.as_bytes());
    hasher.update(b"\0");
    let mut types = known_types.to_vec();
    types.sort();
    hasher.update(types.join(",").as_bytes());
    hasher.update(b"\0");
    hasher.update(language.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        let a = fingerprint("tmpl", &["ORG".into()], Some("rust"), "content");
        let b = fingerprint("tmpl", &["ORG".into()], Some("rust"), "content");
        assert_eq!(a, b);
    }

    #[test]
    fn changes_with_content() {
        let a = fingerprint("tmpl", &["ORG".into()], Some("rust"), "content");
        let b = fingerprint("tmpl", &["ORG".into()], Some("rust"), "different");
        assert_ne!(a, b);
    }

    #[test]
    fn type_list_order_does_not_matter() {
        let a = fingerprint("tmpl", &["ORG".into(), "PERSON".into()], None, "c");
        let b = fingerprint("tmpl", &["PERSON".into(), "ORG".into()], None, "c");
        assert_eq!(a, b);
    }
}
