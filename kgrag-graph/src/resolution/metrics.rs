//! Pairwise string-similarity metrics used by the entity resolver (§4.6
//! step 2): token Jaccard, token containment, normalized edit distance,
//! and acronym matching.

use std::collections::HashSet;

/// Lowercases and splits on whitespace/punctuation into a token set.
#[must_use]
pub fn tokenize(name: &str) -> HashSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[must_use]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// `|tokens_a ∩ tokens_b| / min(|tokens_a|, |tokens_b|)`.
#[must_use]
pub fn containment(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let min_len = a.len().min(b.len());
    if min_len == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / min_len as f64
}

/// `1 - levenshtein(a, b) / max(|a|, |b|)`, on char sequences.
#[must_use]
pub fn normalized_edit_similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(&a_chars, &b_chars);
    1.0 - (distance as f64 / max_len as f64)
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let (n, m) = (a.len(), b.len());
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// True iff one string is the acronym formed from the other's leading
/// capitals (case-insensitive on the acronym side, e.g. "WHO" against
/// "World Health Organization").
#[must_use]
pub fn acronym_match(a: &str, b: &str) -> bool {
    fn is_acronym_of(short: &str, long: &str) -> bool {
        if short.chars().any(char::is_whitespace) || short.len() < 2 {
            return false;
        }
        let initials: String = long
            .split_whitespace()
            .filter_map(|w| w.chars().next())
            .collect::<String>()
            .to_lowercase();
        initials == short.to_lowercase()
    }
    is_acronym_of(a, b) || is_acronym_of(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_tokens_is_one() {
        let a = tokenize("Warren State Home");
        let b = tokenize("warren state home");
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn containment_subset_is_one() {
        let a = tokenize("Warren Home");
        let b = tokenize("Warren State Home and Training School");
        assert!((containment(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn edit_similarity_identical_is_one() {
        assert!((normalized_edit_similarity("abc", "abc") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn edit_similarity_totally_different() {
        let sim = normalized_edit_similarity("abc", "xyz");
        assert!(sim < 0.5);
    }

    #[test]
    fn acronym_matches_leading_capitals() {
        assert!(acronym_match("WHO", "World Health Organization"));
        assert!(acronym_match("World Health Organization", "WHO"));
        assert!(!acronym_match("World Health Organization", "World Bank"));
    }
}
