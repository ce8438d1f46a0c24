//! SQL-state-like transient/permanent classification (§4.1, §8).

use kgrag_core::error::ErrorKind;

/// Classifies a SQL-state-like class prefix (the first two characters of a
/// five-character SQLSTATE code) into an [`ErrorKind`].
///
/// Transient classes: `08` (connection), `40` (transaction rollback), `53`
/// (insufficient resources), `57` (operator intervention), `58` (system
/// error). Permanent classes: `22` (data), `23` (integrity constraint),
/// `28` (invalid authorization), `42` (syntax/access). Null and empty
/// inputs classify as permanent (fail closed: an unrecognized cause should
/// not retry indefinitely).
#[must_use]
pub fn classify_sqlstate(class_prefix: Option<&str>) -> ErrorKind {
    match class_prefix {
        Some("08") | Some("40") | Some("53") | Some("57") | Some("58") => {
            ErrorKind::TransientStorage
        }
        Some("22") | Some("23") | Some("28") | Some("42") => ErrorKind::PermanentStorage,
        _ => ErrorKind::PermanentStorage,
    }
}

/// Walks a source-error chain looking for the first classifiable cause.
/// Terminates on a null (`None`) link or a self-referential source; an
/// exhausted or cyclic chain classifies as permanent.
pub fn classify_chain<'a>(
    mut source: Option<&'a (dyn std::error::Error + 'static)>,
    classify_one: impl Fn(&(dyn std::error::Error + 'static)) -> Option<ErrorKind>,
) -> ErrorKind {
    let mut seen = 0usize;
    while let Some(err) = source {
        if let Some(kind) = classify_one(err) {
            return kind;
        }
        seen += 1;
        if seen > 32 {
            break; // defends against a cyclic source chain
        }
        source = err.source();
    }
    ErrorKind::PermanentStorage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_prefixes_classify_transient() {
        for prefix in ["08", "40", "53", "57", "58"] {
            assert!(classify_sqlstate(Some(prefix)).is_retryable(), "{prefix}");
        }
    }

    #[test]
    fn permanent_prefixes_classify_permanent() {
        for prefix in ["22", "23", "28", "42"] {
            assert!(!classify_sqlstate(Some(prefix)).is_retryable(), "{prefix}");
        }
    }

    #[test]
    fn null_and_empty_classify_permanent() {
        assert!(!classify_sqlstate(None).is_retryable());
        assert!(!classify_sqlstate(Some("")).is_retryable());
    }
}
