//! Startup validation: each configuration section is validated
//! independently and the first hard failure is surfaced to the caller.

use crate::KgRagConfig;

pub struct ValidationError {
    pub field: String,
    pub message: String,
}

fn fail(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

pub fn validate_config(config: &KgRagConfig) -> Result<(), ValidationError> {
    validate_chunk(config)?;
    validate_resolution(config)?;
    validate_reranker(config)?;
    validate_vector_index(config)?;
    validate_retry(config)?;
    Ok(())
}

fn validate_chunk(config: &KgRagConfig) -> Result<(), ValidationError> {
    if config.chunk.size == 0 {
        return Err(fail("chunk.size", "must be greater than zero"));
    }
    if config.chunk.overlap >= config.chunk.size {
        return Err(fail(
            "chunk.overlap",
            format!(
                "overlap ({}) must be smaller than chunk.size ({})",
                config.chunk.overlap, config.chunk.size
            ),
        ));
    }
    Ok(())
}

/// §8: "startup rejects configurations where `|Σ weights − 1.0| > 0.01`".
fn validate_resolution(config: &KgRagConfig) -> Result<(), ValidationError> {
    let r = &config.entity_resolution;
    let sum = r.weight_jaccard + r.weight_containment + r.weight_edit + r.weight_acronym;
    if (sum - 1.0).abs() > 0.01 {
        return Err(fail(
            "entity_resolution.weight_*",
            format!("similarity weights must sum to 1.0 (+/- 0.01), got {sum}"),
        ));
    }
    if !(0.0..=1.0).contains(&r.threshold) {
        return Err(fail(
            "entity_resolution.threshold",
            format!("must be in [0, 1], got {}", r.threshold),
        ));
    }
    if r.batch_size == 0 {
        return Err(fail("entity_resolution.batch_size", "must be greater than zero"));
    }
    Ok(())
}

fn validate_reranker(config: &KgRagConfig) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&config.reranker.min_score) {
        return Err(fail(
            "reranker.min_score",
            format!("must be in [0, 1], got {}", config.reranker.min_score),
        ));
    }
    if config.reranker.timeout_ms == 0 {
        return Err(fail("reranker.timeout_ms", "must be greater than zero"));
    }
    Ok(())
}

fn validate_vector_index(config: &KgRagConfig) -> Result<(), ValidationError> {
    if config.vector_index.dimension == 0 {
        return Err(fail("vector_index.dimension", "must be greater than zero"));
    }
    if config.embedding.dimension != config.vector_index.dimension {
        return Err(fail(
            "vector_index.dimension",
            format!(
                "must match embedding.dimension ({} != {})",
                config.vector_index.dimension, config.embedding.dimension
            ),
        ));
    }
    Ok(())
}

fn validate_retry(config: &KgRagConfig) -> Result<(), ValidationError> {
    if config.retry.max_attempts == 0 {
        return Err(fail("retry.max_attempts", "must be greater than zero"));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(fail(
            "retry.backoff_multiplier",
            "must be >= 1.0 for a non-decreasing backoff schedule",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&KgRagConfig::default()).is_ok());
    }

    #[test]
    fn overlap_gte_size_rejected() {
        let mut config = KgRagConfig::default();
        config.chunk.overlap = config.chunk.size;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        let mut config = KgRagConfig::default();
        config.vector_index.dimension = 768;
        assert!(validate_config(&config).is_err());
    }
}
