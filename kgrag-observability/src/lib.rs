//! Structured event contract (C12, §4.12): `retry.*`, `extract.cache.*`,
//! `merge.completed`, `query.completed`, `ingest.completed`. No transport —
//! every event is emitted as a `tracing` event carrying the event name and
//! its documented fields as structured attributes; a sink (OpenTelemetry
//! layer, log shipper, test subscriber) attaches downstream. Telemetry
//! sinks themselves are out of scope; only the contract is specified.

use kgrag_core::ids::ProjectId;
use tracing::info;

/// Contextual attributes every event carries (§4.12: "projectId,
/// operation, attempt (when applicable)").
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub project_id: Option<ProjectId>,
    pub operation: String,
    pub attempt: Option<u32>,
}

impl EventContext {
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            project_id: None,
            operation: operation.into(),
            attempt: None,
        }
    }

    #[must_use]
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    fn project_field(&self) -> String {
        self.project_id.map(|p| p.to_string()).unwrap_or_default()
    }
}

/// `retry.attempt`: emitted before each retried invocation after the
/// first (attempt > 0).
pub fn retry_attempt(ctx: &EventContext) {
    info!(
        event = "retry.attempt",
        project_id = %ctx.project_field(),
        operation = %ctx.operation,
        attempt = ctx.attempt.unwrap_or(0),
        "retry attempt"
    );
}

/// `retry.success`: emitted once an operation succeeds, whether on the
/// first try or after one or more retries.
pub fn retry_success(ctx: &EventContext, attempts: u32) {
    info!(
        event = "retry.success",
        project_id = %ctx.project_field(),
        operation = %ctx.operation,
        attempts,
        "retry succeeded"
    );
}

/// `retry.exhausted`: emitted when an operation gives up — either its
/// attempt budget or its wall-clock budget is spent, or the failure was
/// classified permanent on the first try.
pub fn retry_exhausted(ctx: &EventContext, attempts: u32, error: &str) {
    info!(
        event = "retry.exhausted",
        project_id = %ctx.project_field(),
        operation = %ctx.operation,
        attempts,
        error,
        "retry exhausted"
    );
}

/// `extract.cache.hit`: the extraction fingerprint was already cached.
pub fn extract_cache_hit(ctx: &EventContext, fingerprint: &str) {
    info!(
        event = "extract.cache.hit",
        project_id = %ctx.project_field(),
        operation = %ctx.operation,
        fingerprint,
        "extraction cache hit"
    );
}

/// `extract.cache.miss`: the extraction fingerprint required an LLM call.
pub fn extract_cache_miss(ctx: &EventContext, fingerprint: &str) {
    info!(
        event = "extract.cache.miss",
        project_id = %ctx.project_field(),
        operation = %ctx.operation,
        fingerprint,
        "extraction cache miss"
    );
}

/// `merge.completed` fields (§4.12): sources merged, relations redirected,
/// relations deduplicated, self-loops filtered.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeCompletedFields {
    pub sources: usize,
    pub relations_redirected: usize,
    pub relations_deduped: usize,
    pub self_loops_filtered: usize,
}

pub fn merge_completed(ctx: &EventContext, fields: MergeCompletedFields) {
    info!(
        event = "merge.completed",
        project_id = %ctx.project_field(),
        sources = fields.sources,
        relations_redirected = fields.relations_redirected,
        relations_deduped = fields.relations_deduped,
        self_loops_filtered = fields.self_loops_filtered,
        "merge completed"
    );
}

/// `query.completed` fields (§4.12): mode, source count, duration.
#[derive(Debug, Clone)]
pub struct QueryCompletedFields {
    pub mode: String,
    pub sources: usize,
    pub duration_ms: u64,
}

pub fn query_completed(ctx: &EventContext, fields: QueryCompletedFields) {
    info!(
        event = "query.completed",
        project_id = %ctx.project_field(),
        mode = %fields.mode,
        sources = fields.sources,
        duration_ms = fields.duration_ms,
        "query completed"
    );
}

/// `ingest.completed` fields (§4.12): chunk/entity/relation counts, duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestCompletedFields {
    pub chunks: u32,
    pub entities: u32,
    pub relations: u32,
    pub duration_ms: u64,
}

pub fn ingest_completed(ctx: &EventContext, fields: IngestCompletedFields) {
    info!(
        event = "ingest.completed",
        project_id = %ctx.project_field(),
        chunks = fields.chunks,
        entities = fields.entities,
        relations = fields.relations,
        duration_ms = fields.duration_ms,
        "ingest completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn retry_exhausted_logs_event_name_and_error() {
        let ctx = EventContext::new("storage.upsert_entity").with_attempt(3);
        retry_exhausted(&ctx, 3, "connection reset");
        assert!(logs_contain("retry.exhausted"));
        assert!(logs_contain("connection reset"));
    }

    #[traced_test]
    #[test]
    fn merge_completed_logs_counts() {
        let ctx = EventContext::new("merge");
        merge_completed(
            &ctx,
            MergeCompletedFields {
                sources: 3,
                relations_redirected: 5,
                relations_deduped: 2,
                self_loops_filtered: 1,
            },
        );
        assert!(logs_contain("merge.completed"));
    }

    #[test]
    fn context_builder_sets_project_and_attempt() {
        let project_id = ProjectId::new();
        let ctx = EventContext::new("query.execute")
            .with_project(project_id)
            .with_attempt(2);
        assert_eq!(ctx.attempt, Some(2));
        assert_eq!(ctx.project_id, Some(project_id));
    }
}
