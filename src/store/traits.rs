//! `Repository` trait, the single async interface to persisted job state.
//!
//! The in-memory registry is a derived cache of what this returns; whenever
//! the two disagree, persistence wins.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::jobs::model::{FieldUpdate, JobDefinition, JobKey, JobKind, TaskLog};

/// Backend-agnostic persistence for job definitions and run logs.
#[async_trait]
pub trait Repository: Send + Sync {
    // ── Definitions ─────────────────────────────────────────────────

    /// Insert a definition and return its assigned id. `def.id` is ignored.
    async fn create_definition(&self, def: &JobDefinition) -> Result<i64, DatabaseError>;

    /// Get a definition by kind and id.
    async fn get_definition(
        &self,
        kind: JobKind,
        id: i64,
    ) -> Result<Option<JobDefinition>, DatabaseError>;

    /// All definitions of a kind, ordered by id.
    async fn list_definitions(&self, kind: JobKind) -> Result<Vec<JobDefinition>, DatabaseError>;

    /// Enabled definitions of a kind with a non-empty cron expression.
    async fn get_active_scheduled_definitions(
        &self,
        kind: JobKind,
    ) -> Result<Vec<JobDefinition>, DatabaseError>;

    /// Definitions of a kind that carry a non-empty external job id.
    async fn list_tracked_definitions(
        &self,
        kind: JobKind,
    ) -> Result<Vec<JobDefinition>, DatabaseError>;

    /// Apply column updates to one definition. Returns false if it does not exist.
    async fn update_fields(
        &self,
        kind: JobKind,
        id: i64,
        fields: &[FieldUpdate],
    ) -> Result<bool, DatabaseError>;

    /// Apply column updates only while the definition still tracks
    /// `external_job_id`. Returns false if it is gone or tracks another id.
    async fn update_tracked_fields(
        &self,
        kind: JobKind,
        id: i64,
        external_job_id: &str,
        fields: &[FieldUpdate],
    ) -> Result<bool, DatabaseError>;

    /// Delete a definition. Returns false if it did not exist.
    async fn delete_definition(&self, kind: JobKind, id: i64) -> Result<bool, DatabaseError>;

    // ── Task logs ───────────────────────────────────────────────────

    /// Append an immutable run record.
    async fn create_log(&self, log: &TaskLog) -> Result<(), DatabaseError>;

    /// Most recent run records for a job, newest first.
    async fn list_logs(&self, job: JobKey, limit: i64) -> Result<Vec<TaskLog>, DatabaseError>;
}
