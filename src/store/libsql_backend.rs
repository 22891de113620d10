//! libSQL backend for the async `Repository` trait.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::jobs::model::{
    ExternalJobStatus, FieldUpdate, JobDefinition, JobKey, JobKind, JobPayload, TaskLog,
};
use crate::store::migrations;
use crate::store::traits::Repository;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Single UPDATE statement, optionally guarded on the tracked external id.
    async fn update_where(
        &self,
        kind: JobKind,
        id: i64,
        external_job_id: Option<&str>,
        fields: &[FieldUpdate],
    ) -> Result<bool, DatabaseError> {
        let mut assignments = Vec::with_capacity(fields.len() + 1);
        let mut values = Vec::with_capacity(fields.len() + 4);
        for field in fields {
            let (column, value) = field_column(field)?;
            values.push(value);
            assignments.push(format!("{column} = ?{}", values.len()));
        }
        values.push(libsql::Value::Text(Utc::now().to_rfc3339()));
        assignments.push(format!("updated_at = ?{}", values.len()));
        values.push(libsql::Value::Text(kind.as_str().to_string()));
        let kind_idx = values.len();
        values.push(libsql::Value::Integer(id));
        let id_idx = values.len();

        let mut sql = format!(
            "UPDATE job_definitions SET {} WHERE kind = ?{kind_idx} AND id = ?{id_idx}",
            assignments.join(", ")
        );
        if let Some(external_job_id) = external_job_id {
            values.push(libsql::Value::Text(external_job_id.to_string()));
            sql.push_str(&format!(" AND TRIM(external_job_id) = ?{}", values.len()));
        }

        let count = self
            .conn()
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update_fields: {e}")))?;
        Ok(count > 0)
    }

    async fn query_definitions(
        &self,
        filter: &str,
        kind: JobKind,
        op: &str,
    ) -> Result<Vec<JobDefinition>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DEFINITION_COLUMNS} FROM job_definitions WHERE kind = ?1 {filter} ORDER BY id"
                ),
                params![kind.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut defs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_definition(&row) {
                Ok(d) => defs.push(d),
                Err(e) => tracing::warn!("Skipping job definition row: {e}"),
            }
        }
        Ok(defs)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Column name and bound value for one field update.
fn field_column(field: &FieldUpdate) -> Result<(&'static str, libsql::Value), DatabaseError> {
    use libsql::Value;

    Ok(match field {
        FieldUpdate::Name(v) => ("name", Value::Text(v.clone())),
        FieldUpdate::Description(v) => ("description", Value::Text(v.clone())),
        FieldUpdate::CronExpr(v) => ("cron_expr", Value::Text(v.clone())),
        FieldUpdate::Enabled(v) => ("enabled", Value::Integer(*v as i64)),
        FieldUpdate::Payload(p) => ("payload", Value::Text(to_json(&p.to_config_json())?)),
        FieldUpdate::AlertTargets(t) => ("alert_targets", Value::Text(to_json(t)?)),
        FieldUpdate::LastRun(dt) => ("last_run_at", Value::Text(dt.to_rfc3339())),
        FieldUpdate::LastResult(v) => ("last_result", Value::Text(v.clone())),
        FieldUpdate::ExternalJobId(v) => ("external_job_id", opt_text(v.as_deref())),
        FieldUpdate::JobStatus(s) => ("job_status", Value::Text(s.to_string())),
        FieldUpdate::FinishTime(dt) => ("finish_time", Value::Text(dt.to_rfc3339())),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const DEFINITION_COLUMNS: &str = "id, kind, name, description, cron_expr, enabled, payload, alert_targets, last_run_at, last_result, external_job_id, job_status, finish_time, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, job_kind, job_id, external_job_id, job_name, task_type, result, created_at";

#[async_trait]
impl Repository for LibSqlBackend {
    // ── Definitions ─────────────────────────────────────────────────

    async fn create_definition(&self, def: &JobDefinition) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let payload = to_json(&def.payload.to_config_json())?;
        let alert_targets = to_json(&def.alert_targets)?;
        let job_status = opt_text(def.job_status.as_ref().map(|s| s.as_str()));

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO job_definitions (kind, name, description, cron_expr, enabled, payload, alert_targets, last_run_at, last_result, external_job_id, job_status, finish_time, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) RETURNING id",
                params![
                    def.kind().as_str(),
                    def.name.clone(),
                    def.description.clone(),
                    def.cron_expr.clone(),
                    def.enabled as i64,
                    payload,
                    alert_targets,
                    opt_datetime(def.last_run_at),
                    opt_text(def.last_result.as_deref()),
                    opt_text(def.external_job_id.as_deref()),
                    job_status,
                    opt_datetime(def.finish_time),
                    now.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_definition: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("create_definition: {e}"))),
            Ok(None) => Err(DatabaseError::Query(
                "create_definition: no id returned".to_string(),
            )),
            Err(e) => Err(DatabaseError::Query(format!("create_definition: {e}"))),
        }
    }

    async fn get_definition(
        &self,
        kind: JobKind,
        id: i64,
    ) -> Result<Option<JobDefinition>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEFINITION_COLUMNS} FROM job_definitions WHERE kind = ?1 AND id = ?2"),
                params![kind.as_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_definition: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_definition(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_definition: {e}"))),
        }
    }

    async fn list_definitions(&self, kind: JobKind) -> Result<Vec<JobDefinition>, DatabaseError> {
        self.query_definitions("", kind, "list_definitions").await
    }

    async fn get_active_scheduled_definitions(
        &self,
        kind: JobKind,
    ) -> Result<Vec<JobDefinition>, DatabaseError> {
        self.query_definitions(
            "AND enabled = 1 AND TRIM(cron_expr) != ''",
            kind,
            "get_active_scheduled_definitions",
        )
        .await
    }

    async fn list_tracked_definitions(
        &self,
        kind: JobKind,
    ) -> Result<Vec<JobDefinition>, DatabaseError> {
        self.query_definitions(
            "AND external_job_id IS NOT NULL AND TRIM(external_job_id) != ''",
            kind,
            "list_tracked_definitions",
        )
        .await
    }

    async fn update_fields(
        &self,
        kind: JobKind,
        id: i64,
        fields: &[FieldUpdate],
    ) -> Result<bool, DatabaseError> {
        self.update_where(kind, id, None, fields).await
    }

    async fn update_tracked_fields(
        &self,
        kind: JobKind,
        id: i64,
        external_job_id: &str,
        fields: &[FieldUpdate],
    ) -> Result<bool, DatabaseError> {
        self.update_where(kind, id, Some(external_job_id), fields)
            .await
    }

    async fn delete_definition(&self, kind: JobKind, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM job_definitions WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_definition: {e}")))?;
        Ok(count > 0)
    }

    // ── Task logs ───────────────────────────────────────────────────

    async fn create_log(&self, log: &TaskLog) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO task_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    log.id.to_string(),
                    log.job.kind.as_str(),
                    log.job.id,
                    opt_text(log.external_job_id.as_deref()),
                    log.job_name.clone(),
                    log.task_type.clone(),
                    log.result.clone(),
                    log.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_log: {e}")))?;
        Ok(())
    }

    async fn list_logs(&self, job: JobKey, limit: i64) -> Result<Vec<TaskLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM task_logs WHERE job_kind = ?1 AND job_id = ?2 ORDER BY created_at DESC, rowid DESC LIMIT ?3"
                ),
                params![job.kind.as_str(), job.id, limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_log(&row) {
                Ok(l) => logs.push(l),
                Err(e) => tracing::warn!("Skipping task log row: {e}"),
            }
        }
        Ok(logs)
    }
}

/// Map a libsql Row to a JobDefinition. Column order matches DEFINITION_COLUMNS.
fn row_to_definition(row: &libsql::Row) -> Result<JobDefinition, DatabaseError> {
    let kind_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let kind: JobKind = kind_str.parse().map_err(DatabaseError::Serialization)?;

    let payload_str: String = row.get(6).unwrap_or_else(|_| "{}".to_string());
    let payload_json: serde_json::Value =
        serde_json::from_str(&payload_str).unwrap_or(serde_json::json!({}));
    let payload = JobPayload::from_db(kind, payload_json).map_err(DatabaseError::Serialization)?;

    let targets_str: String = row.get(7).unwrap_or_else(|_| "[]".to_string());
    let alert_targets: Vec<String> = serde_json::from_str(&targets_str).unwrap_or_default();

    let created_str: String = row.get(13).unwrap_or_default();
    let updated_str: String = row.get(14).unwrap_or_default();

    Ok(JobDefinition {
        id: row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        name: row.get(2).unwrap_or_default(),
        description: row.get(3).unwrap_or_default(),
        cron_expr: row.get(4).unwrap_or_default(),
        enabled: row.get::<i64>(5).unwrap_or(0) != 0,
        payload,
        alert_targets,
        last_run_at: row.get::<String>(8).ok().map(|s| parse_datetime(&s)),
        last_result: row.get::<String>(9).ok(),
        external_job_id: row.get::<String>(10).ok(),
        job_status: row.get::<String>(11).ok().map(ExternalJobStatus::from),
        finish_time: row.get::<String>(12).ok().map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_log(row: &libsql::Row) -> Result<TaskLog, DatabaseError> {
    let kind_str: String = row.get(1).unwrap_or_default();
    let kind: JobKind = kind_str.parse().map_err(DatabaseError::Serialization)?;
    let created_str: String = row.get(7).unwrap_or_default();

    Ok(TaskLog {
        id: row
            .get::<String>(0)
            .unwrap_or_default()
            .parse()
            .unwrap_or_default(),
        job: JobKey {
            kind,
            id: row.get::<i64>(2).unwrap_or_default(),
        },
        external_job_id: row.get::<String>(3).ok(),
        job_name: row.get(4).unwrap_or_default(),
        task_type: row.get(5).unwrap_or_default(),
        result: row.get(6).unwrap_or_default(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Tests ───────────────────────────────────────────────────────────
