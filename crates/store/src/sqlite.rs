//! SQLite backend.
//!
//! One database file with three tables:
//! - `checkpoints` — one row per checkpoint; the snapshot is stored as JSON
//! - `steps` — the per-thread step log, ordered by an autoincrement key
//! - `subagents` — subagent records
//!
//! A partial unique index on `checkpoints(thread_id) WHERE status = 'active'`
//! makes "at most one active checkpoint per thread" a schema guarantee.
//! Status changes on steps and subagents are compare-and-swap updates
//! conditioned on the status that was read.

use async_trait::async_trait;
use agentloom_core::checkpoint::{
    Checkpoint, CheckpointBackend, CheckpointReason, CheckpointStatus, StateSnapshot,
};
use agentloom_core::error::{CheckpointError, Error, StepError, StoreError, SubagentError};
use agentloom_core::step::{ChainOfThoughtStep, StepKind, StepLog, StepStatus};
use agentloom_core::subagent::{
    Subagent, SubagentBackend, SubagentResult, SubagentStatus, Transition, TransitionOutcome,
};
use agentloom_core::thread::ThreadId;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Attempts for a compare-and-swap status update before giving up.
const CAS_ATTEMPTS: usize = 8;

/// A SQLite store for checkpoints, steps, and subagents.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database exists per connection, so keep exactly one
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations — creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id           TEXT PRIMARY KEY,
                thread_id    TEXT NOT NULL,
                iteration    INTEGER NOT NULL,
                next_task    TEXT NOT NULL,
                reason       TEXT NOT NULL,
                status       TEXT NOT NULL,
                snapshot     TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                restored_at  TEXT,
                completed_at TEXT,
                error        TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("checkpoints table: {e}")))?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_one_active
            ON checkpoints(thread_id) WHERE status = 'active'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("active checkpoint index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, iteration)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("checkpoint thread index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS steps (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id  TEXT NOT NULL,
                id         TEXT NOT NULL,
                kind       TEXT NOT NULL,
                status     TEXT NOT NULL,
                label      TEXT NOT NULL,
                tool_name  TEXT,
                input      TEXT,
                timestamp  TEXT NOT NULL,
                UNIQUE (thread_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("steps table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subagents (
                id               TEXT PRIMARY KEY,
                parent_thread_id TEXT,
                name             TEXT NOT NULL,
                task             TEXT NOT NULL,
                tools            TEXT NOT NULL DEFAULT '[]',
                model            TEXT NOT NULL,
                status           TEXT NOT NULL,
                result           TEXT,
                error            TEXT,
                created_at       TEXT NOT NULL,
                completed_at     TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("subagents table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subagents_parent ON subagents(parent_thread_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("subagent parent index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, StoreError> {
        let id: String = column(row, "id")?;
        let reason_str: String = column(row, "reason")?;
        let status_str: String = column(row, "status")?;
        let snapshot_json: String = column(row, "snapshot")?;
        let iteration: i64 = column(row, "iteration")?;

        let reason = CheckpointReason::parse(&reason_str)
            .ok_or_else(|| corrupt(&id, format!("unknown reason '{reason_str}'")))?;
        let status = CheckpointStatus::parse(&status_str)
            .ok_or_else(|| corrupt(&id, format!("unknown status '{status_str}'")))?;
        let snapshot: StateSnapshot = serde_json::from_str(&snapshot_json)
            .map_err(|e| corrupt(&id, format!("snapshot: {e}")))?;

        Ok(Checkpoint {
            thread_id: ThreadId(column(row, "thread_id")?),
            iteration: u32::try_from(iteration)
                .map_err(|_| corrupt(&id, format!("iteration {iteration}")))?,
            next_task: column(row, "next_task")?,
            reason,
            status,
            snapshot,
            created_at: parse_ts(&column::<String>(row, "created_at")?),
            restored_at: column::<Option<String>>(row, "restored_at")?.map(|s| parse_ts(&s)),
            completed_at: column::<Option<String>>(row, "completed_at")?.map(|s| parse_ts(&s)),
            error: column(row, "error")?,
            id,
        })
    }

    fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ChainOfThoughtStep, StoreError> {
        let id: String = column(row, "id")?;
        let kind_str: String = column(row, "kind")?;
        let status_str: String = column(row, "status")?;
        let input: Option<String> = column(row, "input")?;

        let kind = match kind_str.as_str() {
            "thinking" => StepKind::Thinking,
            "tool" => StepKind::Tool,
            "text" => StepKind::Text,
            other => return Err(corrupt(&id, format!("unknown step kind '{other}'"))),
        };
        let status = parse_step_status(&status_str)
            .ok_or_else(|| corrupt(&id, format!("unknown step status '{status_str}'")))?;
        let input = input
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| corrupt(&id, format!("input: {e}")))?;

        Ok(ChainOfThoughtStep {
            kind,
            status,
            label: column(row, "label")?,
            tool_name: column(row, "tool_name")?,
            input,
            timestamp: parse_ts(&column::<String>(row, "timestamp")?),
            id,
        })
    }

    fn row_to_subagent(row: &sqlx::sqlite::SqliteRow) -> Result<Subagent, StoreError> {
        let id: String = column(row, "id")?;
        let status_str: String = column(row, "status")?;
        let tools_json: String = column(row, "tools")?;
        let result_json: Option<String> = column(row, "result")?;

        let status = SubagentStatus::parse(&status_str)
            .ok_or_else(|| corrupt(&id, format!("unknown status '{status_str}'")))?;
        let tools: Vec<String> =
            serde_json::from_str(&tools_json).map_err(|e| corrupt(&id, format!("tools: {e}")))?;
        let result: Option<SubagentResult> = result_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| corrupt(&id, format!("result: {e}")))?;

        Ok(Subagent {
            parent_thread_id: column::<Option<String>>(row, "parent_thread_id")?.map(ThreadId),
            name: column(row, "name")?,
            task: column(row, "task")?,
            tools,
            model: column(row, "model")?,
            status,
            result,
            error: column(row, "error")?,
            created_at: parse_ts(&column::<String>(row, "created_at")?),
            completed_at: column::<Option<String>>(row, "completed_at")?.map(|s| parse_ts(&s)),
            thread_id: ThreadId(id),
        })
    }

    async fn fetch_step_status(
        &self,
        thread_id: &ThreadId,
        step_id: &str,
    ) -> Result<Option<StepStatus>, Error> {
        let row = sqlx::query("SELECT id, status FROM steps WHERE thread_id = ?1 AND id = ?2")
            .bind(thread_id.as_str())
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("step lookup: {e}")))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let status_str: String = column(&row, "status")?;
                let status = parse_step_status(&status_str)
                    .ok_or_else(|| corrupt(step_id, format!("unknown step status '{status_str}'")))?;
                Ok(Some(status))
            }
        }
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn corrupt(id: &str, reason: String) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason,
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn step_kind_str(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Thinking => "thinking",
        StepKind::Tool => "tool",
        StepKind::Text => "text",
    }
}

fn parse_step_status(s: &str) -> Option<StepStatus> {
    match s {
        "pending" => Some(StepStatus::Pending),
        "active" => Some(StepStatus::Active),
        "complete" => Some(StepStatus::Complete),
        "error" => Some(StepStatus::Error),
        _ => None,
    }
}

#[async_trait]
impl CheckpointBackend for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_superseding(&self, checkpoint: Checkpoint) -> Result<Vec<String>, Error> {
        let snapshot = serde_json::to_string(&checkpoint.snapshot)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        // The UPDATE takes the write lock first, so the read of prior ids and
        // the insert see the same state.
        let rows = sqlx::query(
            r#"
            UPDATE checkpoints SET status = 'superseded'
            WHERE thread_id = ?1 AND status = 'active'
            RETURNING id
            "#,
        )
        .bind(checkpoint.thread_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("supersede: {e}")))?;

        let superseded = rows
            .iter()
            .map(|row| column::<String>(row, "id"))
            .collect::<Result<Vec<_>, _>>()?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (id, thread_id, iteration, next_task, reason, status, snapshot,
                 created_at, restored_at, completed_at, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&checkpoint.id)
        .bind(checkpoint.thread_id.as_str())
        .bind(i64::from(checkpoint.iteration))
        .bind(&checkpoint.next_task)
        .bind(checkpoint.reason.as_str())
        .bind(checkpoint.status.as_str())
        .bind(&snapshot)
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(checkpoint.restored_at.map(|t| t.to_rfc3339()))
        .bind(checkpoint.completed_at.map(|t| t.to_rfc3339()))
        .bind(&checkpoint.error)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT checkpoint failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(
            checkpoint_id = %checkpoint.id,
            thread_id = %checkpoint.thread_id,
            superseded = superseded.len(),
            "Stored checkpoint"
        );
        Ok(superseded)
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, Error> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("checkpoint get: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_checkpoint).transpose()?)
    }

    async fn latest_for_thread(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, Error> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE thread_id = ?1 ORDER BY iteration DESC, rowid DESC LIMIT 1",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("latest checkpoint: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_checkpoint).transpose()?)
    }

    async fn list_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, Error> {
        let rows = sqlx::query(
            "SELECT * FROM checkpoints WHERE thread_id = ?1 ORDER BY iteration ASC, rowid ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list checkpoints: {e}")))?;

        Ok(rows
            .iter()
            .map(Self::row_to_checkpoint)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let result = sqlx::query(
            r#"
            UPDATE checkpoints
            SET status = ?2, restored_at = ?3, completed_at = ?4, error = ?5
            WHERE id = ?1
            "#,
        )
        .bind(&checkpoint.id)
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.restored_at.map(|t| t.to_rfc3339()))
        .bind(checkpoint.completed_at.map(|t| t.to_rfc3339()))
        .bind(&checkpoint.error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE checkpoint failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::NotFound(checkpoint.id.clone()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl StepLog for SqliteStore {
    async fn emit_step(&self, thread_id: &ThreadId, step: ChainOfThoughtStep) -> Result<(), Error> {
        let input = step.input.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO steps (thread_id, id, kind, status, label, tool_name, input, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(thread_id, id) DO NOTHING
            "#,
        )
        .bind(thread_id.as_str())
        .bind(&step.id)
        .bind(step_kind_str(step.kind))
        .bind(step.status.to_string())
        .bind(&step.label)
        .bind(&step.tool_name)
        .bind(&input)
        .bind(step.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT step failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StepError::Duplicate {
                thread_id: thread_id.to_string(),
                step_id: step.id,
            }
            .into());
        }
        Ok(())
    }

    async fn update_step_status(
        &self,
        thread_id: &ThreadId,
        step_id: &str,
        status: StepStatus,
    ) -> Result<(), Error> {
        for _ in 0..CAS_ATTEMPTS {
            let current = self
                .fetch_step_status(thread_id, step_id)
                .await?
                .ok_or_else(|| StepError::NotFound {
                    thread_id: thread_id.to_string(),
                    step_id: step_id.to_string(),
                })?;

            current.check_transition(status)?;

            let result = sqlx::query(
                "UPDATE steps SET status = ?4 WHERE thread_id = ?1 AND id = ?2 AND status = ?3",
            )
            .bind(thread_id.as_str())
            .bind(step_id)
            .bind(current.to_string())
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE step failed: {e}")))?;

            if result.rows_affected() == 1 {
                return Ok(());
            }
        }

        Err(StoreError::Storage(format!("step {step_id} kept changing under update")).into())
    }

    async fn get_steps(&self, thread_id: &ThreadId) -> Result<Vec<ChainOfThoughtStep>, Error> {
        let rows = sqlx::query("SELECT * FROM steps WHERE thread_id = ?1 ORDER BY seq ASC")
            .bind(thread_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get steps: {e}")))?;

        Ok(rows
            .iter()
            .map(Self::row_to_step)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl SubagentBackend for SqliteStore {
    async fn insert(&self, subagent: Subagent) -> Result<(), Error> {
        let tools = serde_json::to_string(&subagent.tools)?;
        let result = subagent.result.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO subagents
                (id, parent_thread_id, name, task, tools, model, status, result, error,
                 created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(subagent.id())
        .bind(subagent.parent_thread_id.as_ref().map(|p| p.as_str()))
        .bind(&subagent.name)
        .bind(&subagent.task)
        .bind(&tools)
        .bind(&subagent.model)
        .bind(subagent.status.as_str())
        .bind(&result)
        .bind(&subagent.error)
        .bind(subagent.created_at.to_rfc3339())
        .bind(subagent.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT subagent failed: {e}")))?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Subagent>, Error> {
        let row = sqlx::query("SELECT * FROM subagents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("subagent get: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_subagent).transpose()?)
    }

    async fn list_for_parent(&self, parent: &ThreadId) -> Result<Vec<Subagent>, Error> {
        let rows = sqlx::query("SELECT * FROM subagents WHERE parent_thread_id = ?1 ORDER BY id ASC")
            .bind(parent.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("list subagents: {e}")))?;

        Ok(rows
            .iter()
            .map(Self::row_to_subagent)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome, Error> {
        for _ in 0..CAS_ATTEMPTS {
            let mut record = SubagentBackend::get(self, id)
                .await?
                .ok_or_else(|| SubagentError::NotFound(id.to_string()))?;
            let observed = record.status;

            if !record.apply(transition.clone()) {
                return Ok(TransitionOutcome::Rejected(record));
            }

            let result_json = record.result.as_ref().map(serde_json::to_string).transpose()?;
            let updated = sqlx::query(
                r#"
                UPDATE subagents
                SET status = ?3, result = ?4, error = ?5, completed_at = ?6
                WHERE id = ?1 AND status = ?2
                "#,
            )
            .bind(id)
            .bind(observed.as_str())
            .bind(record.status.as_str())
            .bind(&result_json)
            .bind(&record.error)
            .bind(record.completed_at.map(|t| t.to_rfc3339()))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE subagent failed: {e}")))?;

            if updated.rows_affected() == 1 {
                return Ok(TransitionOutcome::Applied(record));
            }
            debug!(subagent_id = id, "Subagent status changed concurrently, retrying");
        }

        Err(StoreError::Storage(format!("subagent {id} kept changing under transition")).into())
    }
}
