// ABOUTME: SQLite-backed sandbox store built on sqlx
// ABOUTME: Status changes are single UPDATE ... WHERE status IN (...) RETURNING statements

use super::{
    PurgeStats, RecoveryStats, Result, SandboxStore, StorageError, DISPATCH_FAILURE_EXIT_CODE,
    INTERRUPTED_COMMAND, INTERRUPTED_PROVISIONING,
};
use crate::types::{
    format_timestamp, parse_timestamp, CommandStatus, CommandTransition, Sandbox, SandboxCommand,
    SandboxStatus, SandboxTransition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

const SANDBOX_COLUMNS: &str = "id, session_id, repo_url, runtime, vcpus, status, external_handle, \
     public_url, error_message, created_at, updated_at";

const COMMAND_COLUMNS: &str =
    "id, sandbox_id, command, status, output, error_output, exit_code, created_at, completed_at";

pub struct SqliteSandboxStore {
    pool: SqlitePool,
}

impl SqliteSandboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_sandbox(row: SqliteRow) -> Result<Sandbox> {
        let runtime: String = row.try_get("runtime")?;
        let status: String = row.try_get("status")?;
        let vcpus: i64 = row.try_get("vcpus")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Sandbox {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            repo_url: row.try_get("repo_url")?,
            runtime: runtime.parse().map_err(StorageError::InvalidRow)?,
            vcpus: u32::try_from(vcpus)
                .map_err(|_| StorageError::InvalidRow(format!("vcpus out of range: {}", vcpus)))?,
            status: status.parse().map_err(StorageError::InvalidStatus)?,
            external_handle: row.try_get("external_handle")?,
            public_url: row.try_get("public_url")?,
            error_message: row.try_get("error_message")?,
            created_at: timestamp(&created_at)?,
            updated_at: timestamp(&updated_at)?,
        })
    }

    fn row_to_command(row: SqliteRow) -> Result<SandboxCommand> {
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;

        Ok(SandboxCommand {
            id: row.try_get("id")?,
            sandbox_id: row.try_get("sandbox_id")?,
            command: row.try_get("command")?,
            status: status.parse().map_err(StorageError::InvalidStatus)?,
            output: row.try_get("output")?,
            error_output: row.try_get("error_output")?,
            exit_code: row.try_get("exit_code")?,
            created_at: timestamp(&created_at)?,
            completed_at: completed_at.as_deref().map(timestamp).transpose()?,
        })
    }
}

fn timestamp(value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value)
        .map_err(|e| StorageError::InvalidRow(format!("bad timestamp '{}': {}", value, e)))
}

/// SQL list of quoted status literals, e.g. `'creating', 'active'`
fn status_list<S: AsRef<str>>(statuses: impl IntoIterator<Item = S>) -> String {
    statuses
        .into_iter()
        .map(|s| format!("'{}'", s.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sandbox_statuses(statuses: &[SandboxStatus]) -> String {
    status_list(statuses.iter().map(|s| s.as_str()))
}

fn command_statuses(statuses: &[CommandStatus]) -> String {
    status_list(statuses.iter().map(|s| s.as_str()))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl SandboxStore for SqliteSandboxStore {
    // ========================================================================
    // SANDBOX OPERATIONS
    // ========================================================================

    async fn insert_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sandboxes (
                id, session_id, repo_url, runtime, vcpus, status,
                external_handle, public_url, error_message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sandbox.id)
        .bind(&sandbox.session_id)
        .bind(&sandbox.repo_url)
        .bind(sandbox.runtime.as_str())
        .bind(i64::from(sandbox.vcpus))
        .bind(sandbox.status.as_str())
        .bind(&sandbox.external_handle)
        .bind(&sandbox.public_url)
        .bind(&sandbox.error_message)
        .bind(format_timestamp(sandbox.created_at))
        .bind(format_timestamp(sandbox.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(sandbox_id = %sandbox.id, session_id = %sandbox.session_id, "Inserted sandbox row");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(StorageError::Conflict(format!(
                "session {} already has a live sandbox",
                sandbox.session_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_sandbox(&self, id: &str) -> Result<Option<Sandbox>> {
        let sql = format!("SELECT {} FROM sandboxes WHERE id = ?", SANDBOX_COLUMNS);
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_sandbox)
            .transpose()
    }

    async fn latest_sandbox_for_session(&self, session_id: &str) -> Result<Option<Sandbox>> {
        let sql = format!(
            "SELECT {} FROM sandboxes WHERE session_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            SANDBOX_COLUMNS
        );
        sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_sandbox)
            .transpose()
    }

    async fn list_session_sandboxes(&self, session_id: &str) -> Result<Vec<Sandbox>> {
        let sql = format!(
            "SELECT {} FROM sandboxes WHERE session_id = ? ORDER BY created_at DESC, rowid DESC",
            SANDBOX_COLUMNS
        );
        sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_sandbox)
            .collect()
    }

    async fn stop_live_sandboxes(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Sandbox>> {
        let sql = format!(
            "UPDATE sandboxes SET status = 'stopped', public_url = NULL, updated_at = ? \
             WHERE session_id = ? AND status IN ('creating', 'active') \
             RETURNING {}",
            SANDBOX_COLUMNS
        );
        sqlx::query(&sql)
            .bind(format_timestamp(now))
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_sandbox)
            .collect()
    }

    async fn transition_sandbox(
        &self,
        id: &str,
        transition: SandboxTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<Sandbox>> {
        let guard = sandbox_statuses(transition.allowed_from());
        let target = transition.target().as_str();
        let updated_at = format_timestamp(now);

        let row = match &transition {
            SandboxTransition::Activate { handle, public_url } => {
                let sql = format!(
                    "UPDATE sandboxes SET status = '{target}', external_handle = ?, \
                     public_url = ?, updated_at = ? \
                     WHERE id = ? AND status IN ({guard}) RETURNING {SANDBOX_COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(handle)
                    .bind(public_url)
                    .bind(&updated_at)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            SandboxTransition::Fail { message } => {
                let sql = format!(
                    "UPDATE sandboxes SET status = '{target}', error_message = ?, updated_at = ? \
                     WHERE id = ? AND status IN ({guard}) RETURNING {SANDBOX_COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(message)
                    .bind(&updated_at)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            SandboxTransition::Stop => {
                let sql = format!(
                    "UPDATE sandboxes SET status = '{target}', public_url = NULL, updated_at = ? \
                     WHERE id = ? AND status IN ({guard}) RETURNING {SANDBOX_COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(&updated_at)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.map(Self::row_to_sandbox).transpose()
    }

    // ========================================================================
    // COMMAND OPERATIONS
    // ========================================================================

    async fn insert_command(&self, command: &SandboxCommand) -> Result<bool> {
        // The EXISTS guard and the insert are one statement, so a concurrent
        // stop cannot land between the status check and the write
        let result = sqlx::query(
            r#"
            INSERT INTO sandbox_commands (id, sandbox_id, command, status, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5
            WHERE EXISTS (SELECT 1 FROM sandboxes WHERE id = ?2 AND status = 'active')
            "#,
        )
        .bind(&command.id)
        .bind(&command.sandbox_id)
        .bind(&command.command)
        .bind(command.status.as_str())
        .bind(format_timestamp(command.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_command(&self, id: &str) -> Result<Option<SandboxCommand>> {
        let sql = format!("SELECT {} FROM sandbox_commands WHERE id = ?", COMMAND_COLUMNS);
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_command)
            .transpose()
    }

    async fn list_commands(&self, sandbox_id: &str) -> Result<Vec<SandboxCommand>> {
        let sql = format!(
            "SELECT {} FROM sandbox_commands WHERE sandbox_id = ? \
             ORDER BY created_at DESC, rowid DESC",
            COMMAND_COLUMNS
        );
        sqlx::query(&sql)
            .bind(sandbox_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_command)
            .collect()
    }

    async fn transition_command(
        &self,
        id: &str,
        transition: CommandTransition,
    ) -> Result<Option<SandboxCommand>> {
        let guard = command_statuses(transition.allowed_from());
        let target = transition.target().as_str();

        let row = match &transition {
            CommandTransition::Start => {
                let sql = format!(
                    "UPDATE sandbox_commands SET status = '{target}' \
                     WHERE id = ? AND status IN ({guard}) RETURNING {COMMAND_COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            CommandTransition::Finish(outcome) => {
                let sql = format!(
                    "UPDATE sandbox_commands SET status = '{target}', output = ?, \
                     error_output = ?, exit_code = ?, completed_at = ? \
                     WHERE id = ? AND status IN ({guard}) RETURNING {COMMAND_COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(&outcome.output)
                    .bind(&outcome.error_output)
                    .bind(outcome.exit_code)
                    .bind(format_timestamp(outcome.completed_at))
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.map(Self::row_to_command).transpose()
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<PurgeStats> {
        let cutoff = format_timestamp(older_than);
        let mut tx = self.pool.begin().await?;

        let commands = sqlx::query(
            r#"
            DELETE FROM sandbox_commands WHERE sandbox_id IN (
                SELECT id FROM sandboxes
                WHERE status IN ('stopped', 'error') AND updated_at < ?
            )
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sandboxes = sqlx::query(
            "DELETE FROM sandboxes WHERE status IN ('stopped', 'error') AND updated_at < ?",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(PurgeStats {
            sandboxes,
            commands,
        })
    }

    async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<RecoveryStats> {
        let now = format_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let sandboxes = sqlx::query(
            "UPDATE sandboxes SET status = 'error', error_message = ?, updated_at = ? \
             WHERE status = 'creating'",
        )
        .bind(INTERRUPTED_PROVISIONING)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let commands = sqlx::query(
            "UPDATE sandbox_commands SET status = 'failed', exit_code = ?, error_output = ?, \
             completed_at = ? WHERE status IN ('pending', 'running')",
        )
        .bind(DISPATCH_FAILURE_EXIT_CODE)
        .bind(INTERRUPTED_COMMAND)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(RecoveryStats {
            sandboxes,
            commands,
        })
    }
}
