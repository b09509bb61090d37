// ABOUTME: SQLite connection pool construction and embedded schema migrations
// ABOUTME: Shared by the sandbox store, the API server and the maintenance commands

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Schema migrations embedded at compile time
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum pooled connections for file-backed databases
const MAX_CONNECTIONS: u32 = 8;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid database URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to create database directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },

    #[error("Home directory could not be determined")]
    NoHomeDirectory,
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Default location of the database file: `~/.devbox/devbox.db`
pub fn default_database_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(DatabaseError::NoHomeDirectory)?;
    Ok(home.join(".devbox").join("devbox.db"))
}

/// Default database URL, creating the file on first use
pub fn default_database_url() -> Result<String> {
    Ok(format!(
        "sqlite://{}?mode=rwc",
        default_database_path()?.display()
    ))
}

/// Open a pool for the given SQLite URL.
///
/// Foreign keys are enforced, file databases use WAL, and writers wait up to
/// `BUSY_TIMEOUT` for a lock instead of failing immediately. The parent
/// directory of a file database is created if missing. Only `sqlite:` URLs
/// are accepted; anything else fails before touching the filesystem.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    if !database_url.starts_with("sqlite:") {
        return Err(DatabaseError::InvalidUrl {
            url: database_url.to_string(),
            reason: "expected a sqlite: URL".to_string(),
        });
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| DatabaseError::InvalidUrl {
            url: database_url.to_string(),
            reason: e.to_string(),
        })?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let filename = options.get_filename().to_path_buf();
    let in_memory = filename.as_os_str().is_empty() || filename.as_os_str() == ":memory:";

    if in_memory {
        return connect_in_memory().await;
    }

    if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DatabaseError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
    }

    debug!("Opening database at {}", filename.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open a private in-memory database.
///
/// Every SQLite in-memory connection is its own database, so the pool is
/// pinned to a single connection that is never recycled.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

/// Open a pool and bring its schema up to date
pub async fn connect_and_migrate(database_url: &str) -> Result<SqlitePool> {
    let pool = connect(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert!(tables.contains(&"sandboxes".to_string()));
        assert!(tables.contains(&"sandbox_commands".to_string()));
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("devbox.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = connect_and_migrate(&url).await.unwrap();
        pool.close().await;

        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = connect("postgres://localhost/devbox").await;
        assert!(matches!(result, Err(DatabaseError::InvalidUrl { .. })));
        assert!(!std::path::Path::new("postgres:").exists());
    }

    #[tokio::test]
    async fn test_bare_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("devbox.db");

        let result = connect(&db_path.display().to_string()).await;

        assert!(matches!(result, Err(DatabaseError::InvalidUrl { .. })));
        assert!(!db_path.exists());
    }

    #[tokio::test]
    async fn test_live_sandbox_index_rejects_second_live_row() {
        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let insert = "INSERT INTO sandboxes (id, session_id, repo_url, runtime, vcpus, status, created_at, updated_at)
                      VALUES (?1, 's1', 'https://github.com/a/b', 'nodejs', 2, ?2, '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')";

        sqlx::query(insert)
            .bind("sbx_1")
            .bind("active")
            .execute(&pool)
            .await
            .unwrap();

        // Terminal rows never collide
        sqlx::query(insert)
            .bind("sbx_2")
            .bind("stopped")
            .execute(&pool)
            .await
            .unwrap();

        let err = sqlx::query(insert)
            .bind("sbx_3")
            .bind("creating")
            .execute(&pool)
            .await
            .unwrap_err();

        match err {
            sqlx::Error::Database(db_err) => assert!(db_err.is_unique_violation()),
            other => panic!("expected unique violation, got {other:?}"),
        }
    }
}
