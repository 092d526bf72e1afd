//! SQLite connection and schema.
//!
//! Two tables back the document store:
//!
//! - `documents`: one row per document, embedding as a little-endian `f32` BLOB
//! - `set_members`: named id sets; the autoincrement `seq` preserves
//!   insertion order for enumeration

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Open (creating if needed) the database at `path` in WAL mode and apply the schema.
pub async fn open(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    migrate(&pool).await?;
    debug!(path = %path.display(), "database ready");
    Ok(pool)
}

/// Create tables and indexes. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            content TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            uploaded_at INTEGER NOT NULL,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS set_members (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            set_name TEXT NOT NULL,
            member TEXT NOT NULL,
            UNIQUE(set_name, member)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_set_members_set ON set_members(set_name, seq)")
        .execute(pool)
        .await?;

    Ok(())
}
