//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to
//! date. Every statement is idempotent, so startup can run it against an
//! existing database.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout before a lock error is returned
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database at `db_path` and create tables
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Connection options apply per connection, so foreign keys and the busy
    // timeout hold for every pooled connection.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_notifications_table(pool).await?;
    Ok(())
}

/// Key/value settings (session secret, runtime toggles)
async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            linkedin_id TEXT UNIQUE,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            profile_url TEXT,
            profile_verified INTEGER NOT NULL DEFAULT 0,
            pending_url TEXT,
            profile_signature TEXT,
            profile_uploaded_at TEXT,
            verification_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (verification_status IN ('pending', 'verified', 'rejected')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Candidate scan for conflict detection
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_users_profile_url ON users(profile_url) WHERE profile_url IS NOT NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_notifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            recipient_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind TEXT NOT NULL
                CHECK (kind IN ('SIMILARITY_DETECTED', 'APPROVED', 'REJECTED')),
            message TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'unread'
                CHECK (status IN ('unread', 'read')),
            resolved INTEGER NOT NULL DEFAULT 0,
            resolution_action TEXT
                CHECK (resolution_action IS NULL OR resolution_action IN ('approve', 'reject', 'cancel')),
            resolved_by TEXT,
            resolved_at TEXT,
            created_at TEXT NOT NULL,
            read_at TEXT,
            expires_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notifications_inbox ON notifications(recipient_id, status, created_at DESC)",
    )
    .execute(pool)
    .await?;

    // Open conflicts per uploader
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notifications_open_conflicts ON notifications(sender_id, kind) WHERE resolved = 0",
    )
    .execute(pool)
    .await?;

    Ok(())
}
