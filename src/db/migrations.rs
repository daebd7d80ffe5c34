use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: ingestion and staging tables");

    // Ingestion: post ids waiting for a detail fetch
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS pending_posts (
            post_id INTEGER PRIMARY KEY,
            discovered_at TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create pending_posts table")?;

    // Ingestion: usernames waiting for a profile fetch
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS pending_members (
            username TEXT PRIMARY KEY,
            discovered_at TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create pending_members table")?;

    // Staging: detailed posts plus enrichment fields
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            post_id INTEGER PRIMARY KEY,
            author TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            community TEXT NOT NULL DEFAULT '',
            posted_at TEXT,
            sentiment TEXT NOT NULL DEFAULT 'neutral',
            self_diagnosed TEXT NOT NULL DEFAULT 'No',
            self_medicated TEXT NOT NULL DEFAULT 'No',
            fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    // Staging: member profiles plus enrichment fields
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS members (
            username TEXT PRIMARY KEY,
            bio TEXT NOT NULL DEFAULT '',
            display_name TEXT,
            location TEXT,
            joined_at TEXT,
            post_count INTEGER,
            gender TEXT NOT NULL DEFAULT 'unknown',
            fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create members table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: enrichment and pending-work indexes");

    for (name, sql) in [
        (
            "idx_pending_posts_unprocessed",
            "CREATE INDEX IF NOT EXISTS idx_pending_posts_unprocessed ON pending_posts(processed_at)",
        ),
        (
            "idx_pending_members_unprocessed",
            "CREATE INDEX IF NOT EXISTS idx_pending_members_unprocessed ON pending_members(processed_at)",
        ),
        (
            "idx_members_gender",
            "CREATE INDEX IF NOT EXISTS idx_members_gender ON members(gender)",
        ),
        (
            "idx_posts_author",
            "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author)",
        ),
    ] {
        sqlx::query(sql)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create index {name}"))?;
    }

    Ok(())
}
