mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    // Strip comment lines before splitting into statements; a comment may
    // itself contain a semicolon.
    let cleaned: String = sql
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    for statement in cleaned.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("classhub.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    configure(&pool).await?;
    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Open an in-memory database with the full schema applied. Test use only.
pub async fn init_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure(&pool).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn configure(pool: &SqlitePool) -> Result<()> {
    // WAL for better concurrency; FK enforcement for cascade deletes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
    execute_sql(pool, include_str!("../../migrations/002_courses.sql")).await?;
    execute_sql(pool, include_str!("../../migrations/003_course_sessions.sql")).await?;
    execute_sql(pool, include_str!("../../migrations/004_coursework.sql")).await?;
    execute_sql(pool, include_str!("../../migrations/005_messages.sql")).await?;
    execute_sql(pool, include_str!("../../migrations/006_attachments.sql")).await?;

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_sql_ignores_semicolons_in_comments() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        execute_sql(
            &pool,
            "-- prose with a semicolon; this is not a statement\n\
             CREATE TABLE t (id TEXT PRIMARY KEY);\n\
             -- another; trailing comment\n",
        )
        .await
        .unwrap();

        sqlx::query("INSERT INTO t (id) VALUES ('x')")
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_schema_applies() {
        let pool = init_in_memory().await.unwrap();
        for table in [
            "users",
            "sessions",
            "courses",
            "enrollments",
            "course_sessions",
            "session_students",
            "coursework",
            "coursework_students",
            "submissions",
            "messages",
            "attachments",
        ] {
            let count: (i64,) =
                sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            assert_eq!(count.0, 0);
        }
    }
}
