use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS resumes (
        id            TEXT PRIMARY KEY,
        user_id       TEXT NOT NULL,
        document      JSONB NOT NULL,
        etag          TEXT NOT NULL,
        status        TEXT NOT NULL DEFAULT 'draft',
        last_modified TIMESTAMPTZ NOT NULL DEFAULT now(),
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS resumes_user_modified_idx ON resumes (user_id, last_modified DESC)",
    "CREATE INDEX IF NOT EXISTS resumes_user_status_idx ON resumes (user_id, status)",
    "CREATE INDEX IF NOT EXISTS resumes_completed_created_idx ON resumes (created_at DESC) WHERE status = 'completed'",
];

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the `resumes` table and its indexes when missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to apply resume schema")?;
    }
    info!("Resume schema ready");
    Ok(())
}
