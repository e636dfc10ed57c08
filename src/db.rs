use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::error::{AppError, Result};

/// Idempotent schema for the verification session store.
const SCHEMA: &str = r#"
DO $$
BEGIN
    CREATE TYPE verification_status AS ENUM (
        'PENDING_DOCUMENT_FRONT',
        'PENDING_DOCUMENT_BACK',
        'PENDING_LIVENESS',
        'VERIFIED',
        'REJECTED_DOC',
        'REJECTED_LIVENESS',
        'REJECTED_FACE_MISMATCH',
        'PENDING_REVIEW'
    );
EXCEPTION
    WHEN duplicate_object THEN NULL;
END
$$;

CREATE TABLE IF NOT EXISTS verification_sessions (
    id UUID PRIMARY KEY,
    user_id UUID,
    rut TEXT,
    status verification_status NOT NULL,
    doc_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    id_card_embedding BYTEA,
    selfie_embedding BYTEA,
    liveness_score REAL CHECK (liveness_score BETWEEN 0 AND 1),
    face_match_score REAL CHECK (face_match_score BETWEEN 0 AND 1),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_verification_sessions_user_id
    ON verification_sessions (user_id);
"#;

/// Creates a new database connection pool.
///
/// # Arguments
///
/// * `database_url` - The URL of the PostgreSQL database.
///
/// # Returns
///
/// A `Result` containing the `Pool`.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = Config::new();
    let pg_config: tokio_postgres::Config = database_url.parse()?;

    if let Some(tokio_postgres::config::Host::Tcp(hostname)) = pg_config.get_hosts().first() {
        cfg.host = Some(hostname.clone());
    }
    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }
    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }
    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }
    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg.pool = Some(PoolConfig {
        max_size: 32,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..PoolConfig::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(AppError::from)
}

/// Applies the session schema; safe to run on every startup.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    tracing::info!("✅ Verification session schema ensured");
    Ok(())
}
