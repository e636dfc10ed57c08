use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

use crate::extraction::back_document::BackDocumentPolicy;

/// Where verification sessions are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreKind {
    Postgres,
    Memory,
}

impl FromStr for SessionStoreKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(SessionStoreKind::Postgres),
            "memory" => Ok(SessionStoreKind::Memory),
            other => anyhow::bail!("SESSION_STORE must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The session store backend.
    pub session_store: SessionStoreKind,
    /// The URL of the PostgreSQL database.
    pub database_url: Option<String>,
    /// The master key sealing biometric embeddings at rest.
    pub master_key: Option<Zeroizing<Vec<u8>>>,
    /// The URL of the Redis server backing the start limiter.
    pub redis_url: Option<String>,
    /// Base URL of the OCR collaborator.
    pub ocr_service_url: String,
    /// Base URL of the server-side face engine, when deployed.
    pub face_service_url: Option<String>,
    /// Upper bound for each collaborator call.
    pub collaborator_timeout: Duration,
    pub back_document_policy: BackDocumentPolicy,
    /// Session starts allowed per client IP per hour.
    pub start_rate_limit_per_hour: u32,
    pub bind_addr: SocketAddr,
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_master_key(mut master_key_hex: String) -> Result<Zeroizing<Vec<u8>>> {
    let master_key_bytes =
        hex::decode(master_key_hex.trim()).context("MASTER_KEY must be valid hexadecimal");
    master_key_hex.zeroize();
    let master_key_bytes = master_key_bytes?;

    if master_key_bytes.len() != 32 {
        anyhow::bail!("MASTER_KEY must be exactly 32 bytes (64 hex characters)");
    }
    Ok(Zeroizing::new(master_key_bytes))
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let session_store: SessionStoreKind = env::var("SESSION_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let (database_url, master_key) = match session_store {
            SessionStoreKind::Postgres => {
                let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
                let master_key_hex = env::var("MASTER_KEY")
                    .context("MASTER_KEY must be set (generate with: openssl rand -hex 32)")?;
                (Some(database_url), Some(parse_master_key(master_key_hex)?))
            }
            SessionStoreKind::Memory => (None, None),
        };

        let timeout_secs: u64 = env::var("COLLABORATOR_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .context("Invalid COLLABORATOR_TIMEOUT_SECS")?;

        let back_document_policy = env::var("BACK_DOCUMENT_POLICY")
            .unwrap_or_else(|_| "permissive".to_string())
            .parse::<BackDocumentPolicy>()
            .map_err(anyhow::Error::msg)
            .context("Invalid BACK_DOCUMENT_POLICY")?;

        Ok(Self {
            session_store,
            database_url,
            master_key,
            redis_url: optional_var("REDIS_URL"),
            ocr_service_url: env::var("OCR_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            face_service_url: optional_var("FACE_SERVICE_URL"),
            collaborator_timeout: Duration::from_secs(timeout_secs),
            back_document_policy,
            start_rate_limit_per_hour: env::var("START_RATE_LIMIT_PER_HOUR")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid START_RATE_LIMIT_PER_HOUR")?,
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
        })
    }

    /// In-memory configuration without Redis or a face engine.
    pub fn in_memory(ocr_service_url: impl Into<String>) -> Self {
        Self {
            session_store: SessionStoreKind::Memory,
            database_url: None,
            master_key: None,
            redis_url: None,
            ocr_service_url: ocr_service_url.into(),
            face_service_url: None,
            collaborator_timeout: Duration::from_secs(15),
            back_document_policy: BackDocumentPolicy::default(),
            start_rate_limit_per_hour: 20,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}
