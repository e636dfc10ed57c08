use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::{Config, SessionStoreKind};
use crate::crypto::aes::SecureKey;
use crate::error::{AppError, Result};
use crate::repositories::session::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::services::face::{FaceEngine, HttpFaceEngine};
use crate::services::ocr::{HttpOcrEngine, OcrEngine};
use crate::services::verification::VerificationService;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The verification pipeline.
    pub verification: VerificationService,
    /// The Redis connection manager, when a start limiter is configured.
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Creates a new `AppState`, connecting every configured backend.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn SessionStore> = match config.session_store {
            SessionStoreKind::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| AppError::Internal("DATABASE_URL is not configured".to_string()))?;
                let master_key = config
                    .master_key
                    .as_deref()
                    .ok_or_else(|| AppError::Internal("MASTER_KEY is not configured".to_string()))?;

                let pool = crate::db::create_pool(database_url)?;
                crate::db::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

                Arc::new(PgSessionStore::new(pool, SecureKey::from_slice(master_key)?))
            }
            SessionStoreKind::Memory => {
                tracing::warn!("⚠️  Using in-memory session store, sessions are lost on restart");
                Arc::new(MemorySessionStore::new())
            }
        };

        let redis = match config.redis_url.as_deref() {
            Some(url) => {
                let redis_client = redis::Client::open(url)?;
                let manager = ConnectionManager::new(redis_client).await?;
                tracing::info!("✅ Redis Connection Manager initialized (start rate limiter)");
                Some(manager)
            }
            None => {
                tracing::info!("ℹ️  REDIS_URL not set, start rate limiter disabled");
                None
            }
        };

        let ocr: Arc<dyn OcrEngine> = Arc::new(HttpOcrEngine::new(&config.ocr_service_url));
        tracing::info!("✅ OCR engine at {}", config.ocr_service_url);

        let face = config.face_service_url.as_deref().map(|url| {
            tracing::info!("✅ Server-side face engine at {}", url);
            Arc::new(HttpFaceEngine::new(url)) as Arc<dyn FaceEngine>
        });
        if face.is_none() {
            tracing::info!("ℹ️  No server-side face engine, relying on client embeddings");
        }

        Ok(Self::with_parts(config.clone(), store, ocr, face, redis))
    }

    /// Assembles a state from already-built collaborators.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn SessionStore>,
        ocr: Arc<dyn OcrEngine>,
        face: Option<Arc<dyn FaceEngine>>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let verification = VerificationService::new(
            store,
            ocr,
            face,
            config.collaborator_timeout,
            config.back_document_policy,
        );

        Self {
            config,
            verification,
            redis,
        }
    }
}
