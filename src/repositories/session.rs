use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use postgres_types::{FromSql, Json};
use tokio::sync::RwLock;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::crypto::aes::SecureKey;
use crate::crypto::embedding;
use crate::error::{AppError, Result};
use crate::models::doc_data::DocData;
use crate::models::session::{Embeddings, Scores, VerificationSession};

/// Persistence for verification sessions.
///
/// Concurrent updates of one session are last-write-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a newly created session.
    async fn insert(&self, session: &VerificationSession) -> Result<()>;

    /// Loads a session by id.
    async fn find(&self, id: Uuid) -> Result<Option<VerificationSession>>;

    /// Overwrites a stored session; `NotFound` when it does not exist.
    async fn update(&self, session: &VerificationSession) -> Result<()>;

    /// Removes a session, returning whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// PostgreSQL store; embeddings are sealed with the master key at rest.
pub struct PgSessionStore {
    pool: Pool,
    key: SecureKey,
}

impl PgSessionStore {
    pub fn new(pool: Pool, key: SecureKey) -> Self {
        Self { pool, key }
    }
}

const INSERT_SESSION: &str = r#"
    INSERT INTO verification_sessions (
        id, user_id, rut, status, doc_data, id_card_embedding, selfie_embedding,
        liveness_score, face_match_score, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
"#;

const SELECT_SESSION: &str = r#"
    SELECT id, user_id, rut, status, doc_data, id_card_embedding, selfie_embedding,
           liveness_score, face_match_score, created_at, updated_at
    FROM verification_sessions
    WHERE id = $1
"#;

const UPDATE_SESSION: &str = r#"
    UPDATE verification_sessions
    SET rut = $2,
        status = $3,
        doc_data = $4,
        id_card_embedding = $5,
        selfie_embedding = $6,
        liveness_score = $7,
        face_match_score = $8,
        updated_at = $9
    WHERE id = $1
"#;

const DELETE_SESSION: &str = "DELETE FROM verification_sessions WHERE id = $1";

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name)
        .map_err(|_| AppError::MissingData(name.to_string()))
}

impl PgSessionStore {
    fn row_to_session(&self, row: &Row) -> Result<VerificationSession> {
        let Json(doc_data): Json<DocData> = column(row, "doc_data")?;
        let id_card: Option<Vec<u8>> = column(row, "id_card_embedding")?;
        let selfie: Option<Vec<u8>> = column(row, "selfie_embedding")?;

        Ok(VerificationSession {
            id: column(row, "id")?,
            user_id: column(row, "user_id")?,
            rut: column(row, "rut")?,
            status: column(row, "status")?,
            doc_data,
            embeddings: Embeddings {
                id_card_front: embedding::open_optional(&self.key, id_card.as_deref())?,
                selfie: embedding::open_optional(&self.key, selfie.as_deref())?,
            },
            scores: Scores {
                liveness: column(row, "liveness_score")?,
                face_match: column(row, "face_match_score")?,
            },
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }

    fn seal_embeddings(&self, embeddings: &Embeddings) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        Ok((
            embedding::seal_optional(&self.key, embeddings.id_card_front.as_deref())?,
            embedding::seal_optional(&self.key, embeddings.selfie.as_deref())?,
        ))
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &VerificationSession) -> Result<()> {
        let (id_card, selfie) = self.seal_embeddings(&session.embeddings)?;
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(INSERT_SESSION).await?;

        client
            .execute(
                &statement,
                &[
                    &session.id,
                    &session.user_id,
                    &session.rut,
                    &session.status,
                    &Json(&session.doc_data),
                    &id_card,
                    &selfie,
                    &session.scores.liveness,
                    &session.scores.face_match,
                    &session.created_at,
                    &session.updated_at,
                ],
            )
            .await?;

        tracing::debug!("💾 Session {} inserted", session.id);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<VerificationSession>> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(SELECT_SESSION).await?;
        let row = client.query_opt(&statement, &[&id]).await?;
        row.map(|r| self.row_to_session(&r)).transpose()
    }

    async fn update(&self, session: &VerificationSession) -> Result<()> {
        let (id_card, selfie) = self.seal_embeddings(&session.embeddings)?;
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(UPDATE_SESSION).await?;

        let updated = client
            .execute(
                &statement,
                &[
                    &session.id,
                    &session.rut,
                    &session.status,
                    &Json(&session.doc_data),
                    &id_card,
                    &selfie,
                    &session.scores.liveness,
                    &session.scores.face_match,
                    &session.updated_at,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound);
        }
        tracing::debug!("💾 Session {} updated", session.id);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(DELETE_SESSION).await?;
        let deleted = client.execute(&statement, &[&id]).await?;
        Ok(deleted > 0)
    }
}

/// In-process store for local runs and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, VerificationSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &VerificationSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(AppError::Internal(format!(
                "Session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<VerificationSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: &VerificationSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(AppError::NotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::VerificationStatus;

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemorySessionStore::new();
        let mut session = VerificationSession::new(None);

        store.insert(&session).await.unwrap();
        assert!(store.insert(&session).await.is_err());

        session.rut = Some("123456785".into());
        session.transition(VerificationStatus::PendingDocumentBack);
        store.update(&session).await.unwrap();

        let found = store.find(session.id).await.unwrap().unwrap();
        assert_eq!(found.status, VerificationStatus::PendingDocumentBack);
        assert_eq!(found.rut.as_deref(), Some("123456785"));

        assert!(store.delete(session.id).await.unwrap());
        assert!(!store.delete(session.id).await.unwrap());
        assert!(store.find(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn updating_unknown_session_is_not_found() {
        let store = MemorySessionStore::new();
        let session = VerificationSession::new(None);
        assert!(matches!(store.update(&session).await, Err(AppError::NotFound)));
    }
}
