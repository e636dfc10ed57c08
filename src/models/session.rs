use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::doc_data::DocData;
use crate::validation::verification::validate_image_ref;

/// Status of a verification session.
///
/// The first three states form the ordered pipeline; every other state is a
/// sink and a retry requires a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[postgres(name = "verification_status")]
pub enum VerificationStatus {
    #[postgres(name = "PENDING_DOCUMENT_FRONT")]
    PendingDocumentFront,
    #[postgres(name = "PENDING_DOCUMENT_BACK")]
    PendingDocumentBack,
    #[postgres(name = "PENDING_LIVENESS")]
    PendingLiveness,
    #[postgres(name = "VERIFIED")]
    Verified,
    #[postgres(name = "REJECTED_DOC")]
    RejectedDoc,
    #[postgres(name = "REJECTED_LIVENESS")]
    RejectedLiveness,
    #[postgres(name = "REJECTED_FACE_MISMATCH")]
    RejectedFaceMismatch,
    #[postgres(name = "PENDING_REVIEW")]
    PendingReview,
}

impl VerificationStatus {
    /// Whether no handler may mutate a session in this status any more.
    pub fn is_terminal(self) -> bool {
        self.next_step().is_none()
    }

    /// The step the caller has to submit next, if any.
    pub fn next_step(self) -> Option<Step> {
        match self {
            VerificationStatus::PendingDocumentFront => Some(Step::DocumentFront),
            VerificationStatus::PendingDocumentBack => Some(Step::DocumentBack),
            VerificationStatus::PendingLiveness => Some(Step::Liveness),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::PendingDocumentFront => "PENDING_DOCUMENT_FRONT",
            VerificationStatus::PendingDocumentBack => "PENDING_DOCUMENT_BACK",
            VerificationStatus::PendingLiveness => "PENDING_LIVENESS",
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::RejectedDoc => "REJECTED_DOC",
            VerificationStatus::RejectedLiveness => "REJECTED_LIVENESS",
            VerificationStatus::RejectedFaceMismatch => "REJECTED_FACE_MISMATCH",
            VerificationStatus::PendingReview => "PENDING_REVIEW",
        }
    }
}

/// A step of the verification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DocumentFront,
    DocumentBack,
    Liveness,
}

/// Opaque reference to an uploaded image, resolved by the OCR and face engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn parse(raw: &str) -> Result<Self> {
        validate_image_ref(raw)?;
        Ok(Self(raw.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face embeddings captured during the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embeddings {
    /// Extracted from the photograph printed on the front of the card.
    pub id_card_front: Option<Vec<f32>>,
    /// Extracted from the live selfie.
    pub selfie: Option<Vec<f32>>,
}

impl Embeddings {
    /// The ID-card embedding, only when it actually carries values.
    pub fn id_card(&self) -> Option<&[f32]> {
        self.id_card_front.as_deref().filter(|e| !e.is_empty())
    }
}

/// Trust scores, each within `[0, 1]` once set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub liveness: Option<f32>,
    pub face_match: Option<f32>,
}

/// The single persisted verification record.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    /// The unique identifier for the session.
    pub id: Uuid,
    /// The account this session belongs to; absent for pre-registration flows.
    pub user_id: Option<Uuid>,
    /// The validated, normalized RUT once known.
    pub rut: Option<String>,
    /// The current pipeline status.
    pub status: VerificationStatus,
    /// Extracted document fields.
    pub doc_data: DocData,
    /// ID-card and selfie embeddings.
    pub embeddings: Embeddings,
    /// Liveness and face-match scores.
    pub scores: Scores,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
}

impl VerificationSession {
    /// Creates a session at the start of the pipeline.
    pub fn new(user_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            rut: None,
            status: VerificationStatus::PendingDocumentFront,
            doc_data: DocData::default(),
            embeddings: Embeddings::default(),
            scores: Scores::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fails with a workflow error unless `step` is the one this session expects.
    pub fn ensure_step(&self, step: Step) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::Workflow(format!(
                "Session {} is already {}; start a new verification",
                self.id,
                self.status.as_str()
            )));
        }

        if self.status.next_step() != Some(step) {
            return Err(AppError::Workflow(format!(
                "Session {} expects {:?}, got {:?}",
                self.id,
                self.status.next_step(),
                step
            )));
        }

        Ok(())
    }

    /// Moves the session to `status` and stamps `updated_at`.
    pub fn transition(&mut self, status: VerificationStatus) {
        if self.status != status {
            tracing::info!(
                "🔁 Session {} {} -> {}",
                self.id,
                self.status.as_str(),
                status.as_str()
            );
        }
        self.status = status;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_expects_front() {
        let session = VerificationSession::new(None);
        assert_eq!(session.status, VerificationStatus::PendingDocumentFront);
        assert!(session.ensure_step(Step::DocumentFront).is_ok());
        assert!(matches!(
            session.ensure_step(Step::Liveness),
            Err(AppError::Workflow(_))
        ));
    }

    #[test]
    fn terminal_sessions_reject_every_step() {
        let mut session = VerificationSession::new(None);
        session.transition(VerificationStatus::RejectedDoc);

        for step in [Step::DocumentFront, Step::DocumentBack, Step::Liveness] {
            assert!(matches!(session.ensure_step(step), Err(AppError::Workflow(_))));
        }
    }

    #[test]
    fn sink_statuses_are_terminal() {
        for status in [
            VerificationStatus::Verified,
            VerificationStatus::RejectedDoc,
            VerificationStatus::RejectedLiveness,
            VerificationStatus::RejectedFaceMismatch,
            VerificationStatus::PendingReview,
        ] {
            assert!(status.is_terminal(), "{}", status.as_str());
        }
        assert!(!VerificationStatus::PendingLiveness.is_terminal());
    }

    #[test]
    fn empty_id_card_embedding_counts_as_missing() {
        let mut embeddings = Embeddings::default();
        assert!(embeddings.id_card().is_none());
        embeddings.id_card_front = Some(Vec::new());
        assert!(embeddings.id_card().is_none());
        embeddings.id_card_front = Some(vec![0.5; 64]);
        assert_eq!(embeddings.id_card().map(|e| e.len()), Some(64));
    }

    #[test]
    fn image_refs_are_trimmed_and_checked() {
        assert_eq!(ImageRef::parse(" s3://kyc/front.jpg ").unwrap().as_str(), "s3://kyc/front.jpg");
        assert!(matches!(ImageRef::parse("   "), Err(AppError::Validation(_))));
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = sonic_rs::to_string(&VerificationStatus::RejectedFaceMismatch).unwrap();
        assert_eq!(json, "\"REJECTED_FACE_MISMATCH\"");
    }
}
