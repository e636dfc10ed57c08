//! Face-embedding similarity and client/server trust-score reconciliation.

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::session::VerificationStatus;
use crate::validation::verification::{validate_embedding, validate_score};

/// Largest accepted gap between a client face-match score and the server's.
pub const FACE_MATCH_TOLERANCE: f32 = 0.15;

pub const VERIFIED_MIN_LIVENESS: f32 = 0.7;
pub const VERIFIED_MIN_FACE_MATCH: f32 = 0.8;
pub const REJECT_BELOW_LIVENESS: f32 = 0.4;
pub const REJECT_BELOW_FACE_MATCH: f32 = 0.5;

/// Cosine similarity of two embeddings.
///
/// Returns `0.0` when either vector is empty, the lengths differ or a norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Who produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Submitted by the capturing device.
    Client,
    /// Recomputed from embeddings on the server.
    Server,
}

/// What the client submitted with the selfie.
#[derive(Debug, Clone, Copy)]
pub struct ClientEvidence<'a> {
    pub liveness: f32,
    pub face_match: Option<f32>,
    pub embedding: Option<&'a [f32]>,
}

/// Scores after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    pub liveness: f32,
    pub face_match: f32,
    pub face_match_source: ScoreSource,
    pub flagged_for_review: bool,
}

/// Rejects out-of-range scores and malformed embeddings before anything is stored.
pub fn validate_evidence(client: &ClientEvidence<'_>) -> Result<()> {
    validate_score("liveness", client.liveness)?;
    if let Some(face_match) = client.face_match {
        validate_score("faceMatch", face_match)?;
    }
    if let Some(embedding) = client.embedding {
        validate_embedding("embedding", embedding)?;
    }
    Ok(())
}

/// Reconciles client scores with what the server can recompute.
///
/// The server face-match is the similarity between the stored ID-card
/// embedding and the selfie embedding, preferring one extracted by the
/// server's own face engine over the client-submitted one. When both sources
/// exist the server value is used; a gap above [`FACE_MATCH_TOLERANCE`]
/// additionally flags the session for review.
///
/// # Arguments
///
/// * `client` - Liveness, face-match and embedding submitted by the client.
/// * `server_selfie` - The selfie embedding from the server face engine, if any.
/// * `id_card` - The stored ID-card embedding.
///
/// # Returns
///
/// A validation error for out-of-range input or when no face-match signal exists at all.
pub fn reconcile(
    client: ClientEvidence<'_>,
    server_selfie: Option<&[f32]>,
    id_card: Option<&[f32]>,
) -> Result<Reconciled> {
    validate_evidence(&client)?;

    let server_face_match = id_card.and_then(|id_card| {
        let selfie = server_selfie.or(client.embedding)?;
        if selfie.len() != id_card.len() {
            tracing::warn!(
                id_card = id_card.len(),
                selfie = selfie.len(),
                "⚠️  Embedding dimensions differ, skipping server face match"
            );
            return None;
        }
        Some(cosine_similarity(id_card, selfie).clamp(0.0, 1.0))
    });

    let (face_match, face_match_source, flagged_for_review) =
        match (client.face_match, server_face_match) {
            (Some(client_score), Some(server_score)) => {
                let flagged = (client_score - server_score).abs() > FACE_MATCH_TOLERANCE;
                if flagged {
                    tracing::warn!(
                        client = client_score,
                        server = server_score,
                        "🚩 Client face match disagrees with server, flagging for review"
                    );
                }
                (server_score, ScoreSource::Server, flagged)
            }
            (None, Some(server_score)) => (server_score, ScoreSource::Server, false),
            (Some(client_score), None) => (client_score, ScoreSource::Client, false),
            (None, None) => {
                return Err(AppError::Validation(
                    "No face match signal: submit a faceMatch score or an embedding".to_string(),
                ));
            }
        };

    Ok(Reconciled {
        liveness: client.liveness,
        face_match,
        face_match_source,
        flagged_for_review,
    })
}

/// Maps reconciled scores to the terminal session status.
pub fn decide(scores: &Reconciled) -> VerificationStatus {
    if scores.flagged_for_review {
        return VerificationStatus::PendingReview;
    }
    if scores.liveness >= VERIFIED_MIN_LIVENESS && scores.face_match >= VERIFIED_MIN_FACE_MATCH {
        VerificationStatus::Verified
    } else if scores.liveness < REJECT_BELOW_LIVENESS {
        VerificationStatus::RejectedLiveness
    } else if scores.face_match < REJECT_BELOW_FACE_MATCH {
        VerificationStatus::RejectedFaceMismatch
    } else {
        VerificationStatus::PendingReview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(seed: f32) -> Vec<f32> {
        (0..128).map(|i| ((i as f32) * 0.37 + seed).sin()).collect()
    }

    fn client(liveness: f32, face_match: Option<f32>) -> ClientEvidence<'static> {
        ClientEvidence {
            liveness,
            face_match,
            embedding: None,
        }
    }

    fn scores(liveness: f32, face_match: f32) -> Reconciled {
        Reconciled {
            liveness,
            face_match,
            face_match_source: ScoreSource::Client,
            flagged_for_review: false,
        }
    }

    #[test]
    fn cosine_of_vector_with_itself_is_one() {
        let v = embedding(1.0);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_are_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < 0.0);
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide(&scores(0.8, 0.85)), VerificationStatus::Verified);
        assert_eq!(decide(&scores(0.2, 0.9)), VerificationStatus::RejectedLiveness);
        assert_eq!(decide(&scores(0.8, 0.3)), VerificationStatus::RejectedFaceMismatch);
        assert_eq!(decide(&scores(0.5, 0.6)), VerificationStatus::PendingReview);
    }

    #[test]
    fn flag_forces_review() {
        let mut flagged = scores(0.95, 0.95);
        flagged.flagged_for_review = true;
        assert_eq!(decide(&flagged), VerificationStatus::PendingReview);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        assert!(matches!(
            reconcile(client(1.2, Some(0.9)), None, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            reconcile(client(0.9, Some(-0.1)), None, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            reconcile(client(f32::NAN, Some(0.9)), None, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn short_client_embedding_is_rejected() {
        let short = vec![0.1; 16];
        let evidence = ClientEvidence {
            liveness: 0.9,
            face_match: Some(0.9),
            embedding: Some(&short),
        };
        assert!(matches!(reconcile(evidence, None, None), Err(AppError::Validation(_))));
    }

    #[test]
    fn client_score_used_without_server_signal() {
        let result = reconcile(client(0.9, Some(0.85)), None, None).unwrap();
        assert_eq!(result.face_match, 0.85);
        assert_eq!(result.face_match_source, ScoreSource::Client);
        assert!(!result.flagged_for_review);
    }

    #[test]
    fn no_signal_at_all_fails() {
        assert!(matches!(
            reconcile(client(0.9, None), None, Some(&embedding(1.0))),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn server_wins_and_flags_beyond_tolerance() {
        let id_card = embedding(1.0);
        let selfie = embedding(1.0);
        let result = reconcile(client(0.9, Some(0.3)), Some(&selfie), Some(&id_card)).unwrap();

        assert!((result.face_match - 1.0).abs() < 1e-6);
        assert_eq!(result.face_match_source, ScoreSource::Server);
        assert!(result.flagged_for_review);
        assert_eq!(decide(&result), VerificationStatus::PendingReview);
    }

    #[test]
    fn server_value_within_tolerance_is_not_flagged() {
        let id_card = embedding(1.0);
        let result = reconcile(client(0.9, Some(0.95)), Some(&id_card), Some(&id_card)).unwrap();

        assert_eq!(result.face_match_source, ScoreSource::Server);
        assert!(!result.flagged_for_review);
        assert_eq!(decide(&result), VerificationStatus::Verified);
    }

    #[test]
    fn client_embedding_feeds_server_recomputation() {
        let id_card = embedding(1.0);
        let evidence = ClientEvidence {
            liveness: 0.9,
            face_match: None,
            embedding: Some(&id_card),
        };
        let result = reconcile(evidence, None, Some(&id_card)).unwrap();

        assert_eq!(result.face_match_source, ScoreSource::Server);
        assert_eq!(decide(&result), VerificationStatus::Verified);
    }

    #[test]
    fn mismatched_dimensions_fall_back_to_client() {
        let id_card = embedding(1.0);
        let selfie: Vec<f32> = embedding(1.0).into_iter().take(64).collect();
        let result = reconcile(client(0.9, Some(0.82)), Some(&selfie), Some(&id_card)).unwrap();

        assert_eq!(result.face_match_source, ScoreSource::Client);
        assert_eq!(result.face_match, 0.82);
    }
}
