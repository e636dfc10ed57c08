use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    biometric::ScoreSource,
    error::{AppError, Result},
    extraction::back_document::BackSignals,
    models::session::{ImageRef, Scores, Step, VerificationSession, VerificationStatus},
    services::verification::SelfieSubmission,
    state::AppState,
};

/// The request payload for starting a verification.
#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    #[garde(skip)]
    pub user_id: Option<Uuid>,
}

/// The request payload for the front-of-card step.
#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FrontRequest {
    #[garde(length(min = 1, max = 2048))]
    pub image_ref: String,
    /// ID-photo embedding computed on the device.
    #[serde(default)]
    #[garde(length(min = 64, max = 1024))]
    pub id_card_embedding: Option<Vec<f32>>,
}

/// The request payload for the back-of-card step.
#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackRequest {
    #[garde(length(min = 1, max = 2048))]
    pub image_ref: String,
}

/// The request payload for the selfie step.
#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelfieRequest {
    #[garde(length(min = 1, max = 2048))]
    pub image_ref: String,
    #[garde(range(min = 0.0, max = 1.0))]
    pub liveness: f32,
    #[serde(default)]
    #[garde(range(min = 0.0, max = 1.0))]
    pub face_match: Option<f32>,
    #[serde(default)]
    #[garde(length(min = 64, max = 1024))]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: Uuid,
    status: VerificationStatus,
    next_step: Option<Step>,
    scores: Scores,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&VerificationSession> for SessionResponse {
    fn from(session: &VerificationSession) -> Self {
        Self {
            id: session.id,
            status: session.status,
            next_step: session.status.next_step(),
            scores: session.scores,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrontResponse {
    id: Uuid,
    status: VerificationStatus,
    next_step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted_rut: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackResponse {
    id: Uuid,
    status: VerificationStatus,
    next_step: Option<Step>,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_rule: Option<&'static str>,
    signals: BackSignals,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SelfieResponse {
    id: Uuid,
    status: VerificationStatus,
    scores: Scores,
    face_match_source: ScoreSource,
    flagged_for_review: bool,
}

/// Runs the garde rules of a request body.
fn validate_body<T>(req: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    req.validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)
        .map_err(|e| AppError::Internal(format!("Failed to encode response: {}", e)))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Starts a verification session. The body is optional.
#[axum::debug_handler]
pub async fn start(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> Result<Response> {
    let user_id = match body {
        Some(Json(req)) => {
            validate_body(&req)?;
            req.user_id
        }
        None => None,
    };
    let session = state.verification.start(user_id).await?;
    json(StatusCode::CREATED, &SessionResponse::from(&session))
}

/// Submits the front of the identity card.
#[axum::debug_handler]
pub async fn submit_front(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FrontRequest>,
) -> Result<Response> {
    validate_body(&req)?;
    let image = ImageRef::parse(&req.image_ref)?;

    let outcome = state
        .verification
        .submit_front(id, image, req.id_card_embedding)
        .await?;

    json(
        StatusCode::OK,
        &FrontResponse {
            id: outcome.session.id,
            status: outcome.session.status,
            next_step: outcome.session.status.next_step(),
            extracted_rut: outcome.extracted_rut,
            extracted_name: outcome.extracted_name,
        },
    )
}

/// Submits the back of the identity card.
#[axum::debug_handler]
pub async fn submit_back(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BackRequest>,
) -> Result<Response> {
    validate_body(&req)?;
    let image = ImageRef::parse(&req.image_ref)?;

    let outcome = state.verification.submit_back(id, image).await?;

    json(
        StatusCode::OK,
        &BackResponse {
            id: outcome.session.id,
            status: outcome.session.status,
            next_step: outcome.session.status.next_step(),
            accepted: outcome.accepted,
            matched_rule: outcome.matched_rule,
            signals: outcome.signals,
        },
    )
}

/// Submits the selfie with the client's liveness and face-match evidence.
#[axum::debug_handler]
pub async fn submit_selfie(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SelfieRequest>,
) -> Result<Response> {
    validate_body(&req)?;
    let submission = SelfieSubmission {
        image: ImageRef::parse(&req.image_ref)?,
        liveness: req.liveness,
        face_match: req.face_match,
        embedding: req.embedding,
    };

    let outcome = state.verification.submit_selfie(id, submission).await?;

    json(
        StatusCode::OK,
        &SelfieResponse {
            id: outcome.session.id,
            status: outcome.session.status,
            scores: outcome.session.scores,
            face_match_source: outcome.reconciled.face_match_source,
            flagged_for_review: outcome.reconciled.flagged_for_review,
        },
    )
}

/// Returns the status, scores and timestamps of a session.
#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let session = state.verification.status(id).await?;
    json(StatusCode::OK, &SessionResponse::from(&session))
}
