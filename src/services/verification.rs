//! The verification session state machine.
//!
//! `PENDING_DOCUMENT_FRONT` → `PENDING_DOCUMENT_BACK` → `PENDING_LIVENESS` → one
//! terminal decision. Every step loads the session, checks it is the step the
//! session expects, calls its collaborators under a timeout and writes the
//! session back once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::biometric::{self, ClientEvidence, Reconciled};
use crate::error::{AppError, Result};
use crate::extraction::back_document::{self, BackDocumentPolicy, BackSignals};
use crate::extraction::fields;
use crate::models::session::{ImageRef, Scores, Step, VerificationSession, VerificationStatus};
use crate::repositories::session::SessionStore;
use crate::services::face::FaceEngine;
use crate::services::ocr::OcrEngine;
use crate::validation::rut;
use crate::validation::verification::validate_embedding;

/// Result of the front step.
#[derive(Debug, Clone)]
pub struct FrontOutcome {
    pub session: VerificationSession,
    pub extracted_rut: Option<String>,
    pub extracted_name: Option<String>,
}

/// Result of the back step; the signal map is always present.
#[derive(Debug, Clone)]
pub struct BackOutcome {
    pub session: VerificationSession,
    pub accepted: bool,
    pub matched_rule: Option<&'static str>,
    pub signals: BackSignals,
}

/// Result of the selfie step.
#[derive(Debug, Clone)]
pub struct SelfieOutcome {
    pub session: VerificationSession,
    pub reconciled: Reconciled,
}

/// Client data submitted with the selfie.
#[derive(Debug, Clone)]
pub struct SelfieSubmission {
    pub image: ImageRef,
    pub liveness: f32,
    pub face_match: Option<f32>,
    pub embedding: Option<Vec<f32>>,
}

/// Drives verification sessions through the pipeline.
#[derive(Clone)]
pub struct VerificationService {
    store: Arc<dyn SessionStore>,
    ocr: Arc<dyn OcrEngine>,
    face: Option<Arc<dyn FaceEngine>>,
    collaborator_timeout: Duration,
    back_policy: BackDocumentPolicy,
}

impl VerificationService {
    /// Creates a new `VerificationService`.
    ///
    /// # Arguments
    ///
    /// * `store` - Where sessions are persisted.
    /// * `ocr` - The OCR engine.
    /// * `face` - The server-side face engine, when this deployment has one.
    /// * `collaborator_timeout` - Upper bound for every OCR / face engine call.
    /// * `back_policy` - Strictness of the back-of-card acceptance rules.
    pub fn new(
        store: Arc<dyn SessionStore>,
        ocr: Arc<dyn OcrEngine>,
        face: Option<Arc<dyn FaceEngine>>,
        collaborator_timeout: Duration,
        back_policy: BackDocumentPolicy,
    ) -> Self {
        Self {
            store,
            ocr,
            face,
            collaborator_timeout,
            back_policy,
        }
    }

    pub fn has_face_engine(&self) -> bool {
        self.face.is_some()
    }

    /// Creates a session at `PENDING_DOCUMENT_FRONT`.
    pub async fn start(&self, user_id: Option<Uuid>) -> Result<VerificationSession> {
        let session = VerificationSession::new(user_id);
        self.store.insert(&session).await?;
        tracing::info!("🆕 Verification session {} started", session.id);
        Ok(session)
    }

    /// Loads a session without mutating it.
    pub async fn status(&self, id: Uuid) -> Result<VerificationSession> {
        self.load(id).await
    }

    /// Reads the front of the card.
    ///
    /// Without a valid identifier the session stays at the front step so the
    /// caller can retry with a better capture.
    ///
    /// # Arguments
    ///
    /// * `id` - The session id.
    /// * `image` - The front-of-card image.
    /// * `client_embedding` - ID-photo embedding computed on the device, used
    ///   when the server has no face engine or it finds no face.
    pub async fn submit_front(
        &self,
        id: Uuid,
        image: ImageRef,
        client_embedding: Option<Vec<f32>>,
    ) -> Result<FrontOutcome> {
        let mut session = self.load(id).await?;
        session.ensure_step(Step::DocumentFront)?;
        if let Some(embedding) = client_embedding.as_deref() {
            validate_embedding("idCardEmbedding", embedding)?;
        }

        let text = self.ocr_text(&image).await?;
        let front = fields::parse_front(&text);

        let Some(extracted_rut) = front.rut.clone() else {
            tracing::info!(
                "🔍 No valid RUN on front of session {} ({} chars of text), awaiting retry",
                session.id,
                text.trim().len()
            );
            return Ok(FrontOutcome {
                session,
                extracted_rut: None,
                extracted_name: None,
            });
        };

        let id_card_embedding = match self.server_embedding(&image).await {
            Some(embedding) => Some(embedding),
            None => client_embedding,
        };
        if id_card_embedding.is_none() {
            tracing::warn!(
                "⚠️  No ID-card embedding for session {}, selfie step will be refused",
                session.id
            );
        }

        session.rut = Some(extracted_rut.clone());
        session.doc_data.apply_front(front, image.as_str());
        session.embeddings.id_card_front = id_card_embedding;
        session.transition(VerificationStatus::PendingDocumentBack);
        self.store.update(&session).await?;

        tracing::info!(
            "🪪 Front accepted for session {} (RUN {})",
            session.id,
            rut::mask(&extracted_rut)
        );

        let extracted_name = session.doc_data.full_name.clone();
        Ok(FrontOutcome {
            session,
            extracted_rut: Some(extracted_rut),
            extracted_name,
        })
    }

    /// Validates the back of the card and merges what it carries.
    ///
    /// Blank OCR text is an empty extraction: nothing changes and the caller
    /// may retry. A rejected back is terminal (`REJECTED_DOC`).
    pub async fn submit_back(&self, id: Uuid, image: ImageRef) -> Result<BackOutcome> {
        let mut session = self.load(id).await?;
        session.ensure_step(Step::DocumentBack)?;

        let text = self.ocr_text(&image).await?;
        if text.trim().is_empty() {
            tracing::warn!("⚠️  Empty OCR text for back of session {}", session.id);
            return Ok(BackOutcome {
                session,
                accepted: false,
                matched_rule: None,
                signals: BackSignals::default(),
            });
        }

        let validation = back_document::validate(&text, self.back_policy);
        let mrz_raw = validation.mrz_raw();

        session.doc_data.reset_back(image.as_str());
        session.doc_data.has_mrz = Some(validation.signals.has_mrz);
        session.doc_data.has_qr = Some(validation.signals.has_qr_indicator);
        session.doc_data.mrz_raw = mrz_raw;

        if !validation.accepted {
            tracing::info!(
                signals = ?validation.signals,
                "❌ Back document rejected for session {}",
                session.id
            );
            session.transition(VerificationStatus::RejectedDoc);
            self.store.update(&session).await?;
            return Ok(BackOutcome {
                session,
                accepted: false,
                matched_rule: None,
                signals: validation.signals,
            });
        }

        session
            .doc_data
            .apply_back(back_document::parse_back_fields(&text));

        if let Some(mut mrz) = validation.mrz.clone().filter(|_| validation.signals.has_mrz) {
            mrz.rut = mrz.rut.filter(|candidate| rut::validate(candidate));
            self.cross_check(&session, mrz.rut.as_deref(), mrz.document_number.as_deref());
            session.doc_data.apply_mrz(mrz);
            session.rut = session.doc_data.rut.clone();
        }

        session.transition(VerificationStatus::PendingLiveness);
        self.store.update(&session).await?;

        Ok(BackOutcome {
            session,
            accepted: true,
            matched_rule: validation.matched_rule,
            signals: validation.signals,
        })
    }

    /// Scores the selfie and records the terminal decision.
    pub async fn submit_selfie(&self, id: Uuid, selfie: SelfieSubmission) -> Result<SelfieOutcome> {
        let mut session = self.load(id).await?;
        session.ensure_step(Step::Liveness)?;

        let Some(id_card) = session.embeddings.id_card().map(<[f32]>::to_vec) else {
            return Err(AppError::Workflow(format!(
                "Session {} has no ID-card embedding; resubmit the front of the document in a new session",
                session.id
            )));
        };

        let evidence = ClientEvidence {
            liveness: selfie.liveness,
            face_match: selfie.face_match,
            embedding: selfie.embedding.as_deref(),
        };
        biometric::validate_evidence(&evidence)?;

        let server_selfie = self.server_embedding(&selfie.image).await;
        let reconciled = biometric::reconcile(evidence, server_selfie.as_deref(), Some(&id_card))?;
        let decision = biometric::decide(&reconciled);

        session.scores = Scores {
            liveness: Some(reconciled.liveness),
            face_match: Some(reconciled.face_match),
        };
        session.embeddings.selfie = server_selfie.or(selfie.embedding);
        session.doc_data.selfie_image = Some(selfie.image.to_string());
        session.transition(decision);
        self.store.update(&session).await?;

        tracing::info!(
            liveness = reconciled.liveness,
            face_match = reconciled.face_match,
            source = ?reconciled.face_match_source,
            flagged = reconciled.flagged_for_review,
            "🧑 Selfie decided {} for session {}",
            decision.as_str(),
            session.id
        );

        Ok(SelfieOutcome {
            session,
            reconciled,
        })
    }

    async fn load(&self, id: Uuid) -> Result<VerificationSession> {
        self.store.find(id).await?.ok_or(AppError::NotFound)
    }

    /// Runs a collaborator call under the configured timeout.
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.collaborator_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::ExternalService(format!("{} failed: {:#}", what, e))),
            Err(_) => Err(AppError::ExternalService(format!(
                "{} timed out after {:?}",
                what, self.collaborator_timeout
            ))),
        }
    }

    async fn ocr_text(&self, image: &ImageRef) -> Result<String> {
        self.bounded("OCR", self.ocr.extract_text(image)).await
    }

    /// Server-side embedding; any failure degrades to `None`.
    async fn server_embedding(&self, image: &ImageRef) -> Option<Vec<f32>> {
        let engine = self.face.as_ref()?;
        match self.bounded("Face engine", engine.extract_embedding(image)).await {
            Ok(Some(embedding)) => match validate_embedding("serverEmbedding", &embedding) {
                Ok(()) => Some(embedding),
                Err(e) => {
                    tracing::warn!("⚠️  Discarding server embedding for {}: {}", image, e);
                    None
                }
            },
            Ok(None) => {
                tracing::info!("🙈 Face engine found no face in {}", image);
                None
            }
            Err(e) => {
                tracing::warn!("⚠️  {}; falling back to client data", e);
                None
            }
        }
    }

    fn cross_check(
        &self,
        session: &VerificationSession,
        mrz_rut: Option<&str>,
        mrz_document_number: Option<&str>,
    ) {
        if let (Some(front), Some(mrz)) = (session.rut.as_deref(), mrz_rut) {
            if front != mrz {
                tracing::warn!(
                    "⚠️  Session {} RUN mismatch: front {} vs MRZ {}, using MRZ",
                    session.id,
                    rut::mask(front),
                    rut::mask(mrz)
                );
            }
        }
        if let (Some(front), Some(mrz)) =
            (session.doc_data.document_number.as_deref(), mrz_document_number)
        {
            if front != mrz {
                tracing::warn!(
                    "⚠️  Session {} document number mismatch: front {} vs MRZ {}, using MRZ",
                    session.id,
                    front,
                    mrz
                );
            }
        }
    }
}
