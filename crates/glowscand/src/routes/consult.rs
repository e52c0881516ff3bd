//! Skin-care consultation about the last captured analysis.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::advisor::{consult, GREETING_QUESTION};
use crate::error::ApiError;
use crate::session::SessionToken;

/// Scan text used when the session has no capture yet.
pub const NO_SCAN_TEXT: &str = "No scan result yet.";

#[derive(Debug, Deserialize)]
pub struct Question {
    pub pertanyaan: String,
}

#[derive(Debug, Serialize)]
pub struct ConsultReply {
    pub user: String,
    pub hasil_scan: String,
    pub jawaban: Option<String>,
    pub error: Option<String>,
}

/// `GET /konsultasi`: greet with advice when an analysis has been captured.
pub async fn greet(
    State(state): State<AppState>,
    token: SessionToken,
) -> Result<Json<ConsultReply>, ApiError> {
    let (_, session, user) = state.require_user(&token)?;
    let Some(scan) = session.last_analysis else {
        return Ok(Json(ConsultReply {
            user: user.username,
            hasil_scan: NO_SCAN_TEXT.to_string(),
            jawaban: None,
            error: None,
        }));
    };

    let consultation = consult(state.advisor.as_deref(), GREETING_QUESTION, &scan).await;
    Ok(Json(ConsultReply {
        user: user.username,
        hasil_scan: scan,
        jawaban: consultation.answer,
        error: consultation.error,
    }))
}

/// `POST /konsultasi`: answer the user's question.
pub async fn ask(
    State(state): State<AppState>,
    token: SessionToken,
    payload: Result<Json<Question>, JsonRejection>,
) -> Result<Json<ConsultReply>, ApiError> {
    let (_, session, user) = state.require_user(&token)?;
    let Json(question) = payload?;
    let question = question.pertanyaan.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".into()));
    }

    let scan = session.last_analysis.unwrap_or_else(|| NO_SCAN_TEXT.to_string());
    let consultation = consult(state.advisor.as_deref(), question, &scan).await;
    Ok(Json(ConsultReply {
        user: user.username,
        hasil_scan: scan,
        jawaban: consultation.answer,
        error: consultation.error,
    }))
}
