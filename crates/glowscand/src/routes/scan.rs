//! Live stream, latest label and snapshot capture.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{with_cookie, AppState};
use crate::error::ApiError;
use crate::session::{session_cookie, Session, SessionToken};
use crate::stream;

/// `GET /video`: start a pipeline and stream annotated frames until the client leaves.
pub async fn video(State(state): State<AppState>) -> Result<Response, ApiError> {
    let chunks = state.pipeline.start_stream().await?;
    let body = Body::from_stream(ReceiverStream::new(chunks).map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, stream::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response())
}

/// `GET /hasil_ai`: the current label text, as plain text.
pub async fn latest_result(State(state): State<AppState>) -> String {
    state.publisher.read_label()
}

/// `GET /frame`: the most recently published annotated frame as a JPEG.
pub async fn latest_frame(State(state): State<AppState>) -> Result<Response, ApiError> {
    let jpeg = state.publisher.read_frame().ok_or(ApiError::NoFrameYet)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        jpeg,
    )
        .into_response())
}

/// `POST /capture`: keep the current label in the session and, when signed in, in history.
pub async fn capture(State(state): State<AppState>, token: SessionToken) -> Result<Response, ApiError> {
    let session = state.session(&token);
    let username = session
        .as_ref()
        .and_then(|(_, s)| s.user.as_ref())
        .map(|u| u.username.clone());

    let snapshot = state.capture.capture(username.as_deref()).await?;
    let text = snapshot.label_text;

    let new_token = match session {
        Some((token, _)) => {
            let last = text.clone();
            state.sessions.update(&token, move |s| s.last_analysis = Some(last));
            None
        }
        None => Some(state.sessions.create(Session {
            user: None,
            last_analysis: Some(text.clone()),
        })),
    };

    let response = Json(json!({
        "status": "success",
        "hasil": text,
        "redirect": "/konsultasi",
    }))
    .into_response();
    Ok(match new_token {
        Some(token) => with_cookie(response, &session_cookie(&token)),
        None => response,
    })
}
