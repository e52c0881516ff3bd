//! HTTP routes.

pub mod auth;
pub mod consult;
pub mod history;
pub mod scan;

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::accounts::Accounts;
use crate::advisor::Advisor;
use crate::capture::SnapshotCapture;
use crate::error::ApiError;
use crate::pipeline::PipelineContext;
use crate::publisher::AnalysisPublisher;
use crate::session::{Session, SessionStore, SessionToken, SessionUser};
use crate::store::Role;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PipelineContext>,
    pub publisher: Arc<AnalysisPublisher>,
    pub capture: Arc<SnapshotCapture>,
    pub accounts: Accounts,
    pub sessions: Arc<SessionStore>,
    /// `None` when no API key is configured.
    pub advisor: Option<Arc<dyn Advisor>>,
    pub camera_device: Arc<str>,
}

impl AppState {
    /// The session behind the request's cookie, if it is still live.
    pub fn session(&self, token: &SessionToken) -> Option<(String, Session)> {
        let token = token.0.as_deref()?;
        self.sessions.get(token).map(|s| (token.to_string(), s))
    }

    pub fn require_user(&self, token: &SessionToken) -> Result<(String, Session, SessionUser), ApiError> {
        let (token, session) = self.session(token).ok_or(ApiError::Unauthorized)?;
        let user = session.user.clone().ok_or(ApiError::Unauthorized)?;
        Ok((token, session, user))
    }

    pub fn require_admin(&self, token: &SessionToken) -> Result<SessionUser, ApiError> {
        let (_, _, user) = self.require_user(token)?;
        if user.role != Role::Admin {
            return Err(ApiError::Forbidden);
        }
        Ok(user)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video", get(scan::video))
        .route("/hasil_ai", get(scan::latest_result))
        .route("/frame", get(scan::latest_frame))
        .route("/capture", post(scan::capture))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/history", get(history::my_history))
        .route("/admin/dashboard", get(history::admin_dashboard))
        .route("/admin/users/{id}", delete(history::delete_user))
        .route("/konsultasi", get(consult::greet).post(consult::ask))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub camera_device: String,
    pub active_streams: usize,
    pub active_sessions: usize,
    pub frames_published: u64,
    pub label: String,
    pub advisor_configured: bool,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let published = state.publisher.snapshot();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        camera_device: state.camera_device.to_string(),
        active_streams: state.pipeline.active_streams(),
        active_sessions: state.sessions.len(),
        frames_published: published.sequence,
        label: published.label_text(),
        advisor_configured: state.advisor.is_some(),
    })
}

/// Append a `Set-Cookie` header to a response.
pub(crate) fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "refusing to send malformed cookie"),
    }
    response
}
