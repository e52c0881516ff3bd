//! Registration, login and logout.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{with_cookie, AppState};
use crate::error::ApiError;
use crate::session::{expired_cookie, session_cookie, Session, SessionToken, SessionUser};
use crate::store::Role;

const MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    fn validate(&self) -> Result<&str, ApiError> {
        let username = self.username.trim();
        if username.is_empty() || self.password.is_empty() {
            return Err(ApiError::BadRequest("username and password are required".into()));
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(ApiError::BadRequest(format!(
                "username must be at most {MAX_USERNAME_LEN} characters"
            )));
        }
        Ok(username)
    }
}

/// `POST /register`
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(creds) = payload?;
    let username = creds.validate()?;
    state.accounts.register(username, &creds.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"status": "success", "redirect": "/"})),
    )
        .into_response())
}

/// `POST /login`: start a signed-in session, keeping any captured analysis.
pub async fn login(
    State(state): State<AppState>,
    token: SessionToken,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(creds) = payload?;
    let username = creds.validate()?;
    let user = state
        .accounts
        .authenticate(username, &creds.password)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    // Fresh token on every login; the previous session is retired.
    let last_analysis = token
        .0
        .as_deref()
        .and_then(|t| state.sessions.remove(t))
        .and_then(|s| s.last_analysis);
    let new_token = state.sessions.create(Session {
        user: Some(SessionUser {
            username: user.username.clone(),
            role: user.role,
        }),
        last_analysis,
    });

    let redirect = match user.role {
        Role::Admin => "/admin_dashboard",
        Role::User => "/dashboard",
    };
    tracing::info!(username = %user.username, role = ?user.role, "signed in");
    let response = Json(json!({
        "status": "success",
        "user": user.username,
        "role": user.role,
        "redirect": redirect,
    }))
    .into_response();
    Ok(with_cookie(response, &session_cookie(&new_token)))
}

/// `POST /logout`
pub async fn logout(State(state): State<AppState>, token: SessionToken) -> Response {
    if let Some(t) = token.0.as_deref() {
        state.sessions.remove(t);
    }
    let response = Json(json!({"status": "success", "redirect": "/"})).into_response();
    with_cookie(response, &expired_cookie())
}

#[cfg(test)]
mod tests {
    use crate::routes::tests::{cookie_from, get, post_empty, post_json, TestApp};
    use axum::http::{header, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let app = TestApp::new(&[], None).await;
        let creds = json!({"username": "ana", "password": "pw"});

        let (status, _, body) = app.send_json(post_json("/register", creds.clone(), None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "success");

        let (status, _, body) = app.send_json(post_json("/register", creds, None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "username already taken");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = TestApp::new(&[], None).await;
        let (status, _, body) = app
            .send_json(post_json("/register", json!({"username": "  ", "password": "pw"}), None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (status, _, body) = app
            .send_json(post_json("/register", json!({"username": "ana"}), None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error", "malformed body still gets a JSON error");
    }

    #[tokio::test]
    async fn test_login_sets_cookie_and_redirects() {
        let app = TestApp::new(&[], None).await;
        let cookie = app.sign_in("ana", "pw").await;
        let token = cookie.trim_start_matches("glowscan_session=");
        let session = app.state.sessions.get(token).unwrap();
        assert_eq!(session.user.unwrap().username, "ana");

        let (status, headers, body) = app
            .send_json(post_json("/login", json!({"username": "ana", "password": "pw"}), None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["redirect"], "/dashboard");
        assert_eq!(body["role"], "user");
        let set_cookie = headers[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_admin_login_redirect() {
        let app = TestApp::new(&[], None).await;
        app.state.accounts.seed_admin("root-pw").await.unwrap();
        let (status, _, body) = app
            .send_json(post_json("/login", json!({"username": "admin", "password": "root-pw"}), None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["redirect"], "/admin_dashboard");
    }

    #[tokio::test]
    async fn test_bad_credentials_401() {
        let app = TestApp::new(&[], None).await;
        app.sign_in("ana", "pw").await;
        for creds in [
            json!({"username": "ana", "password": "wrong"}),
            json!({"username": "nobody", "password": "pw"}),
        ] {
            let (status, headers, body) = app.send_json(post_json("/login", creds, None)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["message"], "invalid username or password");
            assert!(cookie_from(&headers).is_none());
        }
    }

    #[tokio::test]
    async fn test_login_keeps_captured_analysis() {
        let app = TestApp::new(&[200], None).await;
        app.sign_in("ana", "pw").await;
        let _ = app.send(get("/video", None)).await;
        let (_, headers, _) = app.send(post_empty("/capture", None)).await;
        let anonymous = cookie_from(&headers).unwrap();

        let login = post_json("/login", json!({"username": "ana", "password": "pw"}), Some(&anonymous));
        let (_, headers, _) = app.send(login).await;
        let signed_in = cookie_from(&headers).unwrap();
        assert_ne!(anonymous, signed_in);

        let session = app
            .state
            .sessions
            .get(signed_in.trim_start_matches("glowscan_session="))
            .unwrap();
        assert_eq!(session.last_analysis.as_deref(), Some("1 face detected. Condition: Glowing skin"));
        assert!(app.state.sessions.get(anonymous.trim_start_matches("glowscan_session=")).is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let app = TestApp::new(&[], None).await;
        let cookie = app.sign_in("ana", "pw").await;

        let (status, headers, _) = app.send(post_empty("/logout", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));

        let (status, _, _) = app.send(get("/history", Some(&cookie))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
