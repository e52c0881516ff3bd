//! Capture history and admin views.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::ApiError;
use crate::session::SessionToken;
use crate::store::{SnapshotRecord, UserSummary};

/// `GET /history`: the signed-in user's captures, newest first.
pub async fn my_history(
    State(state): State<AppState>,
    token: SessionToken,
) -> Result<Json<Vec<SnapshotRecord>>, ApiError> {
    let (_, _, user) = state.require_user(&token)?;
    let records = state.accounts.store().history_for(&user.username).await?;
    Ok(Json(records))
}

#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub users: Vec<UserSummary>,
    pub history: Vec<SnapshotRecord>,
}

/// `GET /admin/dashboard`
pub async fn admin_dashboard(
    State(state): State<AppState>,
    token: SessionToken,
) -> Result<Json<AdminDashboard>, ApiError> {
    state.require_admin(&token)?;
    let store = state.accounts.store();
    Ok(Json(AdminDashboard {
        users: store.list_users().await?,
        history: store.all_history().await?,
    }))
}

/// `DELETE /admin/users/{id}`: remove a non-admin account.
pub async fn delete_user(
    State(state): State<AppState>,
    token: SessionToken,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let admin = state.require_admin(&token)?;
    let Some(username) = state.accounts.store().delete_user(id).await? else {
        return Err(ApiError::NotFound(format!("no removable user with id {id}")));
    };
    let signed_out = state.sessions.remove_user(&username);
    tracing::info!(id, username = %username, signed_out, by = %admin.username, "user deleted");
    Ok(Json(json!({"status": "success", "redirect": "/admin_dashboard"})))
}
