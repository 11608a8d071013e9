use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::notifications;
use crate::routes::pagination::{Page, Paging};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
}

#[derive(Deserialize)]
pub struct NotificationsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub unread: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    #[serde(flatten)]
    pub page: Page<Notification>,
    pub unread_count: i64,
}

/// GET /api/notifications
async fn list_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<NotificationsQuery>,
) -> AppResult<Json<NotificationPage>> {
    let paging = Paging::new(query.page, query.limit);
    let conn = state.db.get()?;

    let (items, total) = notifications::list(
        &conn,
        &user.id,
        query.unread,
        paging.limit,
        paging.offset(),
    )?;
    let unread_count = notifications::unread_count(&conn, &user.id)?;

    Ok(Json(NotificationPage {
        page: Page::new(items, paging, total),
        unread_count,
    }))
}

/// POST /api/notifications/{id}/read
async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    if !notifications::mark_read(&conn, &user.id, &id)? {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/notifications/read-all
async fn mark_all_read(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Value>> {
    let conn = state.db.get()?;
    let updated = notifications::mark_all_read(&conn, &user.id)?;
    tracing::debug!(user = %user.id, updated, "Notifications marked read");
    Ok(Json(json!({ "updated": updated })))
}
