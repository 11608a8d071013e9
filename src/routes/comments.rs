use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::Comment;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::notifications::{self, NewNotification, NotificationKind};
use crate::realtime::topics;
use crate::routes::users::{summary_from_row, SUMMARY_COLUMNS};
use crate::state::AppState;
use crate::votes::repository::find_target;
use crate::votes::TargetKind;

pub const MAX_COMMENT_LEN: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/questions/{id}/comments",
            get(list_question_comments).post(create_question_comment),
        )
        .route(
            "/answers/{id}/comments",
            get(list_answer_comments).post(create_answer_comment),
        )
        .route("/comments/{id}", delete(delete_comment))
}

fn comment_select() -> String {
    format!(
        "SELECT c.id, c.target_id, c.target_kind, c.body, c.created_at, {}
         FROM comments c JOIN users u ON u.id = c.author_id",
        SUMMARY_COLUMNS
    )
}

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        target_id: row.get(1)?,
        target_kind: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        author: summary_from_row(row, 5)?,
    })
}

/// Oldest first.
pub fn comments_for(
    conn: &rusqlite::Connection,
    kind: TargetKind,
    target_id: &str,
) -> rusqlite::Result<Vec<Comment>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE c.target_kind = ?1 AND c.target_id = ?2
         ORDER BY c.created_at ASC, c.id ASC",
        comment_select()
    ))?;
    let comments = stmt
        .query_map(params![kind, target_id], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

pub fn validate_comment(body: &str) -> AppResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(AppError::BadRequest("Comment cannot be empty".into()));
    }
    if body.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::BadRequest(format!(
            "Comment must be {} characters or less",
            MAX_COMMENT_LEN
        )));
    }
    Ok(body.to_string())
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

async fn list_comments(
    state: AppState,
    kind: TargetKind,
    target_id: String,
) -> AppResult<Json<Vec<Comment>>> {
    let conn = state.db.get()?;
    if find_target(&conn, &target_id, kind)?.is_none() {
        return Err(AppError::NotFound);
    }
    Ok(Json(comments_for(&conn, kind, &target_id)?))
}

async fn create_comment(
    state: AppState,
    user: CurrentUser,
    kind: TargetKind,
    target_id: String,
    req: CommentRequest,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let body = validate_comment(&req.body)?;

    let conn = state.db.get()?;
    let target = find_target(&conn, &target_id, kind)?.ok_or(AppError::NotFound)?;

    let comment_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO comments (id, target_id, target_kind, author_id, body)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![comment_id, target_id, kind, user.id, body],
    )?;
    let comment = conn
        .query_row(
            &format!("{} WHERE c.id = ?1", comment_select()),
            params![comment_id],
            comment_from_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;

    notifications::create_best_effort(
        &conn,
        state.broadcaster.as_ref(),
        &NewNotification {
            recipient_id: &target.author_id,
            actor_id: &user.id,
            kind: NotificationKind::NewComment,
            target_id: &target_id,
            target_kind: kind,
            message: format!("{} commented on your {}", user.username, kind),
        },
    );
    state.broadcaster.publish(
        &topics::target(kind, &target_id),
        json!({ "type": "comment", "action": "created", "comment": comment }),
    );

    Ok((StatusCode::CREATED, Json(comment)))
}

/// GET /api/questions/{id}/comments
async fn list_question_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Comment>>> {
    list_comments(state, TargetKind::Question, id).await
}

/// GET /api/answers/{id}/comments
async fn list_answer_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Comment>>> {
    list_comments(state, TargetKind::Answer, id).await
}

/// POST /api/questions/{id}/comments
async fn create_question_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    create_comment(state, user, TargetKind::Question, id, req).await
}

/// POST /api/answers/{id}/comments
async fn create_answer_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    create_comment(state, user, TargetKind::Answer, id, req).await
}

/// DELETE /api/comments/{id}
async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;

    let author_id: String = conn
        .query_row(
            "SELECT author_id FROM comments WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(AppError::NotFound)?;

    if author_id != user.id && !user.is_admin {
        return Err(AppError::Forbidden);
    }

    conn.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
    Ok(StatusCode::NO_CONTENT)
}
