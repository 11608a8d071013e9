use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::models::Answer;
use crate::db::with_transaction;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::notifications::{self, NewNotification, NotificationKind};
use crate::realtime::topics;
use crate::routes::questions::{validate_body, MIN_BODY_LEN};
use crate::routes::users::{summary_from_row, SUMMARY_COLUMNS};
use crate::state::AppState;
use crate::votes::repository::adjust_reputation;
use crate::votes::TargetKind;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/questions/{id}/answers",
            get(list_answers).post(create_answer),
        )
        .route("/answers/{id}", patch(update_answer).delete(delete_answer))
        .route("/answers/{id}/accept", post(accept_answer))
}

fn answer_select() -> String {
    format!(
        "SELECT a.id, a.question_id, a.body, a.vote_score, a.is_accepted,
                a.created_at, a.updated_at, {}
         FROM answers a JOIN users u ON u.id = a.author_id",
        SUMMARY_COLUMNS
    )
}

fn answer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        question_id: row.get(1)?,
        body: row.get(2)?,
        vote_score: row.get(3)?,
        is_accepted: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        author: summary_from_row(row, 7)?,
    })
}

pub fn fetch_answer(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Answer>> {
    conn.query_row(
        &format!("{} WHERE a.id = ?1", answer_select()),
        params![id],
        answer_from_row,
    )
    .optional()
}

/// Accepted answer first, then highest score, then oldest.
pub fn answers_for_question(
    conn: &rusqlite::Connection,
    question_id: &str,
) -> rusqlite::Result<Vec<Answer>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE a.question_id = ?1
         ORDER BY a.is_accepted DESC, a.vote_score DESC, a.created_at ASC, a.id ASC",
        answer_select()
    ))?;
    let answers = stmt
        .query_map(params![question_id], answer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(answers)
}

/// (author_id, title, accepted_answer_id)
fn question_meta(
    conn: &rusqlite::Connection,
    question_id: &str,
) -> rusqlite::Result<Option<(String, String, Option<String>)>> {
    conn.query_row(
        "SELECT author_id, title, accepted_answer_id FROM questions WHERE id = ?1",
        params![question_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
}

/// (question_id, author_id)
fn answer_meta(
    conn: &rusqlite::Connection,
    answer_id: &str,
) -> rusqlite::Result<Option<(String, String)>> {
    conn.query_row(
        "SELECT question_id, author_id FROM answers WHERE id = ?1",
        params![answer_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

// -- Acceptance --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub accepted: bool,
    pub question_id: String,
    pub question_title: String,
    pub answer_author_id: String,
}

/// Award or take back the acceptance bonus. Accepting your own answer earns nothing.
fn reward(
    conn: &rusqlite::Connection,
    answer_author_id: &str,
    question_author_id: &str,
    delta: i64,
) -> rusqlite::Result<()> {
    if answer_author_id != question_author_id {
        adjust_reputation(conn, answer_author_id, delta)?;
    }
    Ok(())
}

/// Toggle acceptance of `answer_id` on behalf of `user_id`, who must have
/// asked the question. Accepting a different answer first un-accepts the
/// previous one, so a question has at most one accepted answer.
pub fn toggle_acceptance(
    conn: &rusqlite::Connection,
    answer_id: &str,
    user_id: &str,
    bonus: i64,
) -> AppResult<Acceptance> {
    let (question_id, answer_author_id) = answer_meta(conn, answer_id)?.ok_or(AppError::NotFound)?;
    let (question_author_id, question_title, _) =
        question_meta(conn, &question_id)?.ok_or(AppError::NotFound)?;
    if question_author_id != user_id {
        return Err(AppError::Forbidden);
    }

    let accepted = with_transaction(conn, |conn| {
        // Re-read inside the write lock so concurrent toggles serialize
        let current: Option<String> = conn.query_row(
            "SELECT accepted_answer_id FROM questions WHERE id = ?1",
            params![question_id],
            |row| row.get(0),
        )?;

        if current.as_deref() == Some(answer_id) {
            conn.execute(
                "UPDATE answers SET is_accepted = 0 WHERE id = ?1",
                params![answer_id],
            )?;
            conn.execute(
                "UPDATE questions SET accepted_answer_id = NULL WHERE id = ?1",
                params![question_id],
            )?;
            reward(conn, &answer_author_id, &question_author_id, -bonus)?;
            return Ok::<_, rusqlite::Error>(false);
        }

        if let Some(previous) = current {
            conn.execute(
                "UPDATE answers SET is_accepted = 0 WHERE id = ?1",
                params![previous],
            )?;
            if let Some((_, previous_author)) = answer_meta(conn, &previous)? {
                reward(conn, &previous_author, &question_author_id, -bonus)?;
            }
        }

        conn.execute(
            "UPDATE answers SET is_accepted = 1 WHERE id = ?1",
            params![answer_id],
        )?;
        conn.execute(
            "UPDATE questions SET accepted_answer_id = ?2, last_activity_at = datetime('now')
             WHERE id = ?1",
            params![question_id, answer_id],
        )?;
        reward(conn, &answer_author_id, &question_author_id, bonus)?;
        Ok(true)
    })?;

    Ok(Acceptance {
        accepted,
        question_id,
        question_title,
        answer_author_id,
    })
}

// -- Handlers --

/// GET /api/questions/{id}/answers
async fn list_answers(
    State(state): State<AppState>,
    Path(question_id): Path<String>,
) -> AppResult<Json<Vec<Answer>>> {
    let conn = state.db.get()?;
    if question_meta(&conn, &question_id)?.is_none() {
        return Err(AppError::NotFound);
    }
    Ok(Json(answers_for_question(&conn, &question_id)?))
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub body: String,
}

/// POST /api/questions/{id}/answers
async fn create_answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(question_id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> AppResult<(StatusCode, Json<Answer>)> {
    let body = validate_body(&req.body, MIN_BODY_LEN)?;

    let conn = state.db.get()?;
    let (question_author_id, title, _) =
        question_meta(&conn, &question_id)?.ok_or(AppError::NotFound)?;

    let answer_id = uuid::Uuid::now_v7().to_string();
    with_transaction(&conn, |conn| {
        conn.execute(
            "INSERT INTO answers (id, question_id, author_id, body) VALUES (?1, ?2, ?3, ?4)",
            params![answer_id, question_id, user.id, body],
        )?;
        conn.execute(
            "UPDATE questions SET answer_count = answer_count + 1,
                    last_activity_at = datetime('now')
             WHERE id = ?1",
            params![question_id],
        )?;
        Ok::<_, rusqlite::Error>(())
    })?;

    let answer = fetch_answer(&conn, &answer_id)?.ok_or(AppError::NotFound)?;

    notifications::create_best_effort(
        &conn,
        state.broadcaster.as_ref(),
        &NewNotification {
            recipient_id: &question_author_id,
            actor_id: &user.id,
            kind: NotificationKind::NewAnswer,
            target_id: &answer.id,
            target_kind: TargetKind::Answer,
            message: format!("{} answered your question \"{}\"", user.username, title),
        },
    );
    state.broadcaster.publish(
        &topics::target(TargetKind::Question, &question_id),
        json!({ "type": "answer", "action": "created", "answer": answer }),
    );

    tracing::info!(answer = %answer.id, question = %question_id, "Answer posted");
    Ok((StatusCode::CREATED, Json(answer)))
}

/// PATCH /api/answers/{id}
async fn update_answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> AppResult<Json<Answer>> {
    let body = validate_body(&req.body, MIN_BODY_LEN)?;

    let conn = state.db.get()?;
    let (question_id, author_id) = answer_meta(&conn, &id)?.ok_or(AppError::NotFound)?;
    if author_id != user.id {
        return Err(AppError::Forbidden);
    }

    with_transaction(&conn, |conn| {
        conn.execute(
            "UPDATE answers SET body = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, body],
        )?;
        conn.execute(
            "UPDATE questions SET last_activity_at = datetime('now') WHERE id = ?1",
            params![question_id],
        )?;
        Ok::<_, rusqlite::Error>(())
    })?;

    let answer = fetch_answer(&conn, &id)?.ok_or(AppError::NotFound)?;
    Ok(Json(answer))
}

/// DELETE /api/answers/{id}. Removing the accepted answer also takes back
/// its acceptance bonus.
async fn delete_answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let bonus = state.config.reputation.answer_accepted;
    let conn = state.db.get()?;
    let (question_id, author_id) = answer_meta(&conn, &id)?.ok_or(AppError::NotFound)?;
    if author_id != user.id && !user.is_admin {
        return Err(AppError::Forbidden);
    }
    let (question_author_id, _, accepted_answer_id) =
        question_meta(&conn, &question_id)?.ok_or(AppError::NotFound)?;

    with_transaction(&conn, |conn| {
        if accepted_answer_id.as_deref() == Some(id.as_str()) {
            conn.execute(
                "UPDATE questions SET accepted_answer_id = NULL WHERE id = ?1",
                params![question_id],
            )?;
            reward(conn, &author_id, &question_author_id, -bonus)?;
        }
        for table in ["votes", "comments", "notifications"] {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE target_kind = 'answer' AND target_id = ?1",
                    table
                ),
                params![id],
            )?;
        }
        conn.execute("DELETE FROM answers WHERE id = ?1", params![id])?;
        conn.execute(
            "UPDATE questions SET answer_count = MAX(0, answer_count - 1) WHERE id = ?1",
            params![question_id],
        )?;
        Ok::<_, rusqlite::Error>(())
    })?;

    tracing::info!(answer = %id, by = %user.id, "Answer deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub accepted: bool,
    pub answer: Answer,
}

/// POST /api/answers/{id}/accept
async fn accept_answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<AcceptResponse>> {
    let conn = state.db.get()?;
    let acceptance = toggle_acceptance(
        &conn,
        &id,
        &user.id,
        state.config.reputation.answer_accepted,
    )?;
    let answer = fetch_answer(&conn, &id)?.ok_or(AppError::NotFound)?;

    tracing::info!(
        answer = %id,
        question = %acceptance.question_id,
        accepted = acceptance.accepted,
        "Answer acceptance toggled"
    );

    if acceptance.accepted {
        notifications::create_best_effort(
            &conn,
            state.broadcaster.as_ref(),
            &NewNotification {
                recipient_id: &acceptance.answer_author_id,
                actor_id: &user.id,
                kind: NotificationKind::AnswerAccepted,
                target_id: &id,
                target_kind: TargetKind::Answer,
                message: format!(
                    "{} accepted your answer to \"{}\"",
                    user.username, acceptance.question_title
                ),
            },
        );
    }
    state.broadcaster.publish(
        &topics::target(TargetKind::Question, &acceptance.question_id),
        json!({
            "type": "accept",
            "answerId": id,
            "accepted": acceptance.accepted,
        }),
    );

    Ok(Json(AcceptResponse {
        accepted: acceptance.accepted,
        answer,
    }))
}
