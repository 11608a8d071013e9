use axum::extract::{Path, Query, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::Deserialize;

use crate::db::models::{User, UserProfile, UserSummary};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::routes::pagination::{like_pattern, Page, Paging};
use crate::state::AppState;

const MAX_BIO_LEN: usize = 500;
const MAX_DISPLAY_NAME_LEN: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/me", patch(update_me))
        .route("/users/{id}", get(get_profile))
}

/// Columns for [`summary_from_row`], aliased on `u`.
pub const SUMMARY_COLUMNS: &str = "u.id, u.username, u.display_name, u.reputation";

/// Read the four [`SUMMARY_COLUMNS`] starting at column `offset`.
pub fn summary_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        display_name: row.get(offset + 2)?,
        reputation: row.get(offset + 3)?,
    })
}

pub fn fetch_user(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, display_name, bio, reputation, is_admin, created_at
         FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                display_name: row.get(3)?,
                bio: row.get(4)?,
                reputation: row.get(5)?,
                is_admin: row.get(6)?,
                created_at: row.get(7)?,
            })
        },
    )
    .optional()
}

#[derive(Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

/// GET /api/users
async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Page<UserSummary>>> {
    let paging = Paging::new(query.page, query.limit);
    let order = match query.sort.as_deref().unwrap_or("reputation") {
        "reputation" => "u.reputation DESC, u.created_at ASC",
        "newest" => "u.created_at DESC, u.id DESC",
        "name" => "u.username COLLATE NOCASE ASC",
        other => return Err(AppError::BadRequest(format!("Unknown sort: {}", other))),
    };

    let mut filter = String::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter.push_str(
            " WHERE (u.username LIKE ?1 ESCAPE '\\' OR u.display_name LIKE ?1 ESCAPE '\\')",
        );
        values.push(like_pattern(search).into());
    }

    let conn = state.db.get()?;
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM users u{}", filter),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM users u{} ORDER BY {} LIMIT {} OFFSET {}",
        SUMMARY_COLUMNS,
        filter,
        order,
        paging.limit,
        paging.offset()
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values.iter()), |row| summary_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(Page::new(items, paging, total)))
}

pub fn fetch_profile(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<UserProfile>> {
    conn.query_row(
        &format!(
            "SELECT {}, u.bio, u.created_at,
                (SELECT COUNT(*) FROM questions WHERE author_id = u.id),
                (SELECT COUNT(*) FROM answers WHERE author_id = u.id)
             FROM users u WHERE u.id = ?1",
            SUMMARY_COLUMNS
        ),
        params![id],
        |row| {
            Ok(UserProfile {
                user: summary_from_row(row, 0)?,
                bio: row.get(4)?,
                created_at: row.get(5)?,
                question_count: row.get(6)?,
                answer_count: row.get(7)?,
            })
        },
    )
    .optional()
}

/// GET /api/users/{id}
async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserProfile>> {
    let conn = state.db.get()?;
    let profile = fetch_profile(&conn, &id)?.ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// PATCH /api/users/me. Empty strings clear a field.
async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<User>> {
    let conn = state.db.get()?;

    if let Some(display_name) = req.display_name.as_deref().map(str::trim) {
        if display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(AppError::BadRequest(format!(
                "Display name must be {} characters or less",
                MAX_DISPLAY_NAME_LEN
            )));
        }
        let value = Some(display_name).filter(|s| !s.is_empty());
        conn.execute(
            "UPDATE users SET display_name = ?2 WHERE id = ?1",
            params![user.id, value],
        )?;
    }

    if let Some(bio) = req.bio.as_deref().map(str::trim) {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(AppError::BadRequest(format!(
                "Bio must be {} characters or less",
                MAX_BIO_LEN
            )));
        }
        let value = Some(bio).filter(|s| !s.is_empty());
        conn.execute(
            "UPDATE users SET bio = ?2 WHERE id = ?1",
            params![user.id, value],
        )?;
    }

    let updated = fetch_user(&conn, &user.id)?.ok_or(AppError::NotFound)?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn setup() -> (TempDir, crate::state::DbPool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute_batch(
                "INSERT INTO users (id, username, email, password_hash, reputation, bio)
                     VALUES ('alice', 'alice', 'alice@example.com', 'x', 42, 'Rustacean');
                 INSERT INTO questions (id, author_id, title, body)
                     VALUES ('q1', 'alice', 'A question title', 'A question body long enough');
                 INSERT INTO answers (id, question_id, author_id, body)
                     VALUES ('a1', 'q1', 'alice', 'An answer body long enough');
                 INSERT INTO answers (id, question_id, author_id, body)
                     VALUES ('a2', 'q1', 'alice', 'Another answer body here');",
            )
            .unwrap();
        (temp_dir, pool)
    }

    #[test]
    fn fetch_user_returns_none_for_unknown_id() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();
        assert!(fetch_user(&conn, "nobody").unwrap().is_none());
        let alice = fetch_user(&conn, "alice").unwrap().unwrap();
        assert_eq!(alice.email, "alice@example.com");
        assert_eq!(alice.reputation, 42);
        assert!(!alice.is_admin);
    }

    #[test]
    fn profile_counts_posts() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();
        let profile = fetch_profile(&conn, "alice").unwrap().unwrap();
        assert_eq!(profile.user.username, "alice");
        assert_eq!(profile.bio.as_deref(), Some("Rustacean"));
        assert_eq!(profile.question_count, 1);
        assert_eq!(profile.answer_count, 2);
    }
}
