use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::params;
use serde::Deserialize;

use crate::db::models::HistoryEntry;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::routes::pagination::{Page, Paging};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/history", get(list_history).delete(clear_history))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Most recently viewed first.
pub fn recent_views(
    conn: &rusqlite::Connection,
    user_id: &str,
    paging: Paging,
) -> rusqlite::Result<Page<HistoryEntry>> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM view_history WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT q.id, q.title, q.vote_score, q.answer_count, h.viewed_at
         FROM view_history h JOIN questions q ON q.id = h.question_id
         WHERE h.user_id = ?1
         ORDER BY h.viewed_at DESC, q.id DESC
         LIMIT ?2 OFFSET ?3",
    )?;
    let items = stmt
        .query_map(params![user_id, paging.limit, paging.offset()], |row| {
            Ok(HistoryEntry {
                question_id: row.get(0)?,
                title: row.get(1)?,
                vote_score: row.get(2)?,
                answer_count: row.get(3)?,
                viewed_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(items, paging, total))
}

/// GET /api/history
async fn list_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Page<HistoryEntry>>> {
    let conn = state.db.get()?;
    let page = recent_views(&conn, &user.id, Paging::new(query.page, query.limit))?;
    Ok(Json(page))
}

/// DELETE /api/history
async fn clear_history(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    conn.execute(
        "DELETE FROM view_history WHERE user_id = ?1",
        params![user.id],
    )?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    #[test]
    fn history_is_newest_first_and_per_user() {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, username, email, password_hash)
                 VALUES ('alice', 'alice', 'alice@example.com', 'x');
             INSERT INTO users (id, username, email, password_hash)
                 VALUES ('bob', 'bob', 'bob@example.com', 'x');
             INSERT INTO questions (id, author_id, title, body) VALUES ('q1', 'alice', 'First', 'b');
             INSERT INTO questions (id, author_id, title, body) VALUES ('q2', 'alice', 'Second', 'b');
             INSERT INTO view_history VALUES ('bob', 'q1', '2024-01-01 00:00:00');
             INSERT INTO view_history VALUES ('bob', 'q2', '2024-01-02 00:00:00');
             INSERT INTO view_history VALUES ('alice', 'q1', '2024-01-03 00:00:00');",
        )
        .unwrap();

        let page = recent_views(&conn, "bob", Paging::new(None, None)).unwrap();
        let titles: Vec<&str> = page.items.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["Second", "First"]);
        assert_eq!(page.total, 2);

        let alice = recent_views(&conn, "alice", Paging::new(None, None)).unwrap();
        assert_eq!(alice.total, 1);
    }
}
