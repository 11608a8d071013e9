use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::Deserialize;

use crate::db::models::Question;
use crate::db::with_transaction;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::routes::pagination::{like_pattern, Page, Paging};
use crate::routes::users::{summary_from_row, SUMMARY_COLUMNS};
use crate::state::AppState;

pub const TITLE_LEN: std::ops::RangeInclusive<usize> = 10..=150;
pub const MIN_BODY_LEN: usize = 20;
pub const MAX_TAGS: usize = 5;
const MAX_TAG_LEN: usize = 35;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/questions", get(list_questions).post(create_question))
        .route(
            "/questions/{id}",
            get(get_question)
                .patch(update_question)
                .delete(delete_question),
        )
}

// -- Validation --

pub fn validate_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if !TITLE_LEN.contains(&title.chars().count()) {
        return Err(AppError::BadRequest(format!(
            "Title must be between {} and {} characters",
            TITLE_LEN.start(),
            TITLE_LEN.end()
        )));
    }
    Ok(title.to_string())
}

/// Trimmed body of at least `min` characters.
pub fn validate_body(body: &str, min: usize) -> AppResult<String> {
    let body = body.trim();
    if body.chars().count() < min {
        return Err(AppError::BadRequest(format!(
            "Body must be at least {} characters",
            min
        )));
    }
    Ok(body.to_string())
}

/// Lowercase, hyphenate whitespace and drop duplicates, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> AppResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for raw in tags {
        let tag = raw
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(AppError::BadRequest(format!(
                "Tag '{}' is longer than {} characters",
                tag, MAX_TAG_LEN
            )));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '+' | '#'))
        {
            return Err(AppError::BadRequest(format!(
                "Tag '{}' contains invalid characters",
                tag
            )));
        }
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }

    if normalized.len() > MAX_TAGS {
        return Err(AppError::BadRequest(format!(
            "A question can have at most {} tags",
            MAX_TAGS
        )));
    }
    Ok(normalized)
}

// -- Queries --

fn question_select() -> String {
    format!(
        "SELECT q.id, q.title, q.body, q.vote_score, q.view_count, q.answer_count,
                q.accepted_answer_id, q.created_at, q.updated_at, {}
         FROM questions q JOIN users u ON u.id = q.author_id",
        SUMMARY_COLUMNS
    )
}

fn question_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        vote_score: row.get(3)?,
        view_count: row.get(4)?,
        answer_count: row.get(5)?,
        accepted_answer_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        author: summary_from_row(row, 9)?,
        tags: Vec::new(),
    })
}

fn load_tags(conn: &rusqlite::Connection, question_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.name FROM tags t
         JOIN question_tags qt ON qt.tag_id = t.id
         WHERE qt.question_id = ?1
         ORDER BY t.name",
    )?;
    let tags = stmt
        .query_map(params![question_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tags)
}

pub fn fetch_question(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Question>> {
    let question = conn
        .query_row(
            &format!("{} WHERE q.id = ?1", question_select()),
            params![id],
            question_from_row,
        )
        .optional()?;

    match question {
        Some(mut question) => {
            question.tags = load_tags(conn, &question.id)?;
            Ok(Some(question))
        }
        None => Ok(None),
    }
}

/// Replace a question's tags, creating any tag seen for the first time.
fn set_question_tags(
    conn: &rusqlite::Connection,
    question_id: &str,
    tags: &[String],
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM question_tags WHERE question_id = ?1",
        params![question_id],
    )?;

    for name in tags {
        conn.execute(
            "INSERT INTO tags (id, name) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
            params![uuid::Uuid::now_v7().to_string(), name],
        )?;
        conn.execute(
            "INSERT INTO question_tags (question_id, tag_id)
             SELECT ?1, id FROM tags WHERE name = ?2",
            params![question_id, name],
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSort {
    Newest,
    Votes,
    Active,
    Unanswered,
    Views,
}

impl QuestionSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "newest" => Some(Self::Newest),
            "votes" => Some(Self::Votes),
            "active" => Some(Self::Active),
            "unanswered" => Some(Self::Unanswered),
            "views" => Some(Self::Views),
            _ => None,
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            Self::Newest | Self::Unanswered => "q.created_at DESC, q.id DESC",
            Self::Votes => "q.vote_score DESC, q.created_at DESC",
            Self::Active => "q.last_activity_at DESC, q.id DESC",
            Self::Views => "q.view_count DESC, q.created_at DESC",
        }
    }
}

#[derive(Deserialize, Default)]
pub struct ListQuestionsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub tag: Option<String>,
    pub sort: Option<String>,
}

pub fn query_questions(
    conn: &rusqlite::Connection,
    query: &ListQuestionsQuery,
) -> AppResult<Page<Question>> {
    let paging = Paging::new(query.page, query.limit);
    let sort = match query.sort.as_deref() {
        None => QuestionSort::Newest,
        Some(s) => QuestionSort::parse(s)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown sort: {}", s)))?,
    };

    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push("(q.title LIKE ? ESCAPE '\\' OR q.body LIKE ? ESCAPE '\\')");
        let pattern = like_pattern(search);
        values.push(pattern.clone().into());
        values.push(pattern.into());
    }
    if let Some(tag) = query.tag.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "EXISTS (SELECT 1 FROM question_tags qt JOIN tags t ON t.id = qt.tag_id
                     WHERE qt.question_id = q.id AND t.name = ?)",
        );
        values.push(tag.to_lowercase().into());
    }
    if sort == QuestionSort::Unanswered {
        conditions.push("q.answer_count = 0");
    }

    let filter = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM questions q{}", filter),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "{}{} ORDER BY {} LIMIT {} OFFSET {}",
        question_select(),
        filter,
        sort.order_by(),
        paging.limit,
        paging.offset()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut items = stmt
        .query_map(params_from_iter(values.iter()), question_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for question in &mut items {
        question.tags = load_tags(conn, &question.id)?;
    }

    Ok(Page::new(items, paging, total))
}

// -- Handlers --

/// GET /api/questions
async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<ListQuestionsQuery>,
) -> AppResult<Json<Page<Question>>> {
    let conn = state.db.get()?;
    Ok(Json(query_questions(&conn, &query)?))
}

#[derive(Deserialize)]
pub struct CreateQuestionRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// POST /api/questions
async fn create_question(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateQuestionRequest>,
) -> AppResult<(StatusCode, Json<Question>)> {
    let title = validate_title(&req.title)?;
    let body = validate_body(&req.body, MIN_BODY_LEN)?;
    let tags = normalize_tags(&req.tags)?;

    let question_id = uuid::Uuid::now_v7().to_string();
    let conn = state.db.get()?;
    with_transaction(&conn, |conn| {
        conn.execute(
            "INSERT INTO questions (id, author_id, title, body) VALUES (?1, ?2, ?3, ?4)",
            params![question_id, user.id, title, body],
        )?;
        set_question_tags(conn, &question_id, &tags)
    })?;

    let question = fetch_question(&conn, &question_id)?.ok_or(AppError::NotFound)?;
    tracing::info!(question = %question.id, author = %user.id, "Question created");
    Ok((StatusCode::CREATED, Json(question)))
}

/// GET /api/questions/{id}. Counts a view and, for signed-in readers,
/// records it in their history.
async fn get_question(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Json<Question>> {
    let conn = state.db.get()?;

    let updated = conn.execute(
        "UPDATE questions SET view_count = view_count + 1 WHERE id = ?1",
        params![id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    if let Some(user) = user {
        conn.execute(
            "INSERT INTO view_history (user_id, question_id, viewed_at)
             VALUES (?1, ?2, strftime('%Y-%m-%d %H:%M:%f', 'now'))
             ON CONFLICT(user_id, question_id) DO UPDATE SET viewed_at = excluded.viewed_at",
            params![user.id, id],
        )?;
    }

    let question = fetch_question(&conn, &id)?.ok_or(AppError::NotFound)?;
    Ok(Json(question))
}

#[derive(Deserialize)]
pub struct UpdateQuestionRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// PATCH /api/questions/{id}
async fn update_question(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuestionRequest>,
) -> AppResult<Json<Question>> {
    let title = req.title.as_deref().map(validate_title).transpose()?;
    let body = req
        .body
        .as_deref()
        .map(|b| validate_body(b, MIN_BODY_LEN))
        .transpose()?;
    let tags = req.tags.as_deref().map(normalize_tags).transpose()?;

    let conn = state.db.get()?;
    let author_id: String = conn
        .query_row(
            "SELECT author_id FROM questions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    if author_id != user.id {
        return Err(AppError::Forbidden);
    }

    with_transaction(&conn, |conn| {
        if let Some(title) = &title {
            conn.execute(
                "UPDATE questions SET title = ?2 WHERE id = ?1",
                params![id, title],
            )?;
        }
        if let Some(body) = &body {
            conn.execute(
                "UPDATE questions SET body = ?2 WHERE id = ?1",
                params![id, body],
            )?;
        }
        if let Some(tags) = &tags {
            set_question_tags(conn, &id, tags)?;
        }
        conn.execute(
            "UPDATE questions SET updated_at = datetime('now'), last_activity_at = datetime('now')
             WHERE id = ?1",
            params![id],
        )?;
        Ok::<_, rusqlite::Error>(())
    })?;

    let question = fetch_question(&conn, &id)?.ok_or(AppError::NotFound)?;
    Ok(Json(question))
}

/// DELETE /api/questions/{id}. Answers go with the question; votes,
/// comments and notifications on either are removed explicitly since they
/// point at their target by id and kind.
async fn delete_question(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    let author_id: String = conn
        .query_row(
            "SELECT author_id FROM questions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    if author_id != user.id && !user.is_admin {
        return Err(AppError::Forbidden);
    }

    with_transaction(&conn, |conn| {
        for table in ["votes", "comments", "notifications"] {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE
                        (target_kind = 'question' AND target_id = ?1)
                     OR (target_kind = 'answer'
                         AND target_id IN (SELECT id FROM answers WHERE question_id = ?1))",
                    table
                ),
                params![id],
            )?;
        }
        conn.execute("DELETE FROM questions WHERE id = ?1", params![id])?;
        Ok::<_, rusqlite::Error>(())
    })?;

    tracing::info!(question = %id, by = %user.id, "Question deleted");
    Ok(StatusCode::NO_CONTENT)
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
                "INSERT INTO users (id, username, email, password_hash)
                     VALUES ('alice', 'alice', 'alice@example.com', 'x');
                 INSERT INTO questions (id, author_id, title, body, vote_score, view_count, answer_count, created_at)
                     VALUES ('q1', 'alice', 'Borrow checker woes', 'Why does this not compile at all', 3, 10, 1, '2024-01-01 00:00:00');
                 INSERT INTO questions (id, author_id, title, body, vote_score, view_count, answer_count, created_at)
                     VALUES ('q2', 'alice', 'Async trait objects', 'How do I box a future in a trait', 7, 2, 0, '2024-01-02 00:00:00');
                 INSERT INTO questions (id, author_id, title, body, created_at)
                     VALUES ('q3', 'alice', 'Percent % in titles', 'Searching for wildcard characters', '2024-01-03 00:00:00');",
            )
            .unwrap();
        {
            let conn = pool.get().unwrap();
            set_question_tags(&conn, "q1", &["rust".into(), "borrowck".into()]).unwrap();
            set_question_tags(&conn, "q2", &["rust".into(), "async".into()]).unwrap();
        }
        (temp_dir, pool)
    }

    fn ids(page: &Page<Question>) -> Vec<&str> {
        page.items.iter().map(|q| q.id.as_str()).collect()
    }

    #[test]
    fn title_and_body_rules() {
        assert!(validate_title("short").is_err());
        assert_eq!(
            validate_title("  A perfectly fine title  ").unwrap(),
            "A perfectly fine title"
        );
        assert!(validate_title(&"x".repeat(151)).is_err());
        assert!(validate_body("too short", MIN_BODY_LEN).is_err());
        assert!(validate_body(&"b".repeat(20), MIN_BODY_LEN).is_ok());
    }

    #[test]
    fn tags_are_normalized() {
        let tags = normalize_tags(&[
            "Rust".into(),
            " error handling ".into(),
            "rust".into(),
            "".into(),
            "c++".into(),
        ])
        .unwrap();
        assert_eq!(tags, vec!["rust", "error-handling", "c++"]);
    }

    #[test]
    fn tag_limits_are_enforced() {
        let six: Vec<String> = (0..6).map(|i| format!("tag{}", i)).collect();
        assert!(normalize_tags(&six).is_err());
        assert!(normalize_tags(&["semi;colon".into()]).is_err());
        assert!(normalize_tags(&["x".repeat(36)]).is_err());
    }

    #[test]
    fn fetch_question_includes_tags_and_author() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();
        let question = fetch_question(&conn, "q1").unwrap().unwrap();
        assert_eq!(question.tags, vec!["borrowck", "rust"]);
        assert_eq!(question.author.username, "alice");
        assert!(fetch_question(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn retagging_replaces_tags() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();
        set_question_tags(&conn, "q1", &["lifetimes".into()]).unwrap();
        let question = fetch_question(&conn, "q1").unwrap().unwrap();
        assert_eq!(question.tags, vec!["lifetimes"]);
    }

    #[test]
    fn list_sorts_and_filters() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();

        let newest = query_questions(&conn, &ListQuestionsQuery::default()).unwrap();
        assert_eq!(ids(&newest), vec!["q3", "q2", "q1"]);
        assert_eq!(newest.total, 3);

        let by_votes = query_questions(
            &conn,
            &ListQuestionsQuery {
                sort: Some("votes".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ids(&by_votes), vec!["q2", "q1", "q3"]);

        let unanswered = query_questions(
            &conn,
            &ListQuestionsQuery {
                sort: Some("unanswered".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ids(&unanswered), vec!["q3", "q2"]);

        let tagged = query_questions(
            &conn,
            &ListQuestionsQuery {
                tag: Some("Async".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ids(&tagged), vec!["q2"]);
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();

        let found = query_questions(
            &conn,
            &ListQuestionsQuery {
                search: Some("%".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ids(&found), vec!["q3"]);

        let by_body = query_questions(
            &conn,
            &ListQuestionsQuery {
                search: Some("box a future".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ids(&by_body), vec!["q2"]);
    }

    #[test]
    fn pagination_reports_totals() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();
        let page = query_questions(
            &conn,
            &ListQuestionsQuery {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ids(&page), vec!["q1"]);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn unknown_sort_is_rejected() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();
        let result = query_questions(
            &conn,
            &ListQuestionsQuery {
                sort: Some("random".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
