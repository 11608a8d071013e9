use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::Deserialize;

use crate::db::models::Tag;
use crate::error::{AppError, AppResult};
use crate::routes::pagination::{like_pattern, Page, Paging};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags))
        .route("/tags/{name}", get(get_tag))
}

const TAG_SELECT: &str = "SELECT t.id, t.name, t.description, t.created_at,
        (SELECT COUNT(*) FROM question_tags qt WHERE qt.tag_id = t.id) AS question_count
     FROM tags t";

fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        question_count: row.get(4)?,
    })
}

#[derive(Deserialize, Default)]
pub struct ListTagsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

pub fn query_tags(conn: &rusqlite::Connection, query: &ListTagsQuery) -> AppResult<Page<Tag>> {
    let paging = Paging::new(query.page, query.limit);
    let order = match query.sort.as_deref().unwrap_or("popular") {
        "popular" => "question_count DESC, t.name ASC",
        "name" => "t.name ASC",
        other => return Err(AppError::BadRequest(format!("Unknown sort: {}", other))),
    };

    let mut filter = String::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter.push_str(" WHERE t.name LIKE ?1 ESCAPE '\\'");
        values.push(like_pattern(&search.to_lowercase()).into());
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tags t{}", filter),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "{}{} ORDER BY {} LIMIT {} OFFSET {}",
        TAG_SELECT,
        filter,
        order,
        paging.limit,
        paging.offset()
    ))?;
    let items = stmt
        .query_map(params_from_iter(values.iter()), tag_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(items, paging, total))
}

/// GET /api/tags
async fn list_tags(
    State(state): State<AppState>,
    Query(query): Query<ListTagsQuery>,
) -> AppResult<Json<Page<Tag>>> {
    let conn = state.db.get()?;
    Ok(Json(query_tags(&conn, &query)?))
}

/// GET /api/tags/{name}
async fn get_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Tag>> {
    let conn = state.db.get()?;
    let tag = conn
        .query_row(
            &format!("{} WHERE t.name = ?1", TAG_SELECT),
            params![name.to_lowercase()],
            tag_from_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    Ok(Json(tag))
}
