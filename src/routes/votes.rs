use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;
use crate::votes::{
    Direction, SqliteVoteStore, TargetKind, VoteOutcome, VoteRepository, VoteRequest,
};

const MAX_LOOKUP_IDS: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/votes", post(cast_vote))
        .route("/votes/mine", get(my_votes))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBody {
    pub target: String,
    pub target_type: String,
    pub vote_type: String,
}

/// POST /api/votes
async fn cast_vote(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<VoteBody>,
) -> AppResult<Json<VoteOutcome>> {
    let request = VoteRequest::parse(
        user.id.as_str(),
        body.target,
        &body.target_type,
        &body.vote_type,
    )?;
    let outcome = state.votes.cast(&request, &user.username).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVotesQuery {
    pub target_type: String,
    /// Comma separated target ids
    pub ids: String,
}

#[derive(Serialize)]
pub struct MyVotesResponse {
    pub votes: HashMap<String, Direction>,
}

fn split_ids(ids: &str) -> AppResult<Vec<String>> {
    let ids: Vec<String> = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if ids.len() > MAX_LOOKUP_IDS {
        return Err(AppError::BadRequest(format!(
            "At most {} ids per lookup",
            MAX_LOOKUP_IDS
        )));
    }
    Ok(ids)
}

/// GET /api/votes/mine?targetType=question&ids=a,b
async fn my_votes(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<MyVotesQuery>,
) -> AppResult<Json<MyVotesResponse>> {
    let kind = TargetKind::parse(&query.target_type).ok_or_else(|| {
        AppError::BadRequest(format!("Unknown target type: {}", query.target_type))
    })?;
    let ids = split_ids(&query.ids)?;

    let store = SqliteVoteStore::new(state.db.clone());
    let votes = store.directions_for(&user.id, kind, &ids).await?;

    Ok(Json(MyVotesResponse {
        votes: votes.into_iter().collect(),
    }))
}
