pub mod answers;
pub mod comments;
pub mod events;
pub mod history;
pub mod notifications;
pub mod pagination;
pub mod questions;
pub mod tags;
pub mod users;
pub mod votes;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::handlers;
use crate::state::AppState;

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(auth_router())
        .merge(users::router())
        .merge(questions::router())
        .merge(answers::router())
        .merge(tags::router())
        .merge(comments::router())
        .merge(votes::router())
        .merge(notifications::router())
        .merge(history::router())
        .merge(events::router())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// The full application: `/health` plus everything under `/api`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
