use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(events))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

/// `user:{id}` feeds belong to that user alone; every other topic is public.
pub fn can_see(topic: &str, viewer: Option<&str>) -> bool {
    match topic.strip_prefix("user:") {
        Some(owner) => viewer == Some(owner),
        None => true,
    }
}

/// GET /api/events
async fn events(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<EventsQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let viewer = user.map(|u| u.id);
    if let Some(topic) = &query.topic {
        if !can_see(topic, viewer.as_deref()) {
            return Err(AppError::Forbidden);
        }
    }

    let receiver = state.broadcaster.subscribe().ok_or(AppError::NotFound)?;
    let wanted = query.topic;

    let stream = BroadcastStream::new(receiver).filter_map(move |message| match message {
        Ok(event) => {
            let matches = match &wanted {
                Some(topic) => *topic == event.topic,
                None => can_see(&event.topic, viewer.as_deref()),
            };
            matches.then(|| {
                Ok(Event::default()
                    .event(event.topic)
                    .data(event.payload.to_string()))
            })
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Event subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_topics_are_private() {
        assert!(can_see("user:alice", Some("alice")));
        assert!(!can_see("user:alice", Some("bob")));
        assert!(!can_see("user:alice", None));
    }

    #[test]
    fn post_topics_are_public() {
        assert!(can_see("question:q1", None));
        assert!(can_see("answer:a1", Some("bob")));
    }
}
