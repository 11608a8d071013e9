use chrono::Utc;
use std::future::Future;
use thiserror::Error;

use crate::votes::domain::{Direction, ReputationTable, TargetKind, Transition, Vote, VoteChange};
use crate::votes::repository::{DynTargetStore, DynVoteRepository, RepositoryError};

/// Number of times a submission is re-run after losing a uniqueness race.
pub const CONFLICT_RETRIES: u32 = 1;

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(RepositoryError),
}

impl From<RepositoryError> for VoteError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            RepositoryError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Storage(other),
        }
    }
}

/// A validated vote submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub voter_id: String,
    pub target_id: String,
    pub kind: TargetKind,
    pub direction: Direction,
}

impl VoteRequest {
    /// Build a request from wire strings, rejecting unknown kinds and directions.
    pub fn parse(
        voter_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: &str,
        direction: &str,
    ) -> Result<Self, VoteError> {
        let kind = TargetKind::parse(kind)
            .ok_or_else(|| VoteError::InvalidArgument(format!("unknown target type: {}", kind)))?;
        let direction = Direction::parse(direction).ok_or_else(|| {
            VoteError::InvalidArgument(format!("unknown vote type: {}", direction))
        })?;
        let target_id = target_id.into();
        if target_id.trim().is_empty() {
            return Err(VoteError::InvalidArgument("target is required".into()));
        }

        Ok(Self {
            voter_id: voter_id.into(),
            target_id,
            kind,
            direction,
        })
    }
}

/// What the ledger did, and the deltas the caller must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub transition: Transition,
    /// The stored vote after the change; for `Removed`, the vote that was deleted.
    pub vote: Vote,
    pub author_id: String,
    pub score_delta: i64,
    pub reputation_delta: i64,
}

/// Owns the (voter, target, kind) → direction mapping.
pub struct VoteLedger {
    votes: DynVoteRepository,
    targets: DynTargetStore,
    reputation: ReputationTable,
}

impl VoteLedger {
    pub fn new(votes: DynVoteRepository, targets: DynTargetStore, reputation: ReputationTable) -> Self {
        Self {
            votes,
            targets,
            reputation,
        }
    }

    /// Decide and apply the transition for `request`. Losing a race to
    /// create the same vote re-runs the whole decision once.
    pub async fn submit_vote(&self, request: &VoteRequest) -> Result<VoteReceipt, VoteError> {
        retry_on_conflict(CONFLICT_RETRIES, || self.try_submit(request)).await
    }

    async fn try_submit(&self, request: &VoteRequest) -> Result<VoteReceipt, VoteError> {
        let target = self
            .targets
            .find_by_id(&request.target_id, request.kind)
            .await?
            .ok_or_else(|| {
                VoteError::NotFound(format!("{} {}", request.kind, request.target_id))
            })?;

        if target.author_id == request.voter_id {
            return Err(VoteError::InvalidArgument(format!(
                "cannot vote on your own {}",
                request.kind
            )));
        }

        let existing = self
            .votes
            .find(&request.voter_id, &request.target_id, request.kind)
            .await?;

        let change = VoteChange::decide(existing.as_ref().map(|v| v.direction), request.direction);

        let vote = match existing {
            None => {
                let vote = Vote {
                    id: uuid::Uuid::now_v7().to_string(),
                    voter_id: request.voter_id.clone(),
                    target_id: request.target_id.clone(),
                    target_kind: request.kind,
                    direction: request.direction,
                    created_at: Utc::now().to_rfc3339(),
                };
                self.votes.insert(&vote).await?;
                vote
            }
            Some(mut vote) => {
                let read = vote.direction;
                let still_there = match change.resulting_direction() {
                    Some(to) => {
                        vote.direction = to;
                        self.votes.update_direction(&vote.id, read, to).await?
                    }
                    None => self.votes.delete(&vote.id, read).await?,
                };
                if !still_there {
                    return Err(VoteError::Conflict(format!(
                        "vote {} changed before it could be {}",
                        vote.id,
                        change.transition().as_str()
                    )));
                }
                vote
            }
        };

        tracing::debug!(
            voter = %request.voter_id,
            target = %request.target_id,
            kind = %request.kind,
            transition = change.transition().as_str(),
            "vote recorded"
        );

        Ok(VoteReceipt {
            transition: change.transition(),
            vote,
            author_id: target.author_id,
            score_delta: change.score_delta(),
            reputation_delta: change.reputation_delta(request.kind, &self.reputation),
        })
    }
}

/// Run `op`, re-running it up to `retries` more times while it fails with
/// `VoteError::Conflict`. Any other outcome is returned as is.
pub async fn retry_on_conflict<T, F, Fut>(retries: u32, mut op: F) -> Result<T, VoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VoteError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(VoteError::Conflict(reason)) if attempt < retries => {
                attempt += 1;
                tracing::warn!(attempt, "vote conflict, retrying: {}", reason);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::votes::repository::{Target, TargetStore, VoteRepository};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory store that can be told to fail the next N inserts with a
    /// duplicate-key conflict. With `racing_direction` set, the winning row is
    /// planted the way a concurrent writer would leave it. A vote in
    /// `stale_read` is handed out by the next `find` in place of the stored row.
    #[derive(Default)]
    struct MemoryStore {
        votes: Mutex<HashMap<(String, String, TargetKind), Vote>>,
        targets: HashMap<(String, TargetKind), String>,
        racing_inserts: AtomicU32,
        racing_direction: Option<Direction>,
        stale_read: Mutex<Option<Vote>>,
    }

    impl MemoryStore {
        fn with_target(id: &str, kind: TargetKind, author: &str) -> Self {
            let mut targets = HashMap::new();
            targets.insert((id.to_string(), kind), author.to_string());
            Self {
                targets,
                ..Default::default()
            }
        }

        fn vote_count(&self) -> usize {
            self.votes.lock().unwrap().len()
        }

        fn stored_score(&self) -> i64 {
            self.votes
                .lock()
                .unwrap()
                .values()
                .map(|v| v.direction.score_value())
                .sum()
        }
    }

    #[async_trait]
    impl VoteRepository for MemoryStore {
        async fn find(
            &self,
            voter_id: &str,
            target_id: &str,
            kind: TargetKind,
        ) -> Result<Option<Vote>, RepositoryError> {
            if let Some(stale) = self.stale_read.lock().unwrap().take() {
                return Ok(Some(stale));
            }
            let key = (voter_id.to_string(), target_id.to_string(), kind);
            Ok(self.votes.lock().unwrap().get(&key).cloned())
        }

        async fn insert(&self, vote: &Vote) -> Result<(), RepositoryError> {
            let key = (vote.voter_id.clone(), vote.target_id.clone(), vote.target_kind);
            let mut votes = self.votes.lock().unwrap();

            if self.racing_inserts.load(Ordering::SeqCst) > 0 {
                self.racing_inserts.fetch_sub(1, Ordering::SeqCst);
                if let Some(direction) = self.racing_direction {
                    let mut winner = vote.clone();
                    winner.id = format!("racer-{}", vote.id);
                    winner.direction = direction;
                    votes.insert(key, winner);
                }
                return Err(RepositoryError::Conflict("duplicate".into()));
            }

            if votes.contains_key(&key) {
                return Err(RepositoryError::Conflict("duplicate".into()));
            }
            votes.insert(key, vote.clone());
            Ok(())
        }

        async fn update_direction(
            &self,
            vote_id: &str,
            from: Direction,
            to: Direction,
        ) -> Result<bool, RepositoryError> {
            let mut votes = self.votes.lock().unwrap();
            match votes
                .values_mut()
                .find(|v| v.id == vote_id && v.direction == from)
            {
                Some(vote) => {
                    vote.direction = to;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn delete(
            &self,
            vote_id: &str,
            direction: Direction,
        ) -> Result<bool, RepositoryError> {
            let mut votes = self.votes.lock().unwrap();
            let before = votes.len();
            votes.retain(|_, v| !(v.id == vote_id && v.direction == direction));
            Ok(votes.len() < before)
        }

        async fn directions_for(
            &self,
            _voter_id: &str,
            _kind: TargetKind,
            _target_ids: &[String],
        ) -> Result<Vec<(String, Direction)>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl TargetStore for MemoryStore {
        async fn find_by_id(
            &self,
            id: &str,
            kind: TargetKind,
        ) -> Result<Option<Target>, RepositoryError> {
            Ok(self
                .targets
                .get(&(id.to_string(), kind))
                .map(|author| Target {
                    id: id.to_string(),
                    kind,
                    author_id: author.clone(),
                    vote_score: 0,
                }))
        }

        async fn apply_score_delta(
            &self,
            _id: &str,
            _kind: TargetKind,
            delta: i64,
        ) -> Result<i64, RepositoryError> {
            Ok(delta)
        }
    }

    fn ledger(store: Arc<MemoryStore>) -> VoteLedger {
        VoteLedger::new(store.clone(), store, ReputationTable::default())
    }

    fn request(voter: &str, direction: &str) -> VoteRequest {
        VoteRequest::parse(voter, "q1", "question", direction).unwrap()
    }

    #[test]
    fn parse_rejects_unknown_values() {
        let err = VoteRequest::parse("b", "q1", "comment", "upvote").unwrap_err();
        assert!(matches!(err, VoteError::InvalidArgument(_)));

        let err = VoteRequest::parse("b", "q1", "answer", "meh").unwrap_err();
        assert!(matches!(err, VoteError::InvalidArgument(_)));

        let err = VoteRequest::parse("b", " ", "answer", "upvote").unwrap_err();
        assert!(matches!(err, VoteError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn toggle_flip_and_remove() {
        let store = Arc::new(MemoryStore::with_target("q1", TargetKind::Question, "alice"));
        let ledger = ledger(store.clone());

        let created = ledger.submit_vote(&request("bob", "upvote")).await.unwrap();
        assert_eq!(created.transition, Transition::Created);
        assert_eq!((created.score_delta, created.reputation_delta), (1, 5));
        assert_eq!(created.author_id, "alice");

        let flipped = ledger.submit_vote(&request("bob", "downvote")).await.unwrap();
        assert_eq!(flipped.transition, Transition::Updated);
        assert_eq!((flipped.score_delta, flipped.reputation_delta), (-2, -7));
        assert_eq!(flipped.vote.id, created.vote.id);
        assert_eq!(store.vote_count(), 1);

        let removed = ledger.submit_vote(&request("bob", "downvote")).await.unwrap();
        assert_eq!(removed.transition, Transition::Removed);
        assert_eq!((removed.score_delta, removed.reputation_delta), (1, 2));
        assert_eq!(store.vote_count(), 0);
    }

    #[tokio::test]
    async fn self_vote_is_rejected_without_a_row() {
        let store = Arc::new(MemoryStore::with_target("q1", TargetKind::Question, "alice"));
        let ledger = ledger(store.clone());

        let err = ledger.submit_vote(&request("alice", "upvote")).await.unwrap_err();
        assert!(matches!(err, VoteError::InvalidArgument(_)));
        assert_eq!(store.vote_count(), 0);
    }

    #[tokio::test]
    async fn missing_or_mismatched_target_is_not_found() {
        let store = Arc::new(MemoryStore::with_target("q1", TargetKind::Question, "alice"));
        let ledger = ledger(store.clone());

        let wrong_kind = VoteRequest::parse("bob", "q1", "answer", "upvote").unwrap();
        let err = ledger.submit_vote(&wrong_kind).await.unwrap_err();
        assert!(matches!(err, VoteError::NotFound(_)));

        let missing = VoteRequest::parse("bob", "nope", "question", "upvote").unwrap();
        let err = ledger.submit_vote(&missing).await.unwrap_err();
        assert!(matches!(err, VoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn lost_insert_race_is_retried_against_the_winner() {
        let mut store = MemoryStore::with_target("q1", TargetKind::Question, "alice");
        store.racing_inserts = AtomicU32::new(1);
        store.racing_direction = Some(Direction::Upvote);
        let store = Arc::new(store);
        let ledger = ledger(store.clone());

        // The racer already upvoted, so our upvote becomes a toggle-off
        let receipt = ledger.submit_vote(&request("bob", "upvote")).await.unwrap();
        assert_eq!(receipt.transition, Transition::Removed);
        assert_eq!(store.vote_count(), 0);
    }

    #[tokio::test]
    async fn flip_on_a_stale_read_is_retried_against_the_current_row() {
        let store = Arc::new(MemoryStore::with_target("q1", TargetKind::Question, "alice"));
        let ledger = ledger(store.clone());

        let created = ledger.submit_vote(&request("bob", "upvote")).await.unwrap();
        // A concurrent submission flips the row to a downvote after ours has
        // already read the upvote
        let racer = ledger.submit_vote(&request("bob", "downvote")).await.unwrap();
        *store.stale_read.lock().unwrap() = Some(created.vote.clone());

        let ours = ledger.submit_vote(&request("bob", "downvote")).await.unwrap();
        assert_eq!(ours.transition, Transition::Removed);
        assert_eq!(ours.score_delta, 1);

        let replayed: i64 = [&created, &racer, &ours].iter().map(|r| r.score_delta).sum();
        assert_eq!(replayed, store.stored_score());
        assert_eq!(store.vote_count(), 0);
    }

    #[tokio::test]
    async fn removal_on_a_stale_read_is_retried_against_the_current_row() {
        let store = Arc::new(MemoryStore::with_target("q1", TargetKind::Question, "alice"));
        let ledger = ledger(store.clone());

        let created = ledger.submit_vote(&request("bob", "upvote")).await.unwrap();
        let racer = ledger.submit_vote(&request("bob", "downvote")).await.unwrap();
        *store.stale_read.lock().unwrap() = Some(created.vote.clone());

        // Against the stale upvote this would be a removal worth -1
        let ours = ledger.submit_vote(&request("bob", "upvote")).await.unwrap();
        assert_eq!(ours.transition, Transition::Updated);
        assert_eq!(ours.score_delta, 2);

        let replayed: i64 = [&created, &racer, &ours].iter().map(|r| r.score_delta).sum();
        assert_eq!(replayed, store.stored_score());
        assert_eq!(replayed, 1);
    }

    #[tokio::test]
    async fn repeated_conflict_is_surfaced() {
        let mut store = MemoryStore::with_target("q1", TargetKind::Question, "alice");
        store.racing_inserts = AtomicU32::new(2);
        let store = Arc::new(store);
        let ledger = ledger(store.clone());

        let err = ledger.submit_vote(&request("bob", "upvote")).await.unwrap_err();
        assert!(matches!(err, VoteError::Conflict(_)));
        assert_eq!(store.vote_count(), 0);
    }

    #[tokio::test]
    async fn retry_runs_the_operation_once_more() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), VoteError> = retry_on_conflict(CONFLICT_RETRIES, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VoteError::Conflict("still duplicate".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(VoteError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), CONFLICT_RETRIES + 1);
    }

    #[tokio::test]
    async fn retry_passes_other_errors_through_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), VoteError> = retry_on_conflict(CONFLICT_RETRIES, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VoteError::InvalidArgument("bad".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(VoteError::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
