use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::notifications::{self, NewNotification, NotificationKind};
use crate::realtime::{topics, DynBroadcaster};
use crate::state::DbPool;
use crate::votes::domain::{ReputationTable, Transition, Vote};
use crate::votes::ledger::{VoteError, VoteLedger, VoteRequest};
use crate::votes::repository::{DynTargetStore, DynUserStore, SqliteVoteStore};

/// Wire response for a vote submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub action: Transition,
    /// `None` once the vote has been toggled off.
    pub vote: Option<Vote>,
    pub new_score: i64,
    pub new_reputation: i64,
}

/// Runs the ledger and then applies its deltas: score to the target first,
/// then reputation to the target's author. The deltas are not rolled back
/// if a later step fails.
pub struct VoteService {
    ledger: VoteLedger,
    targets: DynTargetStore,
    users: DynUserStore,
    broadcaster: DynBroadcaster,
    db: DbPool,
}

impl VoteService {
    pub fn new(db: DbPool, broadcaster: DynBroadcaster, reputation: ReputationTable) -> Self {
        let store = Arc::new(SqliteVoteStore::new(db.clone()));
        Self {
            ledger: VoteLedger::new(store.clone(), store.clone(), reputation),
            targets: store.clone(),
            users: store,
            broadcaster,
            db,
        }
    }

    pub async fn cast(
        &self,
        request: &VoteRequest,
        voter_name: &str,
    ) -> Result<VoteOutcome, VoteError> {
        let receipt = self.ledger.submit_vote(request).await?;

        let new_score = self
            .targets
            .apply_score_delta(&request.target_id, request.kind, receipt.score_delta)
            .await?;
        let new_reputation = self
            .users
            .apply_reputation_delta(&receipt.author_id, receipt.reputation_delta)
            .await?;

        tracing::info!(
            voter = %request.voter_id,
            target = %request.target_id,
            kind = %request.kind,
            action = receipt.transition.as_str(),
            score_delta = receipt.score_delta,
            reputation_delta = receipt.reputation_delta,
            "vote applied"
        );

        if receipt.transition == Transition::Created {
            self.notify_author(request, &receipt.author_id, voter_name);
        }

        self.broadcaster.publish(
            &topics::target(request.kind, &request.target_id),
            json!({
                "type": "vote",
                "action": receipt.transition,
                "targetId": request.target_id,
                "targetType": request.kind,
                "voteScore": new_score,
            }),
        );

        let vote = match receipt.transition {
            Transition::Removed => None,
            _ => Some(receipt.vote),
        };

        Ok(VoteOutcome {
            action: receipt.transition,
            vote,
            new_score,
            new_reputation,
        })
    }

    fn notify_author(&self, request: &VoteRequest, author_id: &str, voter_name: &str) {
        let conn = match self.db.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Skipping vote notification: {}", e);
                return;
            }
        };

        notifications::create_best_effort(
            &conn,
            self.broadcaster.as_ref(),
            &NewNotification {
                recipient_id: author_id,
                actor_id: &request.voter_id,
                kind: NotificationKind::Vote,
                target_id: &request.target_id,
                target_kind: request.kind,
                message: format!(
                    "{} {}d your {}",
                    voter_name, request.direction, request.kind
                ),
            },
        );
    }
}
