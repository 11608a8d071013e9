// Domain types - pure, no storage access
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a vote (or a comment) is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Question,
    Answer,
}

impl TargetKind {
    pub const ALL: [TargetKind; 2] = [TargetKind::Question, TargetKind::Answer];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "question" => Some(Self::Question),
            "answer" => Some(Self::Answer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
        }
    }

    /// Table holding records of this kind. Both tables share the
    /// `id`, `author_id` and `vote_score` columns.
    pub fn table(self) -> &'static str {
        match self {
            Self::Question => "questions",
            Self::Answer => "answers",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upvote,
    Downvote,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upvote" => Some(Self::Upvote),
            "downvote" => Some(Self::Downvote),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }

    /// Contribution of one vote in this direction to a target's score.
    pub fn score_value(self) -> i64 {
        match self {
            Self::Upvote => 1,
            Self::Downvote => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub voter_id: String,
    pub target_id: String,
    pub target_kind: TargetKind,
    pub direction: Direction,
    pub created_at: String,
}

/// Outcome of a vote submission as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Created,
    Updated,
    Removed,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

/// Reputation points awarded to a target's author, keyed by
/// (target kind, direction), plus the accepted-answer bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationTable {
    pub question_upvote: i64,
    pub question_downvote: i64,
    pub answer_upvote: i64,
    pub answer_downvote: i64,
    pub answer_accepted: i64,
}

impl Default for ReputationTable {
    fn default() -> Self {
        Self {
            question_upvote: 5,
            question_downvote: -2,
            answer_upvote: 10,
            answer_downvote: -2,
            answer_accepted: 15,
        }
    }
}

impl ReputationTable {
    pub fn award(&self, kind: TargetKind, direction: Direction) -> i64 {
        match (kind, direction) {
            (TargetKind::Question, Direction::Upvote) => self.question_upvote,
            (TargetKind::Question, Direction::Downvote) => self.question_downvote,
            (TargetKind::Answer, Direction::Upvote) => self.answer_upvote,
            (TargetKind::Answer, Direction::Downvote) => self.answer_downvote,
        }
    }
}

/// The state change a submission causes, decided from the voter's
/// existing vote (if any) and the requested direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Create(Direction),
    Flip { from: Direction, to: Direction },
    Remove(Direction),
}

impl VoteChange {
    /// Same direction twice toggles the vote off; the opposite direction
    /// flips it in place.
    pub fn decide(existing: Option<Direction>, requested: Direction) -> Self {
        match existing {
            None => Self::Create(requested),
            Some(current) if current == requested => Self::Remove(current),
            Some(current) => Self::Flip {
                from: current,
                to: requested,
            },
        }
    }

    pub fn transition(&self) -> Transition {
        match self {
            Self::Create(_) => Transition::Created,
            Self::Flip { .. } => Transition::Updated,
            Self::Remove(_) => Transition::Removed,
        }
    }

    pub fn score_delta(&self) -> i64 {
        match *self {
            Self::Create(direction) => direction.score_value(),
            Self::Flip { from, to } => to.score_value() - from.score_value(),
            Self::Remove(direction) => -direction.score_value(),
        }
    }

    pub fn reputation_delta(&self, kind: TargetKind, table: &ReputationTable) -> i64 {
        match *self {
            Self::Create(direction) => table.award(kind, direction),
            Self::Flip { from, to } => table.award(kind, to) - table.award(kind, from),
            Self::Remove(direction) => -table.award(kind, direction),
        }
    }

    /// Direction stored after the change, `None` when the vote is gone.
    pub fn resulting_direction(&self) -> Option<Direction> {
        match *self {
            Self::Create(direction) => Some(direction),
            Self::Flip { to, .. } => Some(to),
            Self::Remove(_) => None,
        }
    }
}
