pub mod domain;
pub mod ledger;
pub mod repository;
pub mod service;

pub use domain::{Direction, ReputationTable, TargetKind, Transition, Vote, VoteChange};
pub use ledger::{VoteError, VoteLedger, VoteReceipt, VoteRequest};
pub use repository::{RepositoryError, SqliteVoteStore, Target, TargetStore, UserStore, VoteRepository};
pub use service::{VoteOutcome, VoteService};
