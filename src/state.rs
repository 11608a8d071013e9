use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::Arc;

use crate::config::Config;
use crate::realtime::DynBroadcaster;
use crate::votes::VoteService;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub broadcaster: DynBroadcaster,
    pub votes: Arc<VoteService>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, broadcaster: DynBroadcaster) -> Self {
        let votes = Arc::new(VoteService::new(
            db.clone(),
            broadcaster.clone(),
            config.reputation,
        ));
        Self {
            db,
            config,
            broadcaster,
            votes,
        }
    }
}
