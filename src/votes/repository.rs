// Repository pattern - isolates all database side effects of voting
use async_trait::async_trait;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use thiserror::Error;

use crate::db::is_unique_violation;
use crate::state::DbPool;
use crate::votes::domain::{Direction, TargetKind, Vote};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// A votable record as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub kind: TargetKind,
    pub author_id: String,
    pub vote_score: i64,
}

#[async_trait]
pub trait VoteRepository: Send + Sync {
    async fn find(
        &self,
        voter_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> Result<Option<Vote>, RepositoryError>;

    /// Insert a new vote. A second vote for the same
    /// (voter, target, kind) fails with `RepositoryError::Conflict`.
    async fn insert(&self, vote: &Vote) -> Result<(), RepositoryError>;

    /// Flip the vote from `from` to `to`. Returns false when the row is gone
    /// or no longer holds `from`.
    async fn update_direction(
        &self,
        vote_id: &str,
        from: Direction,
        to: Direction,
    ) -> Result<bool, RepositoryError>;

    /// Returns false when the row is gone or no longer holds `direction`.
    async fn delete(&self, vote_id: &str, direction: Direction) -> Result<bool, RepositoryError>;

    /// The voter's directions on any of `target_ids`.
    async fn directions_for(
        &self,
        voter_id: &str,
        kind: TargetKind,
        target_ids: &[String],
    ) -> Result<Vec<(String, Direction)>, RepositoryError>;
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn find_by_id(
        &self,
        id: &str,
        kind: TargetKind,
    ) -> Result<Option<Target>, RepositoryError>;

    /// Atomically add `delta` to the target's score, returning the new score.
    async fn apply_score_delta(
        &self,
        id: &str,
        kind: TargetKind,
        delta: i64,
    ) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Atomically add `delta` to the user's reputation, flooring at zero.
    /// Returns the new reputation.
    async fn apply_reputation_delta(
        &self,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, RepositoryError>;
}

pub type DynVoteRepository = Arc<dyn VoteRepository>;
pub type DynTargetStore = Arc<dyn TargetStore>;
pub type DynUserStore = Arc<dyn UserStore>;

impl ToSql for TargetKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TargetKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        TargetKind::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown target kind: {}", s).into()))
    }
}

impl ToSql for Direction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Direction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Direction::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown vote direction: {}", s).into()))
    }
}

fn vote_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: row.get(0)?,
        voter_id: row.get(1)?,
        target_id: row.get(2)?,
        target_kind: row.get(3)?,
        direction: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn find_target(
    conn: &rusqlite::Connection,
    id: &str,
    kind: TargetKind,
) -> rusqlite::Result<Option<Target>> {
    let sql = format!(
        "SELECT id, author_id, vote_score FROM {} WHERE id = ?1",
        kind.table()
    );
    conn.query_row(&sql, params![id], |row| {
        Ok(Target {
            id: row.get(0)?,
            kind,
            author_id: row.get(1)?,
            vote_score: row.get(2)?,
        })
    })
    .optional()
}

/// Add `delta` to a user's reputation, flooring at zero. `None` when the
/// user does not exist. Shared with answer acceptance, which runs inside
/// its own transaction.
pub fn adjust_reputation(
    conn: &rusqlite::Connection,
    user_id: &str,
    delta: i64,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "UPDATE users SET reputation = MAX(0, reputation + ?2) WHERE id = ?1
         RETURNING reputation",
        params![user_id, delta],
        |row| row.get(0),
    )
    .optional()
}

/// SQLite implementation of all three voting collaborators.
#[derive(Clone)]
pub struct SqliteVoteStore {
    pool: DbPool,
}

impl SqliteVoteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoteRepository for SqliteVoteStore {
    async fn find(
        &self,
        voter_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> Result<Option<Vote>, RepositoryError> {
        let conn = self.pool.get()?;

        let vote = conn
            .query_row(
                "SELECT id, voter_id, target_id, target_kind, direction, created_at
                 FROM votes
                 WHERE voter_id = ?1 AND target_id = ?2 AND target_kind = ?3",
                params![voter_id, target_id, kind],
                vote_from_row,
            )
            .optional()?;

        Ok(vote)
    }

    async fn insert(&self, vote: &Vote) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;

        let result = conn.execute(
            "INSERT INTO votes (id, voter_id, target_id, target_kind, direction, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                vote.id,
                vote.voter_id,
                vote.target_id,
                vote.target_kind,
                vote.direction,
                vote.created_at
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "vote by {} on {} {} already exists",
                vote.voter_id, vote.target_kind, vote.target_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_direction(
        &self,
        vote_id: &str,
        from: Direction,
        to: Direction,
    ) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;

        let rows = conn.execute(
            "UPDATE votes SET direction = ?3 WHERE id = ?1 AND direction = ?2",
            params![vote_id, from, to],
        )?;

        Ok(rows > 0)
    }

    async fn delete(
        &self,
        vote_id: &str,
        direction: Direction,
    ) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;

        let rows = conn.execute(
            "DELETE FROM votes WHERE id = ?1 AND direction = ?2",
            params![vote_id, direction],
        )?;

        Ok(rows > 0)
    }

    async fn directions_for(
        &self,
        voter_id: &str,
        kind: TargetKind,
        target_ids: &[String],
    ) -> Result<Vec<(String, Direction)>, RepositoryError> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, direction FROM votes
             WHERE voter_id = ?1 AND target_kind = ?2 AND target_id = ?3",
        )?;

        let mut found = Vec::new();
        for target_id in target_ids {
            let direction: Option<Direction> = stmt
                .query_row(params![voter_id, kind, target_id], |row| row.get(1))
                .optional()?;
            if let Some(direction) = direction {
                found.push((target_id.clone(), direction));
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl TargetStore for SqliteVoteStore {
    async fn find_by_id(
        &self,
        id: &str,
        kind: TargetKind,
    ) -> Result<Option<Target>, RepositoryError> {
        let conn = self.pool.get()?;
        Ok(find_target(&conn, id, kind)?)
    }

    async fn apply_score_delta(
        &self,
        id: &str,
        kind: TargetKind,
        delta: i64,
    ) -> Result<i64, RepositoryError> {
        let conn = self.pool.get()?;

        let sql = format!(
            "UPDATE {} SET vote_score = vote_score + ?2 WHERE id = ?1 RETURNING vote_score",
            kind.table()
        );
        let score: Option<i64> = conn
            .query_row(&sql, params![id, delta], |row| row.get(0))
            .optional()?;

        score.ok_or_else(|| RepositoryError::NotFound(format!("{} {}", kind, id)))
    }
}

#[async_trait]
impl UserStore for SqliteVoteStore {
    async fn apply_reputation_delta(
        &self,
        user_id: &str,
        delta: i64,
    ) -> Result<i64, RepositoryError> {
        let conn = self.pool.get()?;
        let reputation = adjust_reputation(&conn, user_id, delta)?;

        reputation.ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))
    }
}
