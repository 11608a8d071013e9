use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::extractors::CurrentUser;

/// Create a new session for a user. Returns the session token.
pub fn create_session(
    conn: &rusqlite::Connection,
    user_id: &str,
    hours: u64,
) -> Result<String, rusqlite::Error> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Resolve a live session token to its user.
pub fn find_session_user(
    conn: &rusqlite::Connection,
    token: &str,
) -> Result<Option<CurrentUser>, rusqlite::Error> {
    conn.query_row(
        "SELECT u.id, u.username, u.is_admin FROM sessions s \
         JOIN users u ON u.id = s.user_id \
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |row| {
            Ok(CurrentUser {
                id: row.get(0)?,
                username: row.get(1)?,
                is_admin: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Delete a session by token.
pub fn delete_session(conn: &rusqlite::Connection, token: &str) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop sessions past their expiry. Returns how many were removed.
pub fn purge_expired(conn: &rusqlite::Connection) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> (tempfile::TempDir, crate::state::DbPool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO users (id, username, email, password_hash, is_admin)
                 VALUES ('u1', 'alice', 'alice@example.com', 'x', 1)",
                [],
            )
            .unwrap();
        (tmp, pool)
    }

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn session_round_trip() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();

        let token = create_session(&conn, "u1", 1).unwrap();
        let user = find_session_user(&conn, &token).unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.username, "alice");
        assert!(user.is_admin);

        delete_session(&conn, &token).unwrap();
        assert!(find_session_user(&conn, &token).unwrap().is_none());
    }

    #[test]
    fn expired_sessions_are_ignored_and_purged() {
        let (_tmp, pool) = setup();
        let conn = pool.get().unwrap();

        conn.execute(
            "INSERT INTO sessions (id, user_id, token, expires_at)
             VALUES ('s1', 'u1', 'stale', datetime('now', '-1 hours'))",
            [],
        )
        .unwrap();
        assert!(find_session_user(&conn, "stale").unwrap().is_none());
        assert_eq!(purge_expired(&conn).unwrap(), 1);
    }
}
