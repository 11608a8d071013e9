use rusqlite::{params, OptionalExtension};

use crate::db::models::Notification;
use crate::realtime::{topics, Broadcaster};
use crate::votes::TargetKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    NewAnswer,
    NewComment,
    Vote,
    AnswerAccepted,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewAnswer => "new_answer",
            Self::NewComment => "new_comment",
            Self::Vote => "vote",
            Self::AnswerAccepted => "answer_accepted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub recipient_id: &'a str,
    pub actor_id: &'a str,
    pub kind: NotificationKind,
    pub target_id: &'a str,
    pub target_kind: TargetKind,
    pub message: String,
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        actor_id: row.get(2)?,
        kind: row.get(3)?,
        target_id: row.get(4)?,
        target_kind: row.get(5)?,
        message: row.get(6)?,
        is_read: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, actor_id, kind, target_id, target_kind, message, is_read, created_at";

/// Store a notification and push it to the recipient's feed. Acting on
/// your own content notifies nobody.
pub fn create(
    conn: &rusqlite::Connection,
    broadcaster: &dyn Broadcaster,
    new: &NewNotification<'_>,
) -> rusqlite::Result<Option<Notification>> {
    if new.recipient_id == new.actor_id {
        return Ok(None);
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, actor_id, kind, target_id, target_kind, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            new.recipient_id,
            new.actor_id,
            new.kind.as_str(),
            new.target_id,
            new.target_kind,
            new.message
        ],
    )?;

    let notification = conn.query_row(
        &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
        params![id],
        notification_from_row,
    )?;

    match serde_json::to_value(&notification) {
        Ok(payload) => broadcaster.publish(&topics::user(new.recipient_id), payload),
        Err(e) => tracing::warn!("Failed to encode notification {}: {}", notification.id, e),
    }

    Ok(Some(notification))
}

/// `create`, with failures logged instead of returned. Notifications never
/// fail the operation that caused them.
pub fn create_best_effort(
    conn: &rusqlite::Connection,
    broadcaster: &dyn Broadcaster,
    new: &NewNotification<'_>,
) {
    if let Err(e) = create(conn, broadcaster, new) {
        tracing::warn!(
            recipient = new.recipient_id,
            kind = new.kind.as_str(),
            "Failed to create notification: {}",
            e
        );
    }
}

pub fn list(
    conn: &rusqlite::Connection,
    recipient_id: &str,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<Notification>, i64)> {
    let filter = if unread_only { " AND is_read = 0" } else { "" };

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1{}",
            filter
        ),
        params![recipient_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE recipient_id = ?1{}
         ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
        NOTIFICATION_COLUMNS, filter
    ))?;
    let items = stmt
        .query_map(params![recipient_id, limit, offset], notification_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((items, total))
}

pub fn unread_count(conn: &rusqlite::Connection, recipient_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
        params![recipient_id],
        |row| row.get(0),
    )
}

/// Returns false if the notification does not exist or belongs to someone else.
pub fn mark_read(
    conn: &rusqlite::Connection,
    recipient_id: &str,
    notification_id: &str,
) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM notifications WHERE id = ?1 AND recipient_id = ?2",
            params![notification_id, recipient_id],
            |row| row.get(0),
        )
        .optional()?;

    if found.is_none() {
        return Ok(false);
    }

    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1",
        params![notification_id],
    )?;
    Ok(true)
}

pub fn mark_all_read(conn: &rusqlite::Connection, recipient_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
        params![recipient_id],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::realtime::ChannelBroadcaster;
    use tempfile::TempDir;

    fn setup() -> (TempDir, crate::state::DbPool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute_batch(
                "INSERT INTO users (id, username, email, password_hash)
                     VALUES ('alice', 'alice', 'alice@example.com', 'x');
                 INSERT INTO users (id, username, email, password_hash)
                     VALUES ('bob', 'bob', 'bob@example.com', 'x');",
            )
            .unwrap();
        (temp_dir, pool)
    }

    fn answer_notice<'a>(recipient: &'a str, actor: &'a str) -> NewNotification<'a> {
        NewNotification {
            recipient_id: recipient,
            actor_id: actor,
            kind: NotificationKind::NewAnswer,
            target_id: "a1",
            target_kind: TargetKind::Answer,
            message: "bob answered your question".to_string(),
        }
    }

    #[tokio::test]
    async fn create_stores_and_publishes() {
        let (_temp, pool) = setup();
        let conn = pool.get().unwrap();
        let broadcaster = ChannelBroadcaster::new(4);
        let mut rx = broadcaster.subscribe().unwrap();

        let created = create(&conn, &broadcaster, &answer_notice("alice", "bob"))
            .unwrap()
            .unwrap();
        assert_eq!(created.kind, "new_answer");
        assert!(!created.is_read);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "user:alice");
        assert_eq!(event.payload["id"], created.id.as_str());
    }

    #[test]
    fn self_actions_do_not_notify() {
        let (_temp, pool) = setup();
        let conn = pool.get().unwrap();
        let broadcaster = ChannelBroadcaster::new(4);

        let created = create(&conn, &broadcaster, &answer_notice("alice", "alice")).unwrap();
        assert!(created.is_none());
        assert_eq!(unread_count(&conn, "alice").unwrap(), 0);
    }

    #[test]
    fn mark_read_is_scoped_to_recipient() {
        let (_temp, pool) = setup();
        let conn = pool.get().unwrap();
        let broadcaster = ChannelBroadcaster::new(4);

        let n = create(&conn, &broadcaster, &answer_notice("alice", "bob"))
            .unwrap()
            .unwrap();
        create(&conn, &broadcaster, &answer_notice("alice", "bob")).unwrap();

        assert!(!mark_read(&conn, "bob", &n.id).unwrap());
        assert!(mark_read(&conn, "alice", &n.id).unwrap());
        assert_eq!(unread_count(&conn, "alice").unwrap(), 1);

        let (unread, total) = list(&conn, "alice", true, 10, 0).unwrap();
        assert_eq!((unread.len(), total), (1, 1));

        assert_eq!(mark_all_read(&conn, "alice").unwrap(), 1);
        let (all, total) = list(&conn, "alice", false, 10, 0).unwrap();
        assert_eq!(total, 2);
        assert!(all.iter().all(|n| n.is_read));
    }
}
