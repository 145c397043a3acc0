use crate::Database;
use crate::models::{ConversationRow, MessageRow, NotificationRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, m.receiver_id, m.content, m.media_url, m.media_type, m.status, m.created_at";

/// Ordinal of `MessageStatus::Read` as stored in `messages.status`.
const STATUS_READ: i64 = 2;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO users (id, username) VALUES (?1, ?2)", (id, username))?;
            Ok(())
        })
    }

    pub fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_suspended = ?2 WHERE id = ?1",
                params![id, suspended],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Blocks --

    /// Insert the directed edge. Returns false if it already existed.
    pub fn insert_block(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id) VALUES (?1, ?2)",
                (blocker_id, blocked_id),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn delete_block(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                (blocker_id, blocked_id),
            )?;
            Ok(removed > 0)
        })
    }

    /// True if an edge exists in either direction.
    pub fn is_blocked_pair(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let blocked: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM blocks
                    WHERE (blocker_id = ?1 AND blocked_id = ?2)
                       OR (blocker_id = ?2 AND blocked_id = ?1)
                 )",
                (a, b),
                |row| row.get(0),
            )?;
            Ok(blocked)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, media_url, media_type, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.content,
                    msg.media_url,
                    msg.media_type,
                    msg.status,
                    msg.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
            let row = conn.query_row(&sql, [id], |row| message_from_row(row, 0)).optional()?;
            Ok(row)
        })
    }

    /// Raise the status to `status` if it is currently lower. A single
    /// conditional UPDATE, so concurrent callers can only move it forward.
    /// Returns whether the row changed.
    pub fn advance_message_status(&self, id: &str, status: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1 AND status < ?2",
                params![id, status],
            )?;
            Ok(changed > 0)
        })
    }

    /// Mark every unread message from `sender_id` to `reader_id` as read.
    /// Returns the ids that changed, oldest first.
    pub fn mark_conversation_read(&self, reader_id: &str, sender_id: &str) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE sender_id = ?1 AND receiver_id = ?2 AND status < ?3
                     ORDER BY created_at ASC, rowid ASC",
                )?;
                stmt.query_map(params![sender_id, reader_id, STATUS_READ], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?
            };

            if !ids.is_empty() {
                tx.execute(
                    "UPDATE messages SET status = ?3
                     WHERE sender_id = ?1 AND receiver_id = ?2 AND status < ?3",
                    params![sender_id, reader_id, STATUS_READ],
                )?;
            }

            tx.commit()?;
            Ok(ids)
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    /// Messages exchanged between two users, oldest first.
    pub fn list_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.created_at ASC, m.rowid ASC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_a, user_b, limit, offset], |row| message_from_row(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One row per counterpart with the most recent message, newest first.
    pub fn list_conversation_summaries(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| query_conversation_summaries(conn, user_id))
    }

    pub fn count_unread_messages(&self, receiver_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND status < ?2",
                params![receiver_id, STATUS_READ],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, n: &NotificationRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, actor_id, kind, payload, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![n.id, n.user_id, n.actor_id, n.kind, n.payload, n.is_read, n.created_at],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, user_id: &str, limit: u32, offset: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, actor_id, kind, payload, is_read, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![user_id, limit, offset], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        actor_id: row.get(2)?,
                        kind: row.get(3)?,
                        payload: row.get(4)?,
                        is_read: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread_notifications(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Returns false if no notification with that id belongs to the user.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let matched = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(matched > 0)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, is_suspended, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                is_suspended: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_conversation_summaries(conn: &Connection, user_id: &str) -> Result<Vec<ConversationRow>> {
    // Rank each counterpart's messages newest first and keep the top one.
    // JOIN users for the counterpart name and count unread in the same pass.
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}, m.counterpart, COALESCE(u.username, 'unknown'),
                (SELECT COUNT(*) FROM messages x
                  WHERE x.sender_id = m.counterpart AND x.receiver_id = ?1 AND x.status < ?2)
         FROM (
             SELECT id, sender_id, receiver_id, content, media_url, media_type, status, created_at,
                    CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS counterpart,
                    ROW_NUMBER() OVER (
                        PARTITION BY CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                        ORDER BY created_at DESC, rowid DESC
                    ) AS rn
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1
         ) m
         LEFT JOIN users u ON u.id = m.counterpart
         WHERE m.rn = 1
         ORDER BY m.created_at DESC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, STATUS_READ], |row| {
            Ok(ConversationRow {
                last_message: message_from_row(row, 0)?,
                counterpart_id: row.get(8)?,
                counterpart_username: row.get(9)?,
                unread_count: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(offset)?,
        sender_id: row.get(offset + 1)?,
        receiver_id: row.get(offset + 2)?,
        content: row.get(offset + 3)?,
        media_url: row.get(offset + 4)?,
        media_type: row.get(offset + 5)?,
        status: row.get(offset + 6)?,
        created_at: row.get(offset + 7)?,
    })
}
