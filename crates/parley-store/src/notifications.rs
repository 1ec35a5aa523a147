//! Persisted notifications.
//!
//! Every query is scoped to the recipient so that one user can never read or
//! mutate another user's notifications. Deletion is soft: rows are hidden via
//! `is_deleted` and never removed.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::types::{NotificationId, NotificationType, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::{not_found_or, Result};
use crate::models::Notification;

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, sender_id, title, body, type, data, \
     is_read, is_deleted, created_at, read_at";

impl Database {
    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications
                (id, recipient_id, sender_id, title, body, type, data,
                 is_read, is_deleted, created_at, read_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                notification.id.to_string(),
                notification.recipient_id.to_string(),
                notification.sender_id.map(|id| id.to_string()),
                notification.title,
                notification.body,
                notification.kind.as_str(),
                serde_json::to_string(&notification.data)?,
                notification.is_read,
                notification.is_deleted,
                codec::ts(&notification.created_at),
                notification.read_at.as_ref().map(codec::ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_notification(&self, id: NotificationId, recipient_id: UserId) -> Result<Notification> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                     WHERE id = ?1 AND recipient_id = ?2 AND is_deleted = 0"
                ),
                params![id.to_string(), recipient_id.to_string()],
                row_to_notification,
            )
            .map_err(not_found_or)
    }

    pub fn unread_count(&self, recipient_id: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE recipient_id = ?1 AND is_read = 0 AND is_deleted = 0",
            params![recipient_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Unread, non-deleted notifications, newest first.
    pub fn unread_notifications(&self, recipient_id: UserId) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ?1 AND is_read = 0 AND is_deleted = 0
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![recipient_id.to_string()], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// All non-deleted notifications, newest first.
    pub fn list_notifications(
        &self,
        recipient_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ?1 AND is_deleted = 0
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![recipient_id.to_string(), limit, offset],
            row_to_notification,
        )?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Returns `false` if the notification does not exist for this recipient
    /// or was already read.
    pub fn mark_notification_read(
        &self,
        id: NotificationId,
        recipient_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1, read_at = ?3
             WHERE id = ?1 AND recipient_id = ?2 AND is_read = 0 AND is_deleted = 0",
            params![id.to_string(), recipient_id.to_string(), codec::ts(&read_at)],
        )?;
        Ok(affected > 0)
    }

    /// Returns the number of notifications that changed.
    pub fn mark_all_notifications_read(
        &self,
        recipient_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2
             WHERE recipient_id = ?1 AND is_read = 0 AND is_deleted = 0",
            params![recipient_id.to_string(), codec::ts(&read_at)],
        )?;
        Ok(affected)
    }

    pub fn soft_delete_notification(&self, id: NotificationId, recipient_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_deleted = 1
             WHERE id = ?1 AND recipient_id = ?2 AND is_deleted = 0",
            params![id.to_string(), recipient_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn soft_delete_all_notifications(&self, recipient_id: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_deleted = 1
             WHERE recipient_id = ?1 AND is_deleted = 0",
            params![recipient_id.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: codec::id(row, 0)?,
        recipient_id: codec::id(row, 1)?,
        sender_id: codec::opt_id(row, 2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        kind: codec::variant(row, 5, NotificationType::parse)?,
        data: codec::json(row, 6)?,
        is_read: row.get(7)?,
        is_deleted: row.get(8)?,
        created_at: codec::time(row, 9)?,
        read_at: codec::opt_time(row, 10)?,
    })
}
