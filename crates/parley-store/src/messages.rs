use rusqlite::params;

use parley_shared::types::{ConversationId, DeliveryStatus, MessageId, MessageKind, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::{not_found_or, Result};
use crate::models::Message;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, message_type, sent_at, status";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, sent_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.kind.as_str(),
                codec::ts(&message.sent_at),
                message.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found_or)
    }

    /// Newest first.
    pub fn get_messages_for_conversation(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY sent_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Advance a message's delivery status. A status never moves backwards:
    /// returns `false` when the message already has `status` or a later one.
    pub fn update_message_status(&self, id: MessageId, status: DeliveryStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?1
             WHERE id = ?2
               AND (CASE status WHEN 'SENT' THEN 0 WHEN 'DELIVERED' THEN 1 ELSE 2 END) < ?3",
            params![status.as_str(), id.to_string(), status as i64],
        )?;
        Ok(affected > 0)
    }

    /// Messages in the conversation not sent by `user_id` that the user has
    /// not read yet, oldest first.
    pub fn unread_message_ids(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id FROM messages m
             WHERE m.conversation_id = ?1
               AND m.sender_id != ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )
             ORDER BY m.sent_at, m.rowid",
        )?;
        let rows = stmt.query_map(
            params![conversation_id.to_string(), user_id.to_string()],
            |row| codec::id(row, 0),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: codec::id(row, 0)?,
        conversation_id: codec::id(row, 1)?,
        sender_id: codec::id(row, 2)?,
        content: row.get(3)?,
        kind: codec::variant(row, 4, MessageKind::parse)?,
        sent_at: codec::time(row, 5)?,
        status: codec::variant(row, 6, DeliveryStatus::parse)?,
    })
}
