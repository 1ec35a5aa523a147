use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::types::{MessageId, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::Result;
use crate::models::ReadReceipt;

impl Database {
    /// Record that `user_id` read `message_id`. Returns `false` if a receipt
    /// already existed; the original `read_at` is kept.
    pub fn insert_receipt_if_absent(
        &self,
        message_id: MessageId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             VALUES (?1, ?2, ?3)",
            params![message_id.to_string(), user_id.to_string(), codec::ts(&read_at)],
        )?;
        Ok(affected > 0)
    }

    pub fn has_receipt(&self, message_id: MessageId, user_id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM message_reads WHERE message_id = ?1 AND user_id = ?2",
                params![message_id.to_string(), user_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn receipts_for_message(&self, message_id: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, read_at FROM message_reads
             WHERE message_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(ReadReceipt {
                message_id: codec::id(row, 0)?,
                user_id: codec::id(row, 1)?,
                read_at: codec::time(row, 2)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }
}
