use rusqlite::params;
use uuid::Uuid;

use parley_shared::types::MessageId;

use crate::codec;
use crate::database::Database;
use crate::error::Result;
use crate::models::Reaction;

impl Database {
    /// Store a reaction. The same user reacting to the same message with the
    /// same emoji twice is a no-op and returns `false`.
    pub fn add_reaction(&self, reaction: &Reaction) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO reactions (id, message_id, conversation_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                reaction.message_id.to_string(),
                reaction.conversation_id.to_string(),
                reaction.user_id.to_string(),
                reaction.emoji,
                codec::ts(&reaction.created_at),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, conversation_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(Reaction {
                message_id: codec::id(row, 0)?,
                conversation_id: codec::id(row, 1)?,
                user_id: codec::id(row, 2)?,
                emoji: row.get(3)?,
                created_at: codec::time(row, 4)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}
