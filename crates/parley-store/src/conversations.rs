//! Conversations and their membership.
//!
//! The real-time core only reads membership; the write helpers exist for the
//! conversation service and for seeding tests.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parley_shared::types::{ConversationId, UserId};

use crate::codec;
use crate::database::Database;
use crate::error::{not_found_or, Result};
use crate::models::{Conversation, ConversationKind};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a conversation and add the creator plus `members` as
    /// participants, atomically.
    pub fn create_conversation(
        &mut self,
        kind: ConversationKind,
        name: Option<&str>,
        creator_id: UserId,
        members: &[UserId],
    ) -> Result<Conversation> {
        let conversation = Conversation {
            id: ConversationId::new(),
            kind,
            name: name.map(str::to_string),
            creator_id,
            created_at: Utc::now(),
        };
        let joined_at = codec::ts(&conversation.created_at);

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, kind, name, creator_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id.to_string(),
                kind.as_str(),
                conversation.name,
                creator_id.to_string(),
                joined_at,
            ],
        )?;
        for user in std::iter::once(&creator_id).chain(members.iter()) {
            tx.execute(
                "INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation.id.to_string(), user.to_string(), joined_at],
            )?;
        }
        tx.commit()?;

        Ok(conversation)
    }

    /// Add (or re-activate) a participant.
    pub fn add_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO participants (conversation_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (conversation_id, user_id) DO UPDATE SET left_at = NULL",
            params![
                conversation_id.to_string(),
                user_id.to_string(),
                codec::ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Mark a participant as having left. Their history stays.
    pub fn remove_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE participants SET left_at = ?3
             WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            params![
                conversation_id.to_string(),
                user_id.to_string(),
                codec::ts(&Utc::now()),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, kind, name, creator_id, created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(Conversation {
                        id: codec::id(row, 0)?,
                        kind: codec::variant(row, 1, ConversationKind::parse)?,
                        name: row.get(2)?,
                        creator_id: codec::id(row, 3)?,
                        created_at: codec::time(row, 4)?,
                    })
                },
            )
            .map_err(not_found_or)
    }

    pub fn conversation_exists(&self, id: ConversationId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Active participants, in join order.
    pub fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM participants
             WHERE conversation_id = ?1 AND left_at IS NULL
             ORDER BY joined_at, rowid",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| codec::id(row, 0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn is_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM participants
                 WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL",
                params![conversation_id.to_string(), user_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Conversations the user is an active participant of.
    pub fn conversation_ids_for_user(&self, user_id: UserId) -> Result<Vec<ConversationId>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id FROM participants
             WHERE user_id = ?1 AND left_at IS NULL
             ORDER BY joined_at",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| codec::id(row, 0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
