//! Narrow, id-based repository interfaces consumed by the real-time core.
//!
//! The core never holds object graphs; it asks these traits for ids and
//! attributes on demand. [`SqliteStore`] implements all of them on top of a
//! shared [`Database`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use parley_shared::types::{
    CallId, ConversationId, DeliveryStatus, MessageId, NotificationId, UserId, UserStatus,
};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CallSession, Message, Notification, Reaction};

pub trait UserRepository: Send + Sync {
    fn user_exists(&self, id: UserId) -> Result<bool>;
    fn set_user_status(&self, id: UserId, status: UserStatus) -> Result<()>;
}

pub trait ConversationRepository: Send + Sync {
    fn conversation_exists(&self, id: ConversationId) -> Result<bool>;
    /// Active participants.
    fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>>;
    fn is_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool>;
    fn conversation_ids_for_user(&self, user_id: UserId) -> Result<Vec<ConversationId>>;
}

pub trait MessageRepository: Send + Sync {
    fn insert_message(&self, message: &Message) -> Result<()>;
    fn get_message(&self, id: MessageId) -> Result<Message>;
    /// Forward-only; `false` means nothing changed.
    fn update_message_status(&self, id: MessageId, status: DeliveryStatus) -> Result<bool>;
    fn unread_message_ids(&self, conversation_id: ConversationId, user_id: UserId)
        -> Result<Vec<MessageId>>;
}

pub trait ReceiptRepository: Send + Sync {
    /// `true` when a new receipt row was written.
    fn insert_receipt_if_absent(
        &self,
        message_id: MessageId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool>;
    fn has_receipt(&self, message_id: MessageId, user_id: UserId) -> Result<bool>;
}

pub trait ReactionRepository: Send + Sync {
    fn add_reaction(&self, reaction: &Reaction) -> Result<bool>;
}

pub trait NotificationRepository: Send + Sync {
    fn insert_notification(&self, notification: &Notification) -> Result<()>;
    /// Visible (not soft-deleted) notification owned by `recipient_id`.
    fn get_notification(&self, id: NotificationId, recipient_id: UserId) -> Result<Notification>;
    fn unread_count(&self, recipient_id: UserId) -> Result<u64>;
    fn unread_notifications(&self, recipient_id: UserId) -> Result<Vec<Notification>>;
    fn list_notifications(&self, recipient_id: UserId, limit: u32, offset: u32)
        -> Result<Vec<Notification>>;
    fn mark_notification_read(
        &self,
        id: NotificationId,
        recipient_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool>;
    fn mark_all_notifications_read(&self, recipient_id: UserId, read_at: DateTime<Utc>)
        -> Result<usize>;
    fn soft_delete_notification(&self, id: NotificationId, recipient_id: UserId) -> Result<bool>;
    fn soft_delete_all_notifications(&self, recipient_id: UserId) -> Result<usize>;
}

pub trait CallRepository: Send + Sync {
    fn insert_call(&self, call: &CallSession) -> Result<()>;
    fn get_call(&self, id: &CallId) -> Result<CallSession>;
    fn update_call(&self, call: &CallSession) -> Result<()>;
}

/// Everything the real-time core needs from persistence.
pub trait Store:
    UserRepository
    + ConversationRepository
    + MessageRepository
    + ReceiptRepository
    + ReactionRepository
    + NotificationRepository
    + CallRepository
    + 'static
{
}

impl<T> Store for T where
    T: UserRepository
        + ConversationRepository
        + MessageRepository
        + ReceiptRepository
        + ReactionRepository
        + NotificationRepository
        + CallRepository
        + 'static
{
}

/// Thread-safe handle to a single SQLite [`Database`].
///
/// Each repository call takes the connection lock for the duration of one
/// statement (or one transaction), so callers may share the store freely
/// across tasks.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(Mutex::new(db)) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` with exclusive access to the database. Used for the seeding
    /// helpers (`insert_user`, `create_conversation`, ...) that sit outside
    /// the repository traits.
    pub fn with_db<R>(&self, f: impl FnOnce(&mut Database) -> Result<R>) -> Result<R> {
        let mut db = self.lock()?;
        f(&mut db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl UserRepository for SqliteStore {
    fn user_exists(&self, id: UserId) -> Result<bool> {
        self.lock()?.user_exists(id)
    }

    fn set_user_status(&self, id: UserId, status: UserStatus) -> Result<()> {
        self.lock()?.set_user_status(id, status)
    }
}

impl ConversationRepository for SqliteStore {
    fn conversation_exists(&self, id: ConversationId) -> Result<bool> {
        self.lock()?.conversation_exists(id)
    }

    fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        self.lock()?.participant_ids(conversation_id)
    }

    fn is_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool> {
        self.lock()?.is_participant(conversation_id, user_id)
    }

    fn conversation_ids_for_user(&self, user_id: UserId) -> Result<Vec<ConversationId>> {
        self.lock()?.conversation_ids_for_user(user_id)
    }
}

impl MessageRepository for SqliteStore {
    fn insert_message(&self, message: &Message) -> Result<()> {
        self.lock()?.insert_message(message)
    }

    fn get_message(&self, id: MessageId) -> Result<Message> {
        self.lock()?.get_message(id)
    }

    fn update_message_status(&self, id: MessageId, status: DeliveryStatus) -> Result<bool> {
        self.lock()?.update_message_status(id, status)
    }

    fn unread_message_ids(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Vec<MessageId>> {
        self.lock()?.unread_message_ids(conversation_id, user_id)
    }
}

impl ReceiptRepository for SqliteStore {
    fn insert_receipt_if_absent(
        &self,
        message_id: MessageId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.lock()?.insert_receipt_if_absent(message_id, user_id, read_at)
    }

    fn has_receipt(&self, message_id: MessageId, user_id: UserId) -> Result<bool> {
        self.lock()?.has_receipt(message_id, user_id)
    }
}

impl ReactionRepository for SqliteStore {
    fn add_reaction(&self, reaction: &Reaction) -> Result<bool> {
        self.lock()?.add_reaction(reaction)
    }
}

impl NotificationRepository for SqliteStore {
    fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.lock()?.insert_notification(notification)
    }

    fn get_notification(&self, id: NotificationId, recipient_id: UserId) -> Result<Notification> {
        self.lock()?.get_notification(id, recipient_id)
    }

    fn unread_count(&self, recipient_id: UserId) -> Result<u64> {
        self.lock()?.unread_count(recipient_id)
    }

    fn unread_notifications(&self, recipient_id: UserId) -> Result<Vec<Notification>> {
        self.lock()?.unread_notifications(recipient_id)
    }

    fn list_notifications(
        &self,
        recipient_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        self.lock()?.list_notifications(recipient_id, limit, offset)
    }

    fn mark_notification_read(
        &self,
        id: NotificationId,
        recipient_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.lock()?.mark_notification_read(id, recipient_id, read_at)
    }

    fn mark_all_notifications_read(
        &self,
        recipient_id: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.lock()?.mark_all_notifications_read(recipient_id, read_at)
    }

    fn soft_delete_notification(&self, id: NotificationId, recipient_id: UserId) -> Result<bool> {
        self.lock()?.soft_delete_notification(id, recipient_id)
    }

    fn soft_delete_all_notifications(&self, recipient_id: UserId) -> Result<usize> {
        self.lock()?.soft_delete_all_notifications(recipient_id)
    }
}

impl CallRepository for SqliteStore {
    fn insert_call(&self, call: &CallSession) -> Result<()> {
        self.lock()?.insert_call(call)
    }

    fn get_call(&self, id: &CallId) -> Result<CallSession> {
        self.lock()?.get_call(id)
    }

    fn update_call(&self, call: &CallSession) -> Result<()> {
        self.lock()?.update_call(call)
    }
}
