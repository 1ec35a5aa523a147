//! Read receipts.
//!
//! Both operations write first and broadcast second; a broadcast failure
//! never undoes the write. Re-running either with nothing new to mark is a
//! silent no-op.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use parley_shared::protocol::{
    ConversationReadEvent, Destination, Envelope, EventType, MessageReadEvent,
};
use parley_shared::types::{ConversationId, DeliveryStatus, MessageId, UserId};
use parley_store::Store;

use crate::delivery::Fanout;
use crate::error::{CoreError, StoreResultExt};

pub struct ReceiptTracker {
    store: Arc<dyn Store>,
    fanout: Fanout,
}

impl ReceiptTracker {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout) -> Self {
        Self { store, fanout }
    }

    /// Mark every message in the conversation the user has not read (and did
    /// not send) as read. Returns the ids newly marked.
    pub fn mark_read(&self, conversation: ConversationId, user: UserId) -> Result<Vec<MessageId>, CoreError> {
        if !self.store.conversation_exists(conversation)? {
            return Err(CoreError::NotFound(format!("conversation {conversation}")));
        }
        if !self.store.is_participant(conversation, user)? {
            return Err(CoreError::not_participant(user, format!("conversation {conversation}")));
        }

        let read_at = Utc::now();
        let mut marked = Vec::new();
        for message_id in self.store.unread_message_ids(conversation, user)? {
            if self.store.insert_receipt_if_absent(message_id, user, read_at)? {
                self.mark_seen(message_id);
                marked.push(message_id);
            }
        }

        if marked.is_empty() {
            debug!(conversation = %conversation, user = %user, "Nothing new to mark read");
            return Ok(marked);
        }

        let event = ConversationReadEvent {
            user_id: user,
            conversation_id: conversation,
            message_ids: marked.clone(),
            read_at,
        };
        self.broadcast(
            conversation,
            Envelope::new(
                Destination::ConversationRead(conversation),
                EventType::ConversationRead,
                &event,
            ),
        );
        Ok(marked)
    }

    /// Mark one message read. Returns `false` when there was nothing to do:
    /// already read, or the reader is the sender.
    pub fn mark_single_read(&self, message_id: MessageId, user: UserId) -> Result<bool, CoreError> {
        let message = self
            .store
            .get_message(message_id)
            .or_not_found(|| format!("message {message_id}"))?;
        if message.sender_id == user {
            return Ok(false);
        }
        let conversation = message.conversation_id;
        if !self.store.is_participant(conversation, user)? {
            return Err(CoreError::not_participant(user, format!("conversation {conversation}")));
        }
        if self.store.has_receipt(message_id, user)? {
            return Ok(false);
        }

        let read_at = Utc::now();
        if !self.store.insert_receipt_if_absent(message_id, user, read_at)? {
            // Lost a race with a concurrent mark.
            return Ok(false);
        }
        self.mark_seen(message_id);

        let event = MessageReadEvent {
            user_id: user,
            conversation_id: conversation,
            message_id,
            read_at,
        };
        self.broadcast(
            conversation,
            Envelope::new(
                Destination::ConversationRead(conversation),
                EventType::MessageRead,
                &event,
            ),
        );
        Ok(true)
    }

    fn mark_seen(&self, message_id: MessageId) {
        if let Err(e) = self.store.update_message_status(message_id, DeliveryStatus::Seen) {
            warn!(message = %message_id, error = %e, "Failed to mark message seen");
        }
    }

    fn broadcast(&self, conversation: ConversationId, envelope: Envelope) {
        match self.store.participant_ids(conversation) {
            Ok(members) => {
                self.fanout.to_members(&members, &envelope, None);
            }
            Err(e) => warn!(
                conversation = %conversation,
                error = %e,
                "Receipt broadcast failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_shared::types::MessageKind;
    use parley_store::{ConversationKind, Message, MessageRepository, ReceiptRepository, SqliteStore};
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::delivery::SessionHandle;
    use crate::registry::ConnectionRegistry;

    struct Fixture {
        tracker: ReceiptTracker,
        store: SqliteStore,
        fanout: Fanout,
        conversation: ConversationId,
        a: UserId,
        b: UserId,
    }

    fn fixture() -> Fixture {
        let store = SqliteStore::in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let conversation = store
            .with_db(|db| {
                db.insert_user(a, None)?;
                db.insert_user(b, None)?;
                db.create_conversation(ConversationKind::Private, None, a, &[b])
            })
            .unwrap()
            .id;
        let fanout = Fanout::new(Arc::new(ConnectionRegistry::new()));
        let tracker = ReceiptTracker::new(Arc::new(store.clone()), fanout.clone());
        Fixture { tracker, store, fanout, conversation, a, b }
    }

    fn post(f: &Fixture, sender: UserId, content: &str) -> MessageId {
        let message = Message {
            id: MessageId::new(),
            conversation_id: f.conversation,
            sender_id: sender,
            content: content.into(),
            kind: MessageKind::Text,
            sent_at: Utc::now(),
            status: DeliveryStatus::Sent,
        };
        f.store.insert_message(&message).unwrap();
        message.id
    }

    fn connect(f: &Fixture, user: UserId) -> Receiver<Envelope> {
        let (handle, rx) = SessionHandle::channel(16);
        f.fanout.registry().register(user, handle);
        rx
    }

    #[test]
    fn mark_read_is_idempotent() {
        let f = fixture();
        let m1 = post(&f, f.a, "one");
        let m2 = post(&f, f.a, "two");
        let own = post(&f, f.b, "mine");
        let mut a_rx = connect(&f, f.a);

        assert_eq!(f.tracker.mark_read(f.conversation, f.b).unwrap(), vec![m1, m2]);
        assert!(f.tracker.mark_read(f.conversation, f.b).unwrap().is_empty());

        let event = a_rx.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::ConversationRead);
        assert!(a_rx.try_recv().is_err());

        assert!(!f.store.has_receipt(own, f.b).unwrap());
        assert_eq!(f.store.get_message(m1).unwrap().status, DeliveryStatus::Seen);
        assert_eq!(f.store.get_message(own).unwrap().status, DeliveryStatus::Sent);
    }

    #[test]
    fn mark_single_read_is_idempotent() {
        let f = fixture();
        let m = post(&f, f.a, "ping");
        let mut a_rx = connect(&f, f.a);

        assert!(f.tracker.mark_single_read(m, f.b).unwrap());
        assert!(!f.tracker.mark_single_read(m, f.b).unwrap());
        assert_eq!(a_rx.try_recv().unwrap().event_type, EventType::MessageRead);
        assert!(a_rx.try_recv().is_err());

        // Nothing left for a full mark either.
        assert!(f.tracker.mark_read(f.conversation, f.b).unwrap().is_empty());
    }

    #[test]
    fn sender_never_gets_a_receipt() {
        let f = fixture();
        let m = post(&f, f.a, "mine");
        assert!(!f.tracker.mark_single_read(m, f.a).unwrap());
        assert!(!f.store.has_receipt(m, f.a).unwrap());
    }

    #[test]
    fn errors() {
        let f = fixture();
        let outsider = UserId::new();
        let m = post(&f, f.a, "x");
        assert!(matches!(
            f.tracker.mark_single_read(MessageId::new(), f.b),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            f.tracker.mark_single_read(m, outsider),
            Err(CoreError::NotParticipant { .. })
        ));
        assert!(matches!(
            f.tracker.mark_read(f.conversation, outsider),
            Err(CoreError::NotParticipant { .. })
        ));
        assert!(matches!(
            f.tracker.mark_read(ConversationId::new(), f.b),
            Err(CoreError::NotFound(_))
        ));
    }
}
