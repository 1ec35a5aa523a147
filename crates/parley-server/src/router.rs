//! Conversation message routing.
//!
//! `send` persists, broadcasts to every live session of every participant,
//! and leaves a notification for each participant with no open session.
//! Broadcast and notification are independent: neither can undo the write.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use parley_shared::constants::{MAX_MESSAGE_SIZE, MAX_REACTION_SIZE};
use parley_shared::protocol::{Destination, Envelope, EventType};
use parley_shared::types::{
    ConversationId, DeliveryStatus, MessageId, MessageKind, NotificationType, UserId,
};
use parley_store::{Message, NewNotification, Reaction, Store};

use crate::delivery::Fanout;
use crate::error::{CoreError, StoreResultExt};
use crate::locks::KeyedLocks;
use crate::notifications::NotificationDispatcher;

const PREVIEW_CHARS: usize = 100;

pub struct MessageRouter {
    store: Arc<dyn Store>,
    fanout: Fanout,
    dispatcher: NotificationDispatcher,
    conversation_locks: KeyedLocks<ConversationId>,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout, dispatcher: NotificationDispatcher) -> Self {
        Self {
            store,
            fanout,
            dispatcher,
            conversation_locks: KeyedLocks::new(),
        }
    }

    fn require_participant(&self, conversation: ConversationId, user: UserId) -> Result<(), CoreError> {
        if !self.store.conversation_exists(conversation)? {
            return Err(CoreError::NotFound(format!("conversation {conversation}")));
        }
        if !self.store.is_participant(conversation, user)? {
            return Err(CoreError::not_participant(user, format!("conversation {conversation}")));
        }
        Ok(())
    }

    pub async fn send(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, CoreError> {
        if content.trim().is_empty() {
            return Err(CoreError::InvalidRequest("message content is empty".into()));
        }
        if content.len() > MAX_MESSAGE_SIZE {
            return Err(CoreError::InvalidRequest(format!(
                "message exceeds {MAX_MESSAGE_SIZE} bytes"
            )));
        }
        self.require_participant(conversation, sender)?;

        let (message, offline) = {
            // Persist and broadcast under one lock so every subscriber sees
            // this conversation's messages in persist order.
            let _guard = self.conversation_locks.lock(conversation).await;
            let participants = self.store.participant_ids(conversation)?;

            let mut message = Message {
                id: MessageId::new(),
                conversation_id: conversation,
                sender_id: sender,
                content: content.to_string(),
                kind,
                sent_at: Utc::now(),
                status: DeliveryStatus::Sent,
            };
            self.store.insert_message(&message)?;

            let envelope = Envelope::new(
                Destination::ConversationMessages(conversation),
                EventType::NewMessage,
                &message,
            );

            let mut offline = Vec::new();
            let mut reached_recipient = false;
            for participant in &participants {
                let outcome = self.fanout.deliver(*participant, &envelope);
                if *participant == sender {
                    continue;
                }
                if outcome.unreachable() {
                    offline.push(*participant);
                } else {
                    reached_recipient |= outcome.accepted > 0;
                }
            }

            if reached_recipient {
                match self.store.update_message_status(message.id, DeliveryStatus::Delivered) {
                    Ok(_) => message.status = DeliveryStatus::Delivered,
                    Err(e) => warn!(message = %message.id, error = %e, "Failed to mark delivered"),
                }
            }
            (message, offline)
        };

        info!(
            conversation = %conversation,
            message = %message.id,
            sender = %sender,
            offline = offline.len(),
            "Message routed"
        );

        for recipient in offline {
            self.dispatcher
                .enqueue(NewNotification {
                    recipient_id: recipient,
                    sender_id: Some(sender),
                    title: "New message".to_string(),
                    body: preview(&message.content),
                    kind: NotificationType::NewMessage,
                    data: json!({
                        "messageId": message.id,
                        "conversationId": conversation,
                        "senderId": sender,
                    }),
                })
                .await;
        }

        Ok(message)
    }

    /// Add an emoji reaction. Repeating an identical reaction is a no-op.
    pub async fn react(
        &self,
        message_id: MessageId,
        user: UserId,
        emoji: &str,
    ) -> Result<Reaction, CoreError> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.len() > MAX_REACTION_SIZE {
            return Err(CoreError::InvalidRequest("invalid reaction".into()));
        }
        let message = self
            .store
            .get_message(message_id)
            .or_not_found(|| format!("message {message_id}"))?;
        let conversation = message.conversation_id;
        self.require_participant(conversation, user)?;

        let reaction = Reaction {
            message_id,
            conversation_id: conversation,
            user_id: user,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };

        {
            let _guard = self.conversation_locks.lock(conversation).await;
            if !self.store.add_reaction(&reaction)? {
                debug!(message = %message_id, user = %user, "Duplicate reaction ignored");
                return Ok(reaction);
            }
            let members = self.store.participant_ids(conversation)?;
            let envelope = Envelope::new(
                Destination::ConversationReactions(conversation),
                EventType::MessageReaction,
                &reaction,
            );
            self.fanout.to_members(&members, &envelope, None);
        }

        if message.sender_id != user {
            self.dispatcher
                .enqueue(NewNotification {
                    recipient_id: message.sender_id,
                    sender_id: Some(user),
                    title: "New reaction".to_string(),
                    body: format!("{emoji} on \"{}\"", preview(&message.content)),
                    kind: NotificationType::MessageReaction,
                    data: json!({
                        "messageId": message_id,
                        "conversationId": conversation,
                        "emoji": emoji,
                    }),
                })
                .await;
        }

        Ok(reaction)
    }

    /// Tell a freshly created conversation's members about it.
    pub async fn announce_conversation(
        &self,
        conversation: ConversationId,
        creator: UserId,
    ) -> Result<(), CoreError> {
        self.require_participant(conversation, creator)?;
        let members = self.store.participant_ids(conversation)?;

        let envelope = Envelope::new(
            Destination::ConversationMessages(conversation),
            EventType::ConversationUpdated,
            &json!({
                "conversationId": conversation,
                "creatorId": creator,
                "participantIds": members,
            }),
        );
        self.fanout.to_members(&members, &envelope, None);

        for member in members.iter().filter(|m| **m != creator) {
            self.dispatcher
                .enqueue(NewNotification {
                    recipient_id: *member,
                    sender_id: Some(creator),
                    title: "New conversation".to_string(),
                    body: "You were added to a conversation".to_string(),
                    kind: NotificationType::NewConversation,
                    data: json!({ "conversationId": conversation }),
                })
                .await;
        }
        Ok(())
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
