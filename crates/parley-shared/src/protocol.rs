use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::call::CallType;
use crate::types::{CallId, ConversationId, MessageId, MessageKind, UserId};

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// Per-user call channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallChannel {
    Incoming,
    Initiated,
    Answered,
    Rejected,
    Ended,
    Signals,
}

/// Logical destination of an outbound event. Transport agnostic: the gateway
/// writes the rendered path into every frame so clients can demultiplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    ConversationMessages(ConversationId),
    ConversationRead(ConversationId),
    ConversationReactions(ConversationId),
    ConversationUserOnline(ConversationId),
    ConversationUserOffline(ConversationId),
    UserNotifications(UserId),
    UserUnreadCount(UserId),
    UserErrors(UserId),
    UserCall(UserId, CallChannel),
    GroupCallSignals(ConversationId),
}

impl Destination {
    pub fn path(&self) -> String {
        match self {
            Destination::ConversationMessages(c) => format!("conversation/{c}/messages"),
            Destination::ConversationRead(c) => format!("conversation/{c}/read"),
            Destination::ConversationReactions(c) => format!("conversation/{c}/reactions"),
            Destination::ConversationUserOnline(c) => format!("conversation/{c}/user-online"),
            Destination::ConversationUserOffline(c) => format!("conversation/{c}/user-offline"),
            Destination::UserNotifications(u) => format!("user/{u}/notifications"),
            Destination::UserUnreadCount(u) => format!("user/{u}/unread-count"),
            Destination::UserErrors(u) => format!("user/{u}/errors"),
            Destination::UserCall(u, channel) => {
                let leaf = match channel {
                    CallChannel::Incoming => "incoming",
                    CallChannel::Initiated => "initiated",
                    CallChannel::Answered => "answered",
                    CallChannel::Rejected => "rejected",
                    CallChannel::Ended => "ended",
                    CallChannel::Signals => "signals",
                };
                format!("user/{u}/call/{leaf}")
            }
            Destination::GroupCallSignals(c) => format!("call/{c}/signals"),
        }
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.path())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    NewMessage,
    MessageRead,
    ConversationRead,
    MessageReaction,
    ConversationUpdated,
    UserOnline,
    UserOffline,
    Notification,
    UnreadCount,
    CallIncoming,
    CallInitiated,
    CallAnswered,
    CallRejected,
    CallEnded,
    CallSignal,
    Error,
}

/// Server -> client frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub destination: Destination,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new<T: Serialize>(destination: Destination, event_type: EventType, payload: &T) -> Self {
        Self {
            destination,
            event_type,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// The same event re-addressed, used when one payload fans out to many
    /// per-user destinations.
    pub fn readdressed(&self, destination: Destination) -> Self {
        Self {
            destination,
            event_type: self.event_type,
            payload: self.payload.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub user_id: UserId,
    pub online: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReadEvent {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadEvent {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Ringing,
    Hangup,
}

/// A signal as received from a client. Every field the relay needs is
/// optional here; the relay decides whether the frame is usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalFrame {
    pub call_id: CallId,
    #[serde(rename = "type", default)]
    pub signal_type: Option<SignalKind>,
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A signal as forwarded to peers, stamped with the authenticated sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub call_id: CallId,
    #[serde(rename = "type")]
    pub signal_type: SignalKind,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conversation_id: Option<ConversationId>,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Client frames
// ---------------------------------------------------------------------------

fn default_message_kind() -> MessageKind {
    MessageKind::Text
}

/// Client -> server frame. The acting user is always the authenticated
/// session principal, so no frame carries a sender id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    SendMessage {
        conversation_id: ConversationId,
        content: String,
        #[serde(default = "default_message_kind")]
        message_type: MessageKind,
    },
    MarkRead {
        conversation_id: ConversationId,
    },
    MarkMessageRead {
        message_id: MessageId,
    },
    React {
        message_id: MessageId,
        emoji: String,
    },
    StartCall {
        call_id: CallId,
        #[serde(default)]
        recipient_id: Option<UserId>,
        #[serde(default)]
        conversation_id: Option<ConversationId>,
        call_type: CallType,
    },
    AnswerCall {
        call_id: CallId,
    },
    RejectCall {
        call_id: CallId,
    },
    EndCall {
        call_id: CallId,
    },
    PrivateSignal(SignalFrame),
    GroupSignal(SignalFrame),
}

impl ClientFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_paths() {
        let c = ConversationId::new();
        let u = UserId::new();
        assert_eq!(Destination::ConversationMessages(c).path(), format!("conversation/{c}/messages"));
        assert_eq!(Destination::ConversationUserOffline(c).path(), format!("conversation/{c}/user-offline"));
        assert_eq!(Destination::UserUnreadCount(u).path(), format!("user/{u}/unread-count"));
        assert_eq!(
            Destination::UserCall(u, CallChannel::Incoming).path(),
            format!("user/{u}/call/incoming")
        );
        assert_eq!(Destination::GroupCallSignals(c).path(), format!("call/{c}/signals"));
    }

    #[test]
    fn test_envelope_json_shape() {
        let u = UserId::new();
        let env = Envelope::new(
            Destination::UserUnreadCount(u),
            EventType::UnreadCount,
            &UnreadCount { count: 3 },
        );
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["destination"], format!("user/{u}/unread-count"));
        assert_eq!(value["eventType"], "UNREAD_COUNT");
        assert_eq!(value["payload"]["count"], 3);
    }

    #[test]
    fn test_client_frame_send_message_defaults_to_text() {
        let c = ConversationId::new();
        let json = format!(r#"{{"action":"sendMessage","conversationId":"{c}","content":"hi"}}"#);
        let frame = ClientFrame::from_json(&json).unwrap();
        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                conversation_id: c,
                content: "hi".into(),
                message_type: MessageKind::Text,
            }
        );
    }

    #[test]
    fn test_signal_frame_without_type_still_parses() {
        let c = ConversationId::new();
        let json = format!(r#"{{"action":"groupSignal","callId":"c1","conversationId":"{c}"}}"#);
        match ClientFrame::from_json(&json).unwrap() {
            ClientFrame::GroupSignal(frame) => {
                assert_eq!(frame.call_id, CallId::from("c1"));
                assert_eq!(frame.signal_type, None);
                assert_eq!(frame.conversation_id, Some(c));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(ClientFrame::from_json(r#"{"action":"teleport"}"#).is_err());
    }
}
