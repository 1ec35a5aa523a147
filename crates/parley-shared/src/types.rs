use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Stable user identifier, owned by the account service.
    UserId
);
uuid_id!(ConversationId);
uuid_id!(MessageId);
uuid_id!(NotificationId);
uuid_id!(
    /// One live connection. Minted by the connection registry.
    SessionId
);

/// Call ids are chosen by the calling client so both peers can correlate
/// signals before the server has answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Audio,
    Video,
    Call,
}

/// Delivery status of a message. Ordered: a message never moves backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NewMessage,
    NewConversation,
    MessageReaction,
    UserOnline,
    UserOffline,
    CallIncoming,
    CallMissed,
    CallEnded,
    FileShared,
    Mention,
    SystemAnnouncement,
}

macro_rules! text_codec {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// Column encodings used by the store.
text_codec!(MessageKind {
    Text => "TEXT",
    Image => "IMAGE",
    File => "FILE",
    Audio => "AUDIO",
    Video => "VIDEO",
    Call => "CALL",
});
text_codec!(DeliveryStatus {
    Sent => "SENT",
    Delivered => "DELIVERED",
    Seen => "SEEN",
});
text_codec!(UserStatus {
    Online => "ONLINE",
    Offline => "OFFLINE",
});
text_codec!(NotificationType {
    NewMessage => "NEW_MESSAGE",
    NewConversation => "NEW_CONVERSATION",
    MessageReaction => "MESSAGE_REACTION",
    UserOnline => "USER_ONLINE",
    UserOffline => "USER_OFFLINE",
    CallIncoming => "CALL_INCOMING",
    CallMissed => "CALL_MISSED",
    CallEnded => "CALL_ENDED",
    FileShared => "FILE_SHARED",
    Mention => "MENTION",
    SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
});
