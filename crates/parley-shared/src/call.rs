//! Call lifecycle.
//!
//! ```text
//! INITIATED -> RINGING -> ONGOING -> ENDED
//!                 |                    ^
//!                 +-> REJECTED         | (hangup from any live state)
//! ```
//!
//! REJECTED and ENDED are terminal. Retransmitted answers and hangups on a
//! call that already moved past them are reported as [`Transition::Unchanged`]
//! rather than errors, because clients resend them over unreliable links.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConversationId, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Ongoing,
    Rejected,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Ring,
    Answer,
    Reject,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved(CallStatus),
    Unchanged,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot apply {event:?} to a call in state {from}")]
pub struct InvalidTransition {
    pub from: CallStatus,
    pub event: CallEvent,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Rejected | CallStatus::Ended)
    }

    pub fn apply(self, event: CallEvent) -> Result<Transition, InvalidTransition> {
        use CallEvent::*;
        use CallStatus::*;

        let next = match (self, event) {
            (Initiated, Ring) => Transition::Moved(Ringing),
            (Ringing, Ring) => Transition::Unchanged,

            (Ringing, Answer) => Transition::Moved(Ongoing),
            (Ongoing | Rejected | Ended, Answer) => Transition::Unchanged,

            (Ringing, Reject) => Transition::Moved(Rejected),
            (Rejected, Reject) => Transition::Unchanged,

            (Initiated | Ringing | Ongoing, End) => Transition::Moved(Ended),
            (Rejected | Ended, End) => Transition::Unchanged,

            (Ongoing | Rejected | Ended, Ring)
            | (Initiated, Answer)
            | (Initiated | Ongoing | Ended, Reject) => {
                return Err(InvalidTransition { from: self, event })
            }
        };
        Ok(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "INITIATED",
            CallStatus::Ringing => "RINGING",
            CallStatus::Ongoing => "ONGOING",
            CallStatus::Rejected => "REJECTED",
            CallStatus::Ended => "ENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(CallStatus::Initiated),
            "RINGING" => Some(CallStatus::Ringing),
            "ONGOING" => Some(CallStatus::Ongoing),
            "REJECTED" => Some(CallStatus::Rejected),
            "ENDED" => Some(CallStatus::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Audio => "AUDIO",
            CallType::Video => "VIDEO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUDIO" => Some(CallType::Audio),
            "VIDEO" => Some(CallType::Video),
            _ => None,
        }
    }
}

/// Who a call is addressed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CallScope {
    Private { recipient: UserId },
    Group { conversation: ConversationId },
}

impl CallScope {
    /// Build a scope from the two optional ids a client may send. A recipient
    /// wins over a conversation, matching how private calls inside a DM
    /// conversation are addressed.
    pub fn from_parts(
        recipient: Option<UserId>,
        conversation: Option<ConversationId>,
    ) -> Option<Self> {
        match (recipient, conversation) {
            (Some(recipient), _) => Some(CallScope::Private { recipient }),
            (None, Some(conversation)) => Some(CallScope::Group { conversation }),
            (None, None) => None,
        }
    }

    pub fn recipient(&self) -> Option<UserId> {
        match self {
            CallScope::Private { recipient } => Some(*recipient),
            CallScope::Group { .. } => None,
        }
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        match self {
            CallScope::Private { .. } => None,
            CallScope::Group { conversation } => Some(*conversation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [CallStatus; 5] = [
        CallStatus::Initiated,
        CallStatus::Ringing,
        CallStatus::Ongoing,
        CallStatus::Rejected,
        CallStatus::Ended,
    ];
    const ALL_EVENTS: [CallEvent; 4] =
        [CallEvent::Ring, CallEvent::Answer, CallEvent::Reject, CallEvent::End];

    #[test]
    fn test_happy_path() {
        let s = CallStatus::Initiated;
        assert_eq!(s.apply(CallEvent::Ring), Ok(Transition::Moved(CallStatus::Ringing)));
        assert_eq!(
            CallStatus::Ringing.apply(CallEvent::Answer),
            Ok(Transition::Moved(CallStatus::Ongoing))
        );
        assert_eq!(
            CallStatus::Ongoing.apply(CallEvent::End),
            Ok(Transition::Moved(CallStatus::Ended))
        );
    }

    #[test]
    fn test_terminal_states_never_move() {
        for from in ALL_STATES.iter().filter(|s| s.is_terminal()) {
            for event in ALL_EVENTS {
                match from.apply(event) {
                    Ok(Transition::Moved(to)) => panic!("{from} moved to {to} on {event:?}"),
                    Ok(Transition::Unchanged) | Err(_) => {}
                }
            }
        }
    }

    #[test]
    fn test_no_transition_back_to_initiated_or_ringing_after_answer() {
        for from in [CallStatus::Ongoing, CallStatus::Rejected, CallStatus::Ended] {
            for event in ALL_EVENTS {
                if let Ok(Transition::Moved(to)) = from.apply(event) {
                    assert!(!matches!(to, CallStatus::Initiated | CallStatus::Ringing));
                }
            }
        }
    }

    #[test]
    fn test_retransmitted_answer_is_unchanged() {
        assert_eq!(CallStatus::Ongoing.apply(CallEvent::Answer), Ok(Transition::Unchanged));
        assert_eq!(CallStatus::Ended.apply(CallEvent::Answer), Ok(Transition::Unchanged));
    }

    #[test]
    fn test_reject_after_answer_is_invalid() {
        let err = CallStatus::Ongoing.apply(CallEvent::Reject).unwrap_err();
        assert_eq!(err.from, CallStatus::Ongoing);
        assert_eq!(err.event, CallEvent::Reject);
    }

    #[test]
    fn test_scope_from_parts() {
        let user = UserId::new();
        let conv = ConversationId::new();
        assert_eq!(
            CallScope::from_parts(Some(user), Some(conv)),
            Some(CallScope::Private { recipient: user })
        );
        assert_eq!(
            CallScope::from_parts(None, Some(conv)),
            Some(CallScope::Group { conversation: conv })
        );
        assert_eq!(CallScope::from_parts(None, None), None);
    }
}
