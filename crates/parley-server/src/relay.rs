//! Stateless WebRTC signal relay.
//!
//! Offers, answers and ICE candidates are forwarded as-is, keyed only by the
//! recipient (private) or the conversation (group). Signaling is
//! fire-and-forget: an unusable frame is logged and dropped, never reported
//! back to the sender.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_shared::protocol::{
    CallChannel, Destination, Envelope, EventType, RelayedSignal, SignalFrame,
};
use parley_shared::types::UserId;
use parley_store::Store;

use crate::delivery::Fanout;

/// What happened to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Number of sessions that accepted the signal.
    Forwarded(usize),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingType,
    MissingTarget,
    NotParticipant,
    LookupFailed,
}

pub struct SignalRelay {
    store: Arc<dyn Store>,
    fanout: Fanout,
}

impl SignalRelay {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout) -> Self {
        Self { store, fanout }
    }

    pub fn relay_private(&self, sender: UserId, frame: SignalFrame) -> RelayOutcome {
        let Some(signal_type) = frame.signal_type else {
            return dropped(sender, &frame, DropReason::MissingType);
        };
        let Some(recipient) = frame.recipient_id else {
            return dropped(sender, &frame, DropReason::MissingTarget);
        };

        let signal = RelayedSignal {
            call_id: frame.call_id,
            signal_type,
            sender_id: sender,
            recipient_id: Some(recipient),
            conversation_id: None,
            payload: frame.payload,
        };
        let envelope = Envelope::new(
            Destination::UserCall(recipient, CallChannel::Signals),
            EventType::CallSignal,
            &signal,
        );
        let reached = self.fanout.to_user(recipient, &envelope);
        debug!(
            call = %signal.call_id,
            from = %sender,
            to = %recipient,
            kind = ?signal_type,
            sessions = reached,
            "Signal relayed"
        );
        RelayOutcome::Forwarded(reached)
    }

    pub fn relay_group(&self, sender: UserId, frame: SignalFrame) -> RelayOutcome {
        let Some(signal_type) = frame.signal_type else {
            return dropped(sender, &frame, DropReason::MissingType);
        };
        let Some(conversation) = frame.conversation_id else {
            return dropped(sender, &frame, DropReason::MissingTarget);
        };

        let members = match self.store.participant_ids(conversation) {
            Ok(members) => members,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Group signal lookup failed");
                return dropped(sender, &frame, DropReason::LookupFailed);
            }
        };
        if !members.contains(&sender) {
            return dropped(sender, &frame, DropReason::NotParticipant);
        }

        let signal = RelayedSignal {
            call_id: frame.call_id,
            signal_type,
            sender_id: sender,
            recipient_id: None,
            conversation_id: Some(conversation),
            payload: frame.payload,
        };
        let envelope = Envelope::new(
            Destination::GroupCallSignals(conversation),
            EventType::CallSignal,
            &signal,
        );
        let reached = self.fanout.to_members(&members, &envelope, Some(sender));
        debug!(
            call = %signal.call_id,
            from = %sender,
            conversation = %conversation,
            kind = ?signal_type,
            sessions = reached,
            "Group signal relayed"
        );
        RelayOutcome::Forwarded(reached)
    }
}

fn dropped(sender: UserId, frame: &SignalFrame, reason: DropReason) -> RelayOutcome {
    debug!(call = %frame.call_id, from = %sender, ?reason, "Dropping signal");
    RelayOutcome::Dropped(reason)
}
