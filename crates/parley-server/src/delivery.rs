//! Best-effort delivery of envelopes to live sessions.
//!
//! Every session owns a bounded outbound queue drained by its gateway writer
//! task. Delivery is `try_send`: a full or closed queue drops the event and
//! logs it, so one stuck session never stalls fan-out to the others.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::protocol::Envelope;
use parley_shared::types::{SessionId, UserId};

use crate::registry::ConnectionRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("session {0} outbound queue is full")]
    QueueFull(SessionId),
    #[error("session {0} is closed")]
    Closed(SessionId),
}

/// Opaque sink for one session's outbound events.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Envelope>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// A handle plus the receiving end the session's writer drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn try_deliver(&self, session: SessionId, envelope: Envelope) -> Result<(), DeliveryFailure> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull(session),
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed(session),
        })
    }
}

/// Per-user result of one delivery attempt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UserDelivery {
    pub accepted: usize,
    pub full: usize,
    pub closed: usize,
}

impl UserDelivery {
    /// No open session took or could later take the event: the user had no
    /// sessions, or every one of them was already closed. Such a user is
    /// offline for fallback purposes even if unregistration is still pending.
    pub fn unreachable(&self) -> bool {
        self.accepted == 0 && self.full == 0
    }
}

/// Resolves users to live sessions and delivers to them.
#[derive(Clone)]
pub struct Fanout {
    registry: Arc<ConnectionRegistry>,
}

impl Fanout {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.registry.is_online(user)
    }

    /// Deliver to every live session of `user`. Returns how many sessions
    /// accepted the event.
    pub fn to_user(&self, user: UserId, envelope: &Envelope) -> usize {
        self.deliver(user, envelope).accepted
    }

    /// Deliver to every live session of `user` from one registry snapshot,
    /// reporting what each session did with the event.
    pub fn deliver(&self, user: UserId, envelope: &Envelope) -> UserDelivery {
        let mut outcome = UserDelivery::default();
        for session in self.registry.sessions_for(user) {
            match session.handle.try_deliver(session.id, envelope.clone()) {
                Ok(()) => outcome.accepted += 1,
                Err(e) => {
                    match e {
                        DeliveryFailure::QueueFull(_) => outcome.full += 1,
                        DeliveryFailure::Closed(_) => outcome.closed += 1,
                    }
                    debug!(
                        user = %user,
                        destination = %envelope.destination.path(),
                        error = %e,
                        "Dropping event for session"
                    );
                }
            }
        }
        outcome
    }

    /// Deliver to one specific session, if it is still registered.
    pub fn to_session(&self, session: SessionId, envelope: Envelope) -> bool {
        let Some(live) = self.registry.session(session) else {
            debug!(session = %session, "Session gone, dropping event");
            return false;
        };
        match live.handle.try_deliver(session, envelope) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Dropping event for session");
                false
            }
        }
    }

    /// Conversation broadcast: deliver the same envelope to every live
    /// session of every member, optionally skipping one user.
    pub fn to_members(&self, members: &[UserId], envelope: &Envelope, except: Option<UserId>) -> usize {
        members
            .iter()
            .filter(|member| Some(**member) != except)
            .map(|member| self.to_user(*member, envelope))
            .sum()
    }
}
