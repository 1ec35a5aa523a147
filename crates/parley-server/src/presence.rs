//! Presence: turns registry edges into `USER_ONLINE` / `USER_OFFLINE`
//! broadcasts.
//!
//! Register/unregister and the resulting broadcast run under a per-user lock
//! so a fast reconnect can never publish OFFLINE after the ONLINE it raced.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use parley_shared::protocol::{Destination, Envelope, EventType, PresenceEvent};
use parley_shared::types::{SessionId, UserId, UserStatus};
use parley_store::Store;

use crate::delivery::{Fanout, SessionHandle};
use crate::locks::KeyedLocks;

pub struct PresenceManager {
    store: Arc<dyn Store>,
    fanout: Fanout,
    user_locks: KeyedLocks<UserId>,
}

impl PresenceManager {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout) -> Self {
        Self {
            store,
            fanout,
            user_locks: KeyedLocks::new(),
        }
    }

    /// Register a session for an authenticated user, announcing them if this
    /// is their first live session.
    pub async fn connect(&self, user: UserId, handle: SessionHandle) -> SessionId {
        let _guard = self.user_locks.lock(user).await;
        let registered = self.fanout.registry().register(user, handle);
        if registered.came_online {
            self.publish_edge(user, true);
        }
        registered.session_id
    }

    /// Remove a session. Safe to call more than once.
    pub async fn disconnect(&self, session: SessionId) {
        let Some(user) = self.fanout.registry().user_of(session) else {
            return;
        };
        let _guard = self.user_locks.lock(user).await;
        let Some(gone) = self.fanout.registry().unregister(session) else {
            return;
        };
        if gone.went_offline {
            self.publish_edge(gone.user_id, false);
        }
    }

    fn publish_edge(&self, user: UserId, online: bool) {
        let status = if online {
            UserStatus::Online
        } else {
            UserStatus::Offline
        };
        info!(user = %user, status = %status, "Presence changed");

        if let Err(e) = self.store.set_user_status(user, status) {
            warn!(user = %user, error = %e, "Failed to persist user status");
        }

        let conversations = match self.store.conversation_ids_for_user(user) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user = %user, error = %e, "Presence broadcast skipped: membership lookup failed");
                return;
            }
        };

        let event = PresenceEvent {
            user_id: user,
            online,
            at: Utc::now(),
        };
        let event_type = if online {
            EventType::UserOnline
        } else {
            EventType::UserOffline
        };

        for conversation in conversations {
            // Each conversation is isolated: a failed lookup skips only it.
            let members = match self.store.participant_ids(conversation) {
                Ok(members) => members,
                Err(e) => {
                    warn!(
                        user = %user,
                        conversation = %conversation,
                        error = %e,
                        "Presence broadcast to conversation failed"
                    );
                    continue;
                }
            };
            let destination = if online {
                Destination::ConversationUserOnline(conversation)
            } else {
                Destination::ConversationUserOffline(conversation)
            };
            let envelope = Envelope::new(destination, event_type, &event);
            self.fanout.to_members(&members, &envelope, Some(user));
        }
    }
}
