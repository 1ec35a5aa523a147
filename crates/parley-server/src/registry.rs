//! Connection registry: which users are connected, and through which
//! sessions.
//!
//! A user may hold any number of concurrent sessions (one per device). The
//! registry reports the online/offline *edges* so the presence manager can
//! fire exactly once per transition and never on intermediate churn.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use parley_shared::types::{SessionId, UserId};

use crate::delivery::SessionHandle;

/// One registered session as seen by routers.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub id: SessionId,
    pub user: UserId,
    pub handle: SessionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    pub session_id: SessionId,
    /// This was the user's first live session.
    pub came_online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregistered {
    pub user_id: UserId,
    /// This was the user's last live session.
    pub went_offline: bool,
}

/// Sharded concurrent map of user -> sessions. Mutation of one user's bucket
/// is exclusive; lookups for different users never contend.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, HashMap<SessionId, SessionHandle>>,
    sessions: DashMap<SessionId, UserId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user: UserId, handle: SessionHandle) -> Registered {
        let session_id = SessionId::new();
        let came_online = {
            let mut bucket = self.users.entry(user).or_default();
            let first = bucket.is_empty();
            bucket.insert(session_id, handle);
            first
        };
        self.sessions.insert(session_id, user);

        info!(
            user = %user,
            session = %session_id,
            sessions = self.session_count_for(user),
            "Session registered"
        );

        Registered {
            session_id,
            came_online,
        }
    }

    /// Remove a session. Unknown or already-removed ids return `None`, so
    /// disconnect is idempotent.
    pub fn unregister(&self, session_id: SessionId) -> Option<Unregistered> {
        let (_, user_id) = self.sessions.remove(&session_id)?;

        let went_offline = match self.users.entry(user_id) {
            Entry::Occupied(mut bucket) => {
                bucket.get_mut().remove(&session_id);
                if bucket.get().is_empty() {
                    bucket.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        info!(
            user = %user_id,
            session = %session_id,
            went_offline,
            "Session unregistered"
        );

        Some(Unregistered {
            user_id,
            went_offline,
        })
    }

    /// Live sessions of `user`; empty when the user is offline.
    pub fn sessions_for(&self, user: UserId) -> Vec<LiveSession> {
        self.users
            .get(&user)
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|(id, handle)| LiveSession {
                        id: *id,
                        user,
                        handle: handle.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: SessionId) -> Option<LiveSession> {
        let user = *self.sessions.get(&session_id)?;
        let handle = self.users.get(&user)?.get(&session_id)?.clone();
        Some(LiveSession {
            id: session_id,
            user,
            handle,
        })
    }

    pub fn user_of(&self, session_id: SessionId) -> Option<UserId> {
        self.sessions.get(&session_id).map(|user| *user)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    pub fn session_count_for(&self, user: UserId) -> usize {
        self.users.get(&user).map(|bucket| bucket.len()).unwrap_or(0)
    }

    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
