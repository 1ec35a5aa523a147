//! Bearer credential resolution and caching.
//!
//! Verifies [`AccessToken`]s issued by the auth service using ed25519-dalek,
//! and caches successful resolutions until the token expires so reconnect
//! storms do not re-check signatures every time. The subject's user record
//! is still looked up on every resolve, so a removed user stops
//! authenticating immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use parley_shared::token::AccessToken;
use parley_shared::types::UserId;
use parley_shared::AuthError;
use parley_store::UserRepository;

/// Turns a bearer credential into the user it authenticates. Must never
/// panic on malformed input; every failure is a typed [`AuthError`].
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Extract the credential from an `Authorization: Bearer <token>` value.
pub fn bearer_credential(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CachedIdentity {
    user: UserId,
    expires_at: DateTime<Utc>,
}

impl CachedIdentity {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Token resolver
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TokenResolver {
    /// The token issuer's Ed25519 public key.
    issuer_pubkey: [u8; 32],
    users: Arc<dyn UserRepository>,
    /// Cache: credential -> resolved identity.
    cache: Arc<DashMap<String, CachedIdentity>>,
}

impl TokenResolver {
    pub fn new(issuer_pubkey: [u8; 32], users: Arc<dyn UserRepository>) -> Self {
        Self {
            issuer_pubkey,
            users,
            cache: Arc::new(DashMap::new()),
        }
    }

    fn resolve_at(&self, credential: &str, now: DateTime<Utc>) -> Result<UserId, AuthError> {
        let cached = self
            .cache
            .get(credential)
            .map(|entry| *entry)
            .filter(|entry| entry.is_fresh(now));
        if let Some(entry) = cached {
            if let Err(e) = self.check_subject(entry.user) {
                self.cache.remove(credential);
                return Err(e);
            }
            debug!(user = %entry.user, "Identity served from cache");
            return Ok(entry.user);
        }

        let token = AccessToken::decode(credential)?;
        let user = token.verify(&self.issuer_pubkey, now)?;
        self.check_subject(user)?;

        self.cache.insert(
            credential.to_string(),
            CachedIdentity {
                user,
                expires_at: token.exp,
            },
        );
        info!(user = %user, until = %token.exp, "Credential verified");
        Ok(user)
    }

    /// The subject must still have a user record, cached or not.
    fn check_subject(&self, user: UserId) -> Result<(), AuthError> {
        match self.users.user_exists(user) {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(user = %user, "Token subject has no user record");
                Err(AuthError::UnknownSubject)
            }
            Err(e) => {
                warn!(user = %user, error = %e, "User lookup failed during resolve");
                Err(AuthError::InvalidCredential("user lookup failed".into()))
            }
        }
    }

    /// Evict expired entries from the cache.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.is_fresh(now));
        let removed = before.saturating_sub(self.cache.len());
        if removed > 0 {
            debug!(removed, "Purged expired identity cache entries");
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl IdentityResolver for TokenResolver {
    fn resolve(&self, credential: &str) -> Result<UserId, AuthError> {
        self.resolve_at(credential, Utc::now())
    }
}
