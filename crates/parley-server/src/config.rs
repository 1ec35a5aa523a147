//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_NOTIFY_ENQUEUE_TIMEOUT_MS, DEFAULT_NOTIFY_QUEUE,
    DEFAULT_NOTIFY_WORKERS, DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_PER_SEC,
    DEFAULT_SESSION_BUFFER,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Ed25519 public key of the token issuer (hex-encoded, 64 chars).
    /// Env: `TOKEN_PUBKEY`
    /// Default: all-zeros (development only; rejects every token).
    pub token_pubkey: [u8; 32],

    /// Outbound events buffered per session before deliveries are dropped.
    /// Env: `SESSION_BUFFER`
    pub session_buffer: usize,

    /// Notification worker pool size.
    /// Env: `NOTIFY_WORKERS`
    pub notify_workers: usize,

    /// Notification queue capacity.
    /// Env: `NOTIFY_QUEUE`
    pub notify_queue: usize,

    /// How long `enqueue` may wait on a full queue before persisting
    /// synchronously and deferring delivery.
    /// Env: `NOTIFY_ENQUEUE_TIMEOUT_MS`
    pub notify_enqueue_timeout: Duration,

    /// Sustained REST requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// REST burst allowance per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            token_pubkey: [0u8; 32],
            session_buffer: DEFAULT_SESSION_BUFFER,
            notify_workers: DEFAULT_NOTIFY_WORKERS,
            notify_queue: DEFAULT_NOTIFY_QUEUE,
            notify_enqueue_timeout: Duration::from_millis(DEFAULT_NOTIFY_ENQUEUE_TIMEOUT_MS),
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            instance_name: "Parley".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup. `from_env` is the
    /// production entry point; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = lookup("TOKEN_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.token_pubkey = key,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid TOKEN_PUBKEY, using default (dev-only)");
                }
            }
        }

        if let Some(n) = positive(&lookup, "SESSION_BUFFER") {
            config.session_buffer = n;
        }
        if let Some(n) = positive(&lookup, "NOTIFY_WORKERS") {
            config.notify_workers = n;
        }
        if let Some(n) = positive(&lookup, "NOTIFY_QUEUE") {
            config.notify_queue = n;
        }
        if let Some(ms) = positive(&lookup, "NOTIFY_ENQUEUE_TIMEOUT_MS") {
            config.notify_enqueue_timeout = Duration::from_millis(ms as u64);
        }

        if let Some(n) = positive(&lookup, "RATE_LIMIT_PER_SEC") {
            config.rate_limit_per_sec = n as f64;
        }
        if let Some(n) = positive(&lookup, "RATE_LIMIT_BURST") {
            config.rate_limit_burst = n as f64;
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(value: &str) -> Result<[u8; 32], String> {
    let value = value.trim();
    if value.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", value.len()));
    }
    let bytes = hex::decode(value).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.token_pubkey, [0u8; 32]);
        assert_eq!(config.notify_workers, DEFAULT_NOTIFY_WORKERS);
    }

    #[test]
    fn test_overrides() {
        let key = "ab".repeat(32);
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("TOKEN_PUBKEY", &key),
            ("NOTIFY_WORKERS", "2"),
            ("NOTIFY_ENQUEUE_TIMEOUT_MS", "10"),
            ("DATABASE_PATH", "/tmp/p.db"),
            ("RATE_LIMIT_BURST", "5"),
        ]));
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.token_pubkey, [0xab; 32]);
        assert_eq!(config.notify_workers, 2);
        assert_eq!(config.notify_enqueue_timeout, Duration::from_millis(10));
        assert_eq!(config.database_path, PathBuf::from("/tmp/p.db"));
        assert_eq!(config.rate_limit_burst, 5.0);
        assert_eq!(config.rate_limit_per_sec, DEFAULT_RATE_LIMIT_PER_SEC);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("TOKEN_PUBKEY", "abcd"),
            ("SESSION_BUFFER", "0"),
            ("NOTIFY_QUEUE", "lots"),
        ]));
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.token_pubkey, [0u8; 32]);
        assert_eq!(config.session_buffer, DEFAULT_SESSION_BUFFER);
        assert_eq!(config.notify_queue, DEFAULT_NOTIFY_QUEUE);
    }
}
