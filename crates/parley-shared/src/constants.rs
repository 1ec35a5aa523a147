/// Protocol version advertised by `/info`
pub const PROTOCOL_VERSION: &str = "parley/1";

/// Application name
pub const APP_NAME: &str = "Parley";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Maximum chat message content size in bytes (64 KiB)
pub const MAX_MESSAGE_SIZE: usize = 65_536;

/// Maximum reaction length in bytes (one emoji sequence, generously)
pub const MAX_REACTION_SIZE: usize = 32;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Outbound events buffered per session before deliveries are dropped
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// Notification dispatcher defaults
pub const DEFAULT_NOTIFY_WORKERS: usize = 4;
pub const DEFAULT_NOTIFY_QUEUE: usize = 1024;
pub const DEFAULT_NOTIFY_ENQUEUE_TIMEOUT_MS: u64 = 50;

/// Seconds between server pings on an idle WebSocket
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// REST rate limit defaults (per client IP)
pub const DEFAULT_RATE_LIMIT_PER_SEC: f64 = 10.0;
pub const DEFAULT_RATE_LIMIT_BURST: f64 = 30.0;
