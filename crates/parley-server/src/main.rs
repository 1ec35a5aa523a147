use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_server::api::{self, AppState};
use parley_server::config::ServerConfig;
use parley_server::hub::Hub;
use parley_server::identity::TokenResolver;
use parley_server::notifications::DispatcherSettings;
use parley_server::rate_limit::RateLimiter;
use parley_store::{SqliteStore, Store, UserRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.token_pubkey == [0u8; 32] {
        tracing::warn!("TOKEN_PUBKEY not set; every credential will be rejected");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = SqliteStore::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database opened");

    let users: Arc<dyn UserRepository> = Arc::new(store.clone());
    let identity = Arc::new(TokenResolver::new(config.token_pubkey, users));
    let shared: Arc<dyn Store> = Arc::new(store);

    let hub = Arc::new(Hub::new(
        shared,
        identity.clone(),
        DispatcherSettings {
            workers: config.notify_workers,
            queue: config.notify_queue,
            enqueue_timeout: config.notify_enqueue_timeout,
        },
        config.session_buffer,
    ));

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        hub,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict rate-limit buckets idle for more than 10 minutes, every 5 minutes
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(Duration::from_secs(600));
        }
    });

    // Drop expired identity cache entries every 10 minutes
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            identity.purge_expired();
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
