use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::config::{LoggingConfig, StoreBackend, WardenConfig};
use ratewarden::http::{router, HttpServer};
use ratewarden::ratelimit::{CooldownTracker, SlidingWindowLimiter};
use ratewarden::store::{start_sweep_task, EventStore, MemoryEventStore, RedisEventStore};

/// Sliding-window rate limiting in front of a protected HTTP handler.
#[derive(Parser, Debug)]
#[command(name = "ratewarden", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Use the Redis event store at this URL
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = WardenConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(url) = args.redis_url {
        config.store.backend = StoreBackend::Redis;
        config.store.redis.url = url;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        period_secs = config.rate_limiting.period_secs,
        max_rate = config.rate_limiting.max_rate,
        failure_policy = ?config.rate_limiting.failure_policy,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let window = config.rate_limiting.window()?;

    let store: Arc<dyn EventStore> = match config.store.backend {
        StoreBackend::Memory => {
            warn!(
                "Using the in-process memory store; counts are not shared, \
                 so each instance enforces its own limit"
            );
            let store = Arc::new(MemoryEventStore::new());
            start_sweep_task(store.clone(), window, window.period());
            store
        }
        StoreBackend::Redis => Arc::new(RedisEventStore::connect(&config.store.redis).await?),
    };

    let limiter = SlidingWindowLimiter::new(store, window)
        .with_store_timeout(config.rate_limiting.store_timeout())
        .with_failure_policy(config.rate_limiting.failure_policy);
    info!(limiter = ?limiter, "Rate limiter initialized");

    let cooldown = config
        .rate_limiting
        .cooldown
        .map(|cooldown| Arc::new(CooldownTracker::new(cooldown)));

    let server = HttpServer::new(
        config.server.http_addr,
        router(Arc::new(limiter), cooldown),
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Ratewarden stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
