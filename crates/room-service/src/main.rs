//! Room Session Service
//!
//! Entry point. Loads configuration, connects the session store and the
//! media server client, and serves the HTTP API.

use common::secret::ExposeSecret;
use room_service::config::{Config, StoreBackend};
use room_service::observability::metrics::init_metrics_recorder;
use room_service::repositories::{MemorySessionStore, PgSessionStore, SessionStore};
use room_service::routes::{self, AppState};
use room_service::services::{CoordinatorSettings, LiveKitClient, SessionCoordinator, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Room Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        store_backend = config.store_backend.as_str(),
        bind_address = %config.bind_address,
        livekit_url = %config.livekit_url,
        auto_recording_enabled = config.auto_recording_enabled,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let store = connect_store(&config).await?;

    let media = Arc::new(
        LiveKitClient::new(
            &config.livekit_url,
            config.livekit_api_key.clone(),
            config.livekit_api_secret.clone(),
            Duration::from_secs(config.media_request_timeout_seconds),
        )
        .map_err(|e| {
            error!("Failed to build media server client: {}", e);
            e
        })?,
    );

    let coordinator = SessionCoordinator::new(
        store,
        media,
        Arc::new(SystemClock),
        CoordinatorSettings::from_config(&config),
    );

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let state = Arc::new(AppState::new(config, coordinator));
    let app = routes::build_routes(state, metrics_handle);

    info!("Room Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Room Service shutdown complete");

    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines; anything else is human-readable.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_service=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect_store(
    config: &Config,
) -> Result<Arc<dyn SessionStore>, Box<dyn std::error::Error>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory session store; state is lost on restart");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_ref()
                .ok_or("DATABASE_URL is required for the postgres store")?;

            info!("Connecting to database...");
            let db_url_with_timeout = add_query_timeout(database_url.expose_secret(), 5);
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&db_url_with_timeout)
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    error!("Failed to run migrations: {}", e);
                    e
                })?;

            info!("Database connection established");
            Ok(Arc::new(PgSessionStore::new(pool)))
        }
    }
}

/// Listens for SIGTERM/SIGINT, then waits out the drain period.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
