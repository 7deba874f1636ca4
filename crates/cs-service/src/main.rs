//! Call Signaling Service
//!
//! Entry point for the CallBridge signaling server. Terminates client
//! WebSockets, relays WebRTC signaling between peers, and keeps call
//! session state durable in Postgres.

use cs_service::auth::JwtValidator;
use cs_service::config::Config;
use cs_service::hub::e2ee::{E2eeAuditor, E2eeRateLimiter};
use cs_service::hub::relay::SignalingRelay;
use cs_service::liveness::HeartbeatTracker;
use cs_service::observability::init_metrics_recorder;
use cs_service::registry::{ConnectionRegistry, RoomMembership};
use cs_service::repositories::ParticipantsRepository;
use cs_service::routes::{self, AppState};
use cs_service::tasks::{run_liveness_sweeper, SweeperContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cs_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Call Signaling Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        cs_id = %config.cs_id,
        bind_address = %config.bind_address,
        heartbeat_timeout_seconds = config.heartbeat_timeout_seconds,
        sweep_interval_seconds = config.sweep_interval_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // Initialize database connection pool with query timeout
    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(&config.database_url, 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
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

    info!("Database connection established");

    // Shared in-memory signaling state
    let registry = ConnectionRegistry::new();
    let rooms = RoomMembership::new();
    let heartbeats = HeartbeatTracker::new();
    let relay = SignalingRelay::new(registry.clone(), rooms.clone());
    let rate_limiter = E2eeRateLimiter::new(config.e2ee_rate_limit_per_minute);
    let auditor = E2eeAuditor::new(
        registry.clone(),
        rooms.clone(),
        rate_limiter.clone(),
        config.e2ee_max_payload_bytes,
    );

    let jwt_validator = Arc::new(JwtValidator::new(
        &config.jwt_secret,
        config.jwt_clock_skew_seconds,
    ));

    let bind_address = config.bind_address.clone();
    let heartbeat_timeout = Duration::from_secs(config.heartbeat_timeout_seconds);
    let sweep_interval = Duration::from_secs(config.sweep_interval_seconds);

    let state = Arc::new(AppState {
        pool: db_pool.clone(),
        config,
        jwt_validator,
        registry: registry.clone(),
        rooms: rooms.clone(),
        heartbeats: heartbeats.clone(),
        relay: relay.clone(),
        auditor,
    });

    // Background liveness sweeper
    let shutdown_token = CancellationToken::new();
    let sweeper = tokio::spawn(run_liveness_sweeper(
        SweeperContext {
            registry,
            rooms,
            heartbeats,
            relay,
            rate_limiter,
        },
        heartbeat_timeout,
        sweep_interval,
        shutdown_token.clone(),
        move |session_id, user_id| {
            let pool = db_pool.clone();
            async move {
                ParticipantsRepository::close_participant(&pool, session_id, user_id).await
            }
        },
    ));

    // Build application routes
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Call Signaling Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_token.cancel();
    if let Err(e) = sweeper.await {
        warn!("Liveness sweeper exited abnormally: {}", e);
    }

    info!("Call Signaling Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
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

    // Graceful shutdown drain period, so in-flight calls can wrap up and
    // the load balancer stops routing here first
    let drain_secs: u64 = std::env::var("CS_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (CS_DRAIN_SECONDS=0)");
    }
}

/// Adds statement_timeout to the database URL.
/// This ensures queries don't hang indefinitely.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
