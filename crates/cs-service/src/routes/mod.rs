//! HTTP and WebSocket routes for the Call Signaling Service.
//!
//! Defines the Axum router and application state.

use crate::auth::JwtValidator;
use crate::config::Config;
use crate::handlers;
use crate::hub;
use crate::hub::e2ee::E2eeAuditor;
use crate::hub::relay::SignalingRelay;
use crate::liveness::HeartbeatTracker;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::registry::{ConnectionRegistry, RoomMembership};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across handlers and the WebSocket hub.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: PgPool,

    /// Service configuration.
    pub config: Config,

    /// Bearer token validator, shared between the auth middleware and the
    /// WebSocket upgrade path.
    pub jwt_validator: Arc<JwtValidator>,

    /// user -> live connection handle.
    pub registry: ConnectionRegistry,

    /// room -> members.
    pub rooms: RoomMembership,

    /// (session, user) -> last heartbeat.
    pub heartbeats: HeartbeatTracker,

    /// Signaling fan-out over the registry and rooms.
    pub relay: SignalingRelay,

    /// Key-exchange validation and audit record production.
    pub auditor: E2eeAuditor,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - probes, public, unversioned
/// - `/metrics` - Prometheus exposition, public, unversioned
/// - `/ws` - WebSocket upgrade; authenticates via query token before upgrade
/// - `/api/v1/sessions...` - session lifecycle, bearer auth
/// - `/api/v1/users/me/calls...` - history and statistics, bearer auth
///
/// TraceLayer for request logging, a 30 second request timeout, and the
/// HTTP metrics middleware outermost so framework-level responses (404,
/// 405, 415) are counted too.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        jwt_validator: Arc::clone(&state.jwt_validator),
    });

    // Public routes (no authentication middleware; /ws authenticates its
    // own query token before upgrading)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/ws", get(hub::ws_handler))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (bearer authentication required)
    let protected_routes = Router::new()
        .route("/api/v1/sessions", post(handlers::create_session))
        .route("/api/v1/sessions/:key", get(handlers::get_session))
        .route("/api/v1/sessions/:id/join", post(handlers::join_session))
        .route("/api/v1/sessions/:id/start", post(handlers::start_session))
        .route("/api/v1/sessions/:id/leave", post(handlers::leave_session))
        .route("/api/v1/sessions/:id/end", post(handlers::end_session))
        .route("/api/v1/sessions/:id/cancel", post(handlers::cancel_session))
        .route("/api/v1/users/me/calls", get(handlers::get_call_history))
        .route(
            "/api/v1/users/me/calls/statistics",
            get(handlers::get_call_statistics),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - timeout the request (innermost)
    // 2. TraceLayer - log request details
    // 3. http_metrics_middleware - record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
