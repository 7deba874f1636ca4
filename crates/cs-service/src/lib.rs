//! Call Signaling Service (CS) Library
//!
//! This library provides the core functionality for the CallBridge Call
//! Signaling Service - a stateful WebSocket signaling server responsible
//! for:
//!
//! - Connection registry (user -> live WebSocket) and room membership
//! - WebRTC signaling relay (SDP offers/answers, ICE candidates)
//! - Liveness monitoring with heartbeat-driven zombie eviction
//! - Call session lifecycle (pending -> active -> completed/cancelled),
//!   durable in Postgres
//! - E2EE key-exchange validation, rate limiting, and audit logging
//!
//! # Architecture
//!
//! REST traffic follows the Handler -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> repositories/*.rs
//! ```
//!
//! WebSocket traffic enters through `hub`, which dispatches frames against
//! the in-memory registry and rooms, with the same repositories behind the
//! persistent pieces (capability toggles, audit rows).
//!
//! # Modules
//!
//! - `auth` - Bearer token validation
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `hub` - WebSocket hub: protocol, relay, key-exchange auditing
//! - `liveness` - Heartbeat tracking
//! - `registry` - Connection registry and room membership
//! - `repositories` - Database access
//! - `routes` - Axum router setup
//! - `tasks` - Background tasks (liveness sweeper)

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod liveness;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod registry;
pub mod repositories;
pub mod routes;
pub mod tasks;
