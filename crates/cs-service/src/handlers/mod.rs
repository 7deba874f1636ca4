//! HTTP handlers for the Call Signaling Service.
//!
//! Handlers stay thin: request parsing, authorization, and response
//! shaping. Persistence lives in `repositories`, signaling fan-out in
//! `hub`.

pub mod health;
pub mod history;
pub mod sessions;

pub use health::{health_check, metrics_handler, readiness_check};
pub use history::{get_call_history, get_call_statistics};
pub use sessions::{
    cancel_session, create_session, end_session, get_session, join_session, leave_session,
    start_session,
};
