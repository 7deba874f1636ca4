//! Common utilities shared across CallBridge components.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (validation, claims, constants)
pub mod jwt;

/// Module for secret types that prevent accidental logging
pub mod secret;
