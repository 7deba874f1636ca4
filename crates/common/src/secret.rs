//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for all sensitive values like signing secrets, connection strings with
//! embedded credentials, and bearer tokens.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` and contains a secret gets safe logging behavior for
//! free. Accessing the inner value requires an explicit
//! [`ExposeSecret::expose_secret`] call, and secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct SigningConfig {
//!     issuer: String,
//!     signing_secret: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let config = SigningConfig {
//!     issuer: "callbridge".to_string(),
//!     signing_secret: SecretString::from("hunter2"),
//! };
//!
//! // Safe: signing_secret is redacted
//! println!("{:?}", config);
//!
//! // Explicit access only
//! let secret: &str = config.signing_secret.expose_secret();
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
