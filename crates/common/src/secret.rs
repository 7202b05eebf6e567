//! Secret types for protecting sensitive variable values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for any
//! module input that must reach the provisioning tool but must never appear in
//! harness logs or reports: cloud credentials, API keys, bootstrap passwords.
//!
//! `SecretString` implements `Debug` with redaction, so a struct deriving
//! `Debug` that holds one is safe to log via `{:?}` or tracing fields.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ModuleInput {
//!     name: String,
//!     value: SecretString,
//! }
//!
//! let input = ModuleInput {
//!     name: "admin_password".to_string(),
//!     value: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{input:?}").contains("hunter2"));
//! assert_eq!(input.value.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Placeholder written in place of secret values in logs and rendered arguments.
pub const REDACTED: &str = "[REDACTED]";

/// Replace every occurrence of each secret in `text` with [`REDACTED`].
///
/// Empty secrets are skipped.
#[must_use]
pub fn redact(text: &str, secrets: &[SecretString]) -> String {
    secrets
        .iter()
        .map(|s| s.expose_secret())
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
}
