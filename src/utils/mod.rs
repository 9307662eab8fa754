//! Utility Functions and Diagnostics
//!
//! Startup diagnostics and user-friendly error formatting.
//!
//! ## Diagnostics
//!
//! The [`diagnostics`] module logs the host facts that matter when a display
//! fails to come up (kernel, hostname, effective user, X socket directory).
//!
//! ## Error Formatting
//!
//! The [`errors`] module sorts fatal startup errors into a [`Failure`] class
//! and renders them with the error chain and troubleshooting hints:
//!
//! ```rust,no_run
//! use gould::utils::format_user_error;
//!
//! let e = anyhow::anyhow!("Failed to parse config file: /etc/gould/gould.toml");
//! eprintln!("{}", format_user_error(&e));
//! ```
//!
//! Classes: invalid configuration, lock held by another instance, X server
//! unreachable, account database unreadable.

pub mod diagnostics;
pub mod errors;

pub use diagnostics::{format_uptime, log_startup_diagnostics, SystemInfo};
pub use errors::{format_user_error, Failure};
