//! # gould
//!
//! Minimal X display manager: starts the X server, presents a greeter or a
//! built-in terminal prompt, authenticates users and supervises their
//! desktop sessions.
//!
//! # Architecture
//!
//! ```text
//! gould
//!   ├─> Lock file (single instance)
//!   ├─> Process supervisor (X server, greeter, session process groups)
//!   ├─> Session controller (authentication, Idle/Running, autologin slot)
//!   ├─> Front-end (greeter pipe protocol | built-in prompt on the tty)
//!   └─> Lifecycle (signals, crash hook, restart policy)
//! ```
//!
//! # Control Flow
//!
//! **Startup:** lock → cookie → X server → reachable → autologin or front-end
//!
//! **Login:** front-end → credential store → session launcher → Running
//!
//! **Logout:** SIGCHLD → reap → Idle → front-end again
//!
//! **Exit:** signal/action/server loss → cleanup → exit code or respawn

#![warn(clippy::all)]

/// Credential stores (shadow files, PAM)
pub mod auth;

/// Daemon configuration
pub mod config;

/// Daemon context and event loop
pub mod daemon;

/// External greeter process and its line protocol
pub mod greeter;

/// Signals, crash hook and restart policy
pub mod lifecycle;

/// Built-in terminal login prompt
pub mod prompt;

/// Session state, preferences and system actions
pub mod session;

/// Child process supervision, lock file and X authority
pub mod supervisor;

/// Utility functions
pub mod utils;

pub use config::Config;
pub use daemon::Daemon;
