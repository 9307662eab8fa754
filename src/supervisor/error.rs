//! Process Supervision Error Types

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Process supervision error types
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Another live instance holds the lock
    #[error("Another instance is already running (pid {0})")]
    AlreadyRunning(i32),

    /// X server did not accept connections in time
    #[error("Display {display} not reachable after {attempts} attempts")]
    DisplayUnreachable { display: String, attempts: u32 },

    /// X server exited while we were waiting for it
    #[error("X server exited during startup")]
    DisplayServerDied,

    /// Malformed display name
    #[error("Invalid display name: {0}")]
    InvalidDisplay(String),

    /// Empty or unparsable command line
    #[error("Invalid command line: {0}")]
    InvalidCommand(String),

    /// Process creation failed
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// System V semaphore error
    #[error("Semaphore error: {0}")]
    Semaphore(#[source] std::io::Error),

    /// OS error
    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
