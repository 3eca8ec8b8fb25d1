//! Error types for the local runtime emulator
//!
//! This module defines the main error enum used throughout the crate and
//! the crate-wide [`Result`] alias. Protocol-level oddities that the
//! emulator tolerates by design (an unmatched response callback, a worker
//! that exits without responding) are deliberately *not* errors; see the
//! dispatch and pool modules for how those are absorbed.

use thiserror::Error;

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, LocalRuntimeError>;

/// Top-level error type for the local runtime emulator.
#[derive(Debug, Error)]
pub enum LocalRuntimeError {
    /// The handler toolchain exited non-zero before any worker spawned.
    /// The function stays cold so the next dispatch retries the build.
    #[error("function '{function}' failed to build: {detail}")]
    Build { function: String, detail: String },

    /// A worker process could not be started.
    #[error("failed to spawn worker for '{function}': {source}")]
    Spawn {
        function: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The egress proxy could not decode or reach the requested target.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The file-watch subsystem reported a problem; the watcher logs
    /// this and keeps running.
    #[error("watch error: {0}")]
    Watch(String),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure on the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure binding or serving the runtime API listener.
    #[error("server error: {0}")]
    Server(String),
}

impl LocalRuntimeError {
    /// Build failure constructor used by toolchain implementations.
    pub fn build(function: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Build {
            function: function.into(),
            detail: detail.into(),
        }
    }
}
