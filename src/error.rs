//! Error types for Corral.
//!
//! This module provides a unified error type [`CorralError`] for all Corral
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! Errors are organized into the following categories:
//!
//! - **Validation**: invalid or conflicting configuration intent, always
//!   fatal before the store process is spawned
//! - **Transient Network**: DNS misses, refused connections, timed-out
//!   round-trips; retried inside bounded budgets by the resolver and prober
//! - **Bootstrap**: a peer never became ready or the cluster never
//!   converged; fatal to the orchestrator and to the supervising process
//! - **File**: config or identity file IO, fatal and surfaced immediately
//!
//! # Example
//!
//! ```rust
//! use corral::error::{CorralError, Result};
//!
//! fn check_peer_list(peers: &[String]) -> Result<()> {
//!     if peers.is_empty() {
//!         return Err(CorralError::Validation {
//!             field: "cluster.peers".into(),
//!             reason: "at least one peer is required".into(),
//!         });
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Corral operations.
#[derive(Error, Debug)]
pub enum CorralError {
    // Validation errors
    #[error("Invalid configuration: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Transient network errors
    #[error("DNS resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("Connection failed to {target}: {reason}")]
    Connection { target: String, reason: String },

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Unexpected reply from {target}: {reply}")]
    UnexpectedReply { target: String, reply: String },

    // Administrative protocol errors
    #[error("Protocol error from {target}: {reason}")]
    Protocol { target: String, reason: String },

    // Bootstrap errors
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    // File errors
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CorralError {
    /// Check if the error is transient and worth retrying inside a bounded
    /// retry budget. Exhausting the budget converts the last transient
    /// error into a [`CorralError::Bootstrap`] at the orchestrator boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CorralError::Dns { .. }
                | CorralError::Connection { .. }
                | CorralError::Timeout(_)
                | CorralError::UnexpectedReply { .. }
        )
    }

    /// Wrap an IO error with the path that caused it.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CorralError::File {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for CorralError {
    fn from(e: serde_json::Error) -> Self {
        CorralError::Serialization(e.to_string())
    }
}

/// Result type alias for Corral operations.
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CorralError::Timeout(100).is_retryable());
        assert!(CorralError::Dns {
            host: "node-0".into(),
            reason: "no records".into()
        }
        .is_retryable());
        assert!(CorralError::Connection {
            target: "node-0:6379".into(),
            reason: "refused".into()
        }
        .is_retryable());

        assert!(!CorralError::Validation {
            field: "auth.password".into(),
            reason: "empty".into()
        }
        .is_retryable());
        assert!(!CorralError::Bootstrap("peer never ready".into()).is_retryable());
    }

    #[test]
    fn test_file_error_names_path() {
        let err = CorralError::file(
            "/data/nodes.conf",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/data/nodes.conf"));
    }
}
