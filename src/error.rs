//! # Error Types
//!
//! Error handling for the relay and the worker protocol.
//!
//! This module defines every error variant that can occur, from low-level I/O
//! failures on a session's byte stream to roster synchronisation failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Stream failures, including end-of-stream
//! - **Protocol Errors**: Magic mismatch, length-limit violations, unknown operations
//! - **Collaborator Errors**: Path-info lookups and roster queries
//! - **Transport Errors**: SSH listener and worker process wiring
//! - **Configuration Errors**: Invalid or missing settings
//!
//! `RelayError` is `Clone` so a failed worker session can keep the first error
//! in its sticky slot and hand copies to every later operation.
//!
//! ## Example Usage
//! ```rust
//! use nix_daemon_relay::error::{RelayError, Result};
//! use std::fs::File;
//! use std::io::Read;
//! use tracing::{info, error};
//!
//! fn read_token(path: &str) -> Result<String> {
//!     let mut file = File::open(path)?;
//!     let mut contents = String::new();
//!     file.read_to_string(&mut contents)?;
//!     Ok(contents.trim().to_string())
//! }
//!
//! fn main() {
//!     match read_token("token.txt") {
//!         Ok(_) => info!("Token loaded"),
//!         Err(e) => error!(error=%e, "Error reading token"),
//!     }
//! }
//! ```

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake errors
    pub const ERR_READ_CLIENT_MAGIC: &str = "reading worker magic 1";
    pub const ERR_WRITE_SERVER_MAGIC: &str = "writing worker magic 2";
    pub const ERR_WRITE_PROTOCOL_VERSION: &str = "writing server protocol version";
    pub const ERR_READ_CLIENT_VERSION: &str = "reading client protocol version";
    pub const ERR_WRITE_DAEMON_VERSION: &str = "writing daemon version";
    pub const ERR_WRITE_STDERR_LAST: &str = "writing StderrLast";
    pub const ERR_READ_AFFINITY: &str = "reading CPU affinity";
    pub const ERR_READ_RESERVE_SPACE: &str = "reading reserve space";

    /// Operation errors
    pub const ERR_READ_OPERATION: &str = "reading operation";
    pub const ERR_READ_EXPECTED: &str = "reading expected";
    pub const ERR_READ_NARINFO: &str = "reading Narinfo";

    /// Admission errors
    pub const MSG_TOO_MANY_CONNECTIONS: &str = "Too many connections\n";

    /// Roster errors
    pub const ERR_ROSTER_QUERY: &str = "while querying github";
    pub const ERR_MISSING_TEAM: &str = "team not found in organization";
    pub const ERR_MISSING_TOKEN: &str =
        "--github-token or --github-token-path is required (alternatively environment variables GITHUB_TOKEN or GITHUB_TOKEN_PATH)";
}

// RelayError is the primary error type for all relay operations
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<RelayError>,
    },

    #[error("worker magic 1 mismatch: '{got:x}' should be '{expected:x}'")]
    MagicMismatch { expected: u64, got: u64 },

    #[error("string too long: {len} bytes (maximum {max})")]
    StringTooLong { len: u64, max: u64 },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid result status: {0}")]
    InvalidStatus(u64),

    #[error("copied {copied} of {expected} bytes")]
    ShortNar { copied: u64, expected: u64 },

    #[error("path info lookup failed: {0}")]
    Lookup(String),

    #[error("roster query failed: {0}")]
    RosterQuery(String),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("worker error: {0}")]
    Worker(String),
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::Io(Arc::new(err))
    }
}

impl From<russh::Error> for RelayError {
    fn from(err: russh::Error) -> Self {
        RelayError::Ssh(err.to_string())
    }
}

impl From<russh_keys::Error> for RelayError {
    fn from(err: russh_keys::Error) -> Self {
        RelayError::Ssh(err.to_string())
    }
}

impl From<tokio_postgres::Error> for RelayError {
    fn from(err: tokio_postgres::Error) -> Self {
        RelayError::Lookup(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::RosterQuery(err.to_string())
    }
}

impl RelayError {
    /// Attach a static description of what was being attempted.
    pub fn context(self, context: &'static str) -> Self {
        RelayError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// True when the error is (or wraps) an `UnexpectedEof` I/O error.
    pub fn is_eof(&self) -> bool {
        match self {
            RelayError::Io(err) => err.kind() == io::ErrorKind::UnexpectedEof,
            RelayError::Context { source, .. } => source.is_eof(),
            _ => false,
        }
    }
}

/// Extension for attaching context to results, in the spirit of `WithMessage`.
pub trait ResultExt<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T, E: Into<RelayError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|err| err.into().context(context))
    }
}

/// Type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
