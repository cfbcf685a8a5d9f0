//! Error types for cdcwire.
//!
//! Errors fall into four groups:
//!
//! - **Configuration**: bad settings, malformed endpoint, missing named pipe.
//!   Raised at startup.
//! - **Transport**: write or flush failures. Raised on first occurrence, never
//!   retried; a half-written line stream cannot be repaired in place.
//! - **Consistency**: too many consecutive handshakes without acknowledgment.
//! - **Terminal**: any call made after the coordinator has failed.
//!
//! A missing or declined acknowledgment is *not* an error; it surfaces as a
//! refused checkpoint advance.

use thiserror::Error;

/// Main error type for all cdcwire operations.
#[derive(Debug, Error)]
pub enum CdcWireError {
    /// Invalid settings or malformed endpoint.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON settings could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error outside the record stream (settings file, pipe open).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The named pipe must be created by the consumer before startup.
    #[error("Named pipe {path} does not exist or is a directory")]
    PipeMissing {
        /// Configured pipe path.
        path: String,
    },

    /// No TCP connection could be established before the connect timeout.
    #[error("Connection to {endpoint} failed after {waited_secs} seconds: {reason}")]
    Connect {
        /// Configured `host:port`.
        endpoint: String,
        /// Seconds spent retrying.
        waited_secs: u64,
        /// Last dial error observed.
        reason: String,
    },

    /// The acknowledging consumer did not report readiness in time.
    #[error("Consumer at {endpoint} did not report readiness within {timeout_secs} seconds")]
    NotReady {
        /// Configured `host:port`.
        endpoint: String,
        /// Readiness timeout that elapsed.
        timeout_secs: u64,
    },

    /// Startup was interrupted by a shutdown signal.
    #[error("Connecting to {endpoint} was cancelled")]
    Cancelled {
        /// Configured endpoint.
        endpoint: String,
    },

    /// Writing a record to the channel failed.
    #[error("Error while writing record to {endpoint}: {source}")]
    Write {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Flushing the channel failed.
    #[error("Error while flushing output to {endpoint}: {source}")]
    Flush {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A change event that cannot be encoded.
    #[error("Invalid change event for table {table}: {reason}")]
    InvalidEvent {
        /// Table the event belongs to.
        table: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A wire record could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Consecutive unacknowledged handshakes exceeded the configured limit.
    #[error(
        "Consumer at {endpoint} did not handshake after {failures} attempts, \
         maximum number of handshake failures of {max_failures} has been exceeded \
         ({pending_transactions} unacknowledged transactions, last transaction {last_tx_id} at {last_tx_timestamp})"
    )]
    HandshakeExhausted {
        /// Configured endpoint.
        endpoint: String,
        /// Consecutive failures, including the one that tripped the limit.
        failures: u32,
        /// Configured limit.
        max_failures: u32,
        /// Commits sent but never acknowledged.
        pending_transactions: u64,
        /// Last transaction id seen, or `-`.
        last_tx_id: String,
        /// Last transaction timestamp seen, or `-`.
        last_tx_timestamp: String,
    },

    /// The coordinator already failed; no further checkpoint may advance.
    #[error("Delivery to {endpoint} has failed permanently, no further checkpoint advances are permitted")]
    Failed {
        /// Configured endpoint.
        endpoint: String,
    },
}

impl CdcWireError {
    /// Whether the error must abort the run.
    ///
    /// Only decode errors of individual records are recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CdcWireError::Protocol(_))
    }
}

/// Result type alias using CdcWireError.
pub type Result<T> = std::result::Result<T, CdcWireError>;
