//! Subscription settings.
//!
//! Settings are plain data with serde support so a host can load them from
//! whatever it already uses. Keys are camelCase and every key has a default:
//!
//! ```json
//! {
//!   "outputType": "cdcsource",
//!   "endpoint": "streams-host:12345",
//!   "handshakeAfterMaxTransactions": 100,
//!   "handshakeAfterMaxSeconds": 60,
//!   "columnsToSanitize": ["COMMENTS"]
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CdcWireError, Result};
use crate::protocol::{Separators, DEFAULT_DATA_SEPARATOR, DEFAULT_METADATA_SEPARATOR};

/// Default `host:port` of the consumer.
pub const DEFAULT_ENDPOINT: &str = "localhost:12345";

/// Kind of downstream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum OutputType {
    /// Plain TCP; handshakes are sent but never enforced.
    TcpSource,
    /// TCP to an acknowledging consumer; readiness and handshakes are enforced.
    CdcSource,
    /// Append to a pre-existing named pipe (fifo).
    NamedPipe,
    /// Discard everything. Dry runs and debugging.
    Null,
}

impl OutputType {
    /// Whether this channel sends acknowledgments back.
    pub fn is_enforcing(self) -> bool {
        matches!(self, OutputType::CdcSource)
    }

    /// Whether this channel is a TCP connection.
    pub fn is_tcp(self) -> bool {
        matches!(self, OutputType::TcpSource | OutputType::CdcSource)
    }

    /// Canonical configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::TcpSource => "tcpsource",
            OutputType::CdcSource => "cdcsource",
            OutputType::NamedPipe => "namedpipe",
            OutputType::Null => "null",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = CdcWireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" | "tcpsource" => Ok(OutputType::TcpSource),
            "cdcsource" => Ok(OutputType::CdcSource),
            "namedpipe" | "fifo" => Ok(OutputType::NamedPipe),
            "null" => Ok(OutputType::Null),
            other => Err(CdcWireError::Config(format!(
                "Unknown outputType '{}', expected one of tcpsource, cdcsource, namedpipe, null",
                other
            ))),
        }
    }
}

impl TryFrom<String> for OutputType {
    type Error = CdcWireError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// All recognized options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Channel kind.
    pub output_type: OutputType,
    /// `host:port` for TCP, a path for named pipes, ignored for null.
    pub endpoint: String,
    /// Separator between column values.
    pub data_separator: char,
    /// Separator between protocol fields.
    pub metadata_separator: char,
    /// Handshake once this many commits are unacknowledged.
    pub handshake_after_max_transactions: u64,
    /// Handshake at least this often, in seconds.
    pub handshake_after_max_seconds: u64,
    /// How long to wait for a handshake acknowledgment.
    pub handshake_ack_timeout_ms: u64,
    /// Consecutive unacknowledged handshakes tolerated before failing.
    pub handshake_max_consecutive_failures: u32,
    /// How long to keep retrying the TCP connection at startup.
    pub connect_timeout_seconds: u64,
    /// How long to wait for the `i` readiness line (cdcsource only).
    pub ready_timeout_seconds: u64,
    /// Columns whose values get line breaks and separators replaced.
    pub columns_to_sanitize: HashSet<String>,
    /// Replacement for scrubbed characters.
    pub sanitize_replacement_char: char,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_type: OutputType::TcpSource,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            data_separator: DEFAULT_DATA_SEPARATOR,
            metadata_separator: DEFAULT_METADATA_SEPARATOR,
            handshake_after_max_transactions: 100,
            handshake_after_max_seconds: 60,
            handshake_ack_timeout_ms: 500,
            handshake_max_consecutive_failures: 0,
            connect_timeout_seconds: 120,
            ready_timeout_seconds: 10,
            columns_to_sanitize: HashSet::new(),
            sanitize_replacement_char: ' ',
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.separators().validate()?;
        if self.handshake_after_max_transactions < 1 {
            return Err(CdcWireError::Config(
                "handshakeAfterMaxTransactions must be at least 1".to_string(),
            ));
        }
        if self.handshake_after_max_seconds < 1 {
            return Err(CdcWireError::Config(
                "handshakeAfterMaxSeconds must be at least 1".to_string(),
            ));
        }
        let replacement = self.sanitize_replacement_char;
        if replacement == self.data_separator
            || replacement == self.metadata_separator
            || replacement == '\n'
            || replacement == '\r'
        {
            return Err(CdcWireError::Config(format!(
                "sanitizeReplacementChar {:?} cannot be a separator or line break",
                replacement
            )));
        }
        if self.output_type != OutputType::Null && self.endpoint.trim().is_empty() {
            return Err(CdcWireError::Config(format!(
                "endpoint is required for outputType {}",
                self.output_type
            )));
        }
        Ok(())
    }

    /// Separator pair used on the wire.
    pub fn separators(&self) -> Separators {
        Separators::new(self.data_separator, self.metadata_separator)
    }

    /// Acknowledgment wait per handshake.
    pub fn handshake_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_ack_timeout_ms)
    }

    /// Maximum time between handshakes.
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_secs(self.handshake_after_max_seconds)
    }

    /// Total TCP connect budget.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Readiness wait for acknowledging consumers.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }
}
