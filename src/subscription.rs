//! Subscription builder.
//!
//! The [`SubscriptionBuilder`] provides a fluent API over [`Settings`] and
//! starts the [`Coordinator`]. Starting a subscription:
//! 1. Validate settings
//! 2. Open the transport (connect, wait for readiness, send init)
//! 3. Start the heartbeat timer
//!
//! # Example
//!
//! ```ignore
//! use cdcwire::{Coordinator, OutputType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut coordinator = Coordinator::builder()
//!         .output_type(OutputType::CdcSource)
//!         .endpoint("streams-host:12345")
//!         .handshake_after_max_transactions(50)
//!         .sanitize_column("COMMENTS")
//!         .start()
//!         .await?;
//!
//!     // feed row changes and boundaries ...
//!
//!     coordinator.stop().await;
//!     Ok(())
//! }
//! ```

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::{OutputType, Settings};
use crate::coordinator::Coordinator;
use crate::error::Result;

/// Builder for configuring and starting a subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionBuilder {
    settings: Settings,
    shutdown: Option<CancellationToken>,
}

impl SubscriptionBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            shutdown: None,
        }
    }

    /// Start from a JSON settings file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_settings(Settings::from_json_file(path)?))
    }

    /// Set the channel kind.
    ///
    /// Default: tcpsource
    pub fn output_type(mut self, output_type: OutputType) -> Self {
        self.settings.output_type = output_type;
        self
    }

    /// Set `host:port` for TCP or the pipe path.
    ///
    /// Default: localhost:12345
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.endpoint = endpoint.into();
        self
    }

    /// Set both separators.
    ///
    /// Default: `0x1D` between column values, `0x00` between fields
    pub fn separators(mut self, data: char, metadata: char) -> Self {
        self.settings.data_separator = data;
        self.settings.metadata_separator = metadata;
        self
    }

    /// Handshake once this many commits are unacknowledged.
    ///
    /// Default: 100
    pub fn handshake_after_max_transactions(mut self, count: u64) -> Self {
        self.settings.handshake_after_max_transactions = count;
        self
    }

    /// Handshake at least this often.
    ///
    /// Default: 60 seconds
    pub fn handshake_after_max_seconds(mut self, seconds: u64) -> Self {
        self.settings.handshake_after_max_seconds = seconds;
        self
    }

    /// How long to wait for each handshake acknowledgment.
    ///
    /// Default: 500 ms
    pub fn handshake_ack_timeout_ms(mut self, millis: u64) -> Self {
        self.settings.handshake_ack_timeout_ms = millis;
        self
    }

    /// Consecutive unanswered handshakes tolerated before failing.
    ///
    /// Default: 0
    pub fn handshake_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.settings.handshake_max_consecutive_failures = failures;
        self
    }

    /// Total TCP connect budget.
    ///
    /// Default: 120 seconds
    pub fn connect_timeout_seconds(mut self, seconds: u64) -> Self {
        self.settings.connect_timeout_seconds = seconds;
        self
    }

    /// Readiness wait for acknowledging consumers.
    ///
    /// Default: 10 seconds
    pub fn ready_timeout_seconds(mut self, seconds: u64) -> Self {
        self.settings.ready_timeout_seconds = seconds;
        self
    }

    /// Scrub line breaks and separators from values of `column`.
    pub fn sanitize_column(mut self, column: impl Into<String>) -> Self {
        self.settings.columns_to_sanitize.insert(column.into());
        self
    }

    /// Replacement for scrubbed characters.
    ///
    /// Default: space
    pub fn sanitize_replacement_char(mut self, replacement: char) -> Self {
        self.settings.sanitize_replacement_char = replacement;
        self
    }

    /// Abort the connection phase when `token` is cancelled.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Settings accumulated so far.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validate, connect and start the coordinator.
    pub async fn start(self) -> Result<Coordinator> {
        let shutdown = self.shutdown.unwrap_or_else(CancellationToken::new);
        Coordinator::start_with_shutdown(self.settings, shutdown).await
    }
}

impl Coordinator {
    /// Create a new subscription builder.
    pub fn builder() -> SubscriptionBuilder {
        SubscriptionBuilder::new()
    }
}
