//! Commit/handshake coordinator.
//!
//! The coordinator owns the transport, the heartbeat timer and one encoder
//! per table. The host calls it once per row change and once per transaction
//! boundary; the boundary call decides whether the host may advance its
//! checkpoint.
//!
//! ```text
//!  AwaitingFirstEvent ──row──► Streaming ──handshake not acked──► HandshakePending
//!                                  ▲                                 │      │
//!                                  └────────── handshake acked ──────┘      │
//!                                                         too many failures ▼
//!                                                                        Failed
//! ```
//!
//! A checkpoint may advance only when nothing is outstanding: no operations
//! in the current window and no commits awaiting acknowledgment. Acknowledging
//! consumers must answer each handshake; other channels get the handshake
//! record but it is not enforced.
//!
//! # Example
//!
//! ```ignore
//! let mut coordinator = Coordinator::builder()
//!     .output_type(OutputType::CdcSource)
//!     .endpoint("streams-host:12345")
//!     .start()
//!     .await?;
//!
//! coordinator.on_row_change(&event).await?;
//! if coordinator.on_transaction_boundary().await? {
//!     // advance bookmark
//! }
//! coordinator.stop().await;
//! ```

use std::collections::HashMap;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{OutputType, Settings};
use crate::encoder::EventEncoder;
use crate::error::{CdcWireError, Result};
use crate::event::{ChangeEvent, TableId};
use crate::heartbeat::HeartbeatTimer;
use crate::protocol::{now_timestamp, Ack, Record};
use crate::transport::Transport;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Started, no row change seen yet.
    AwaitingFirstEvent,
    /// Delivering; the last handshake, if any, was acknowledged.
    Streaming,
    /// The last handshake was declined or not answered.
    HandshakePending,
    /// Terminal. No checkpoint may advance.
    Failed,
}

/// Row changes seen since the last boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionWindow {
    /// Operations since the last boundary.
    pub operations: u64,
    /// Transaction id of the last row change, kept across boundaries.
    pub last_tx_id: Option<String>,
    /// Transaction timestamp of the last row change, kept across boundaries.
    pub last_tx_timestamp: Option<String>,
}

/// Handshake bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeState {
    /// Handshakes in a row that got no usable acknowledgment.
    pub consecutive_failures: u32,
    /// Handshakes whose acknowledgment timed out and may still arrive.
    ///
    /// That many `h`/`t` lines are discarded before the next answer is
    /// matched to its request.
    pub unanswered: u32,
}

/// Drives one subscription.
#[derive(Debug)]
pub struct Coordinator {
    settings: Settings,
    transport: Transport,
    timer: HeartbeatTimer,
    encoders: HashMap<TableId, EventEncoder>,
    window: TransactionWindow,
    pending: u64,
    handshake: HandshakeState,
    state: CoordinatorState,
    stopped: bool,
}

impl Coordinator {
    /// Validate `settings`, open the transport and start the heartbeat timer.
    pub async fn start(settings: Settings) -> Result<Self> {
        Self::start_with_shutdown(settings, CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), aborting the connection phase when
    /// `shutdown` is cancelled.
    pub async fn start_with_shutdown(settings: Settings, shutdown: CancellationToken) -> Result<Self> {
        settings.validate()?;
        tracing::info!(
            output_type = %settings.output_type,
            endpoint = %settings.endpoint,
            handshake_after_max_transactions = settings.handshake_after_max_transactions,
            handshake_after_max_seconds = settings.handshake_after_max_seconds,
            handshake_ack_timeout_ms = settings.handshake_ack_timeout_ms,
            handshake_max_consecutive_failures = settings.handshake_max_consecutive_failures,
            columns_to_sanitize = ?settings.columns_to_sanitize,
            "Starting subscription"
        );
        let transport = Transport::open(&settings, &shutdown).await?;
        Ok(Self::from_parts(settings, transport))
    }

    /// Assemble a coordinator around an already open transport.
    pub(crate) fn from_parts(settings: Settings, transport: Transport) -> Self {
        let timer = HeartbeatTimer::start(settings.handshake_interval());
        Self {
            settings,
            transport,
            timer,
            encoders: HashMap::new(),
            window: TransactionWindow::default(),
            pending: 0,
            handshake: HandshakeState::default(),
            state: CoordinatorState::AwaitingFirstEvent,
            stopped: false,
        }
    }

    /// Encode and send one row change.
    pub async fn on_row_change(&mut self, event: &ChangeEvent) -> Result<()> {
        self.ensure_not_failed()?;

        let settings = &self.settings;
        let encoder = self
            .encoders
            .entry(event.table.clone())
            .or_insert_with(|| EventEncoder::from_settings(settings));
        let record = Record::Data(encoder.encode(event)?);

        if let Err(e) = self.transport.write(&record).await {
            return Err(self.fail(e));
        }

        self.window.operations += 1;
        self.window.last_tx_id = Some(event.tx_id.clone());
        self.window.last_tx_timestamp = Some(event.tx_timestamp.clone());
        if self.state == CoordinatorState::AwaitingFirstEvent {
            self.state = CoordinatorState::Streaming;
        }
        Ok(())
    }

    /// Close the current transaction window.
    ///
    /// Returns whether the host may advance its checkpoint.
    pub async fn on_transaction_boundary(&mut self) -> Result<bool> {
        self.ensure_not_failed()?;

        let mut may_advance = self.window.operations == 0 && self.pending == 0;
        let mut wrote = false;

        if self.window.operations > 0 {
            tracing::debug!(
                operations = self.window.operations,
                tx_id = ?self.window.last_tx_id,
                "Closing transaction window"
            );
            let commit = Record::Commit {
                tx_timestamp: self.window.last_tx_timestamp.clone().unwrap_or_default(),
                tx_id: self.window.last_tx_id.clone().unwrap_or_default(),
            };
            if let Err(e) = self.transport.write(&commit).await {
                return Err(self.fail(e));
            }
            // Nothing can acknowledge a discarded commit.
            if self.transport.kind() != OutputType::Null {
                self.pending += 1;
            }
            self.window.operations = 0;
            wrote = true;
            tracing::debug!(pending = self.pending, "Number of pending transactions");
        }

        let count_reached = self.pending >= self.settings.handshake_after_max_transactions;
        let timer_due = self.timer.is_due();
        if count_reached || timer_due {
            tracing::debug!(
                pending = self.pending,
                timed = timer_due,
                "Handshake will be done"
            );
            may_advance = self.handshake().await?;
            wrote = true;
        }

        if wrote {
            if let Err(e) = self.transport.flush().await {
                return Err(self.fail(e));
            }
        }
        tracing::debug!(may_advance, "Commit transaction(s)");
        Ok(may_advance)
    }

    /// Send a finalize record, close the transport and stop the timer.
    ///
    /// Errors are logged, never returned. Calling twice is a no-op.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        tracing::info!(endpoint = %self.transport.endpoint(), "Stopping subscription");

        let finalize = Record::Finalize {
            timestamp: now_timestamp(),
        };
        match self.transport.write(&finalize).await {
            Ok(()) => {
                if let Err(e) = self.transport.flush().await {
                    tracing::warn!("Finalize could not be flushed: {}", e);
                }
            }
            Err(e) => tracing::warn!("Finalize could not be sent: {}", e),
        }
        self.transport.close().await;
        self.timer.join().await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Commits sent but not yet acknowledged.
    pub fn pending_transactions(&self) -> u64 {
        self.pending
    }

    /// Current transaction window.
    pub fn window(&self) -> &TransactionWindow {
        &self.window
    }

    /// Handshake failure counter.
    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake
    }

    /// Effective settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The downstream channel.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Encoder of `table`, once it has seen an event.
    pub fn encoder(&self, table: &TableId) -> Option<&EventEncoder> {
        self.encoders.get(table)
    }

    /// Whether [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Send a handshake and, for acknowledging consumers, evaluate the answer.
    async fn handshake(&mut self) -> Result<bool> {
        let request = Record::Handshake {
            timestamp: now_timestamp(),
        };
        if let Err(e) = self.transport.write(&request).await {
            return Err(self.fail(e));
        }
        self.timer.reset();

        if !self.transport.is_enforcing() {
            self.accept_handshake();
            return Ok(true);
        }

        // The request must be on the wire before we wait for its answer.
        if let Err(e) = self.transport.flush().await {
            return Err(self.fail(e));
        }
        tracing::debug!("Requesting handshake from consumer");
        let feedback = self.await_handshake_ack().await;
        tracing::debug!(feedback = ?feedback, "Feedback received");

        match feedback {
            Some(Ack::Handshake) => {
                self.accept_handshake();
                Ok(true)
            }
            Some(Ack::Declined) => {
                tracing::warn!(pending = self.pending, "Handshake declined by consumer");
                self.state = CoordinatorState::HandshakePending;
                Ok(false)
            }
            other => {
                if other.is_none() {
                    self.handshake.unanswered = self.handshake.unanswered.saturating_add(1);
                }
                self.handshake.consecutive_failures =
                    self.handshake.consecutive_failures.saturating_add(1);
                let failures = self.handshake.consecutive_failures;
                let max_failures = self.settings.handshake_max_consecutive_failures;
                tracing::warn!(
                    failures,
                    max_failures,
                    ack = ?other,
                    "Handshake not acknowledged"
                );
                if failures > max_failures {
                    let err = CdcWireError::HandshakeExhausted {
                        endpoint: self.transport.endpoint().to_string(),
                        failures,
                        max_failures,
                        pending_transactions: self.pending,
                        last_tx_id: self.window.last_tx_id.clone().unwrap_or_else(|| "-".to_string()),
                        last_tx_timestamp: self
                            .window
                            .last_tx_timestamp
                            .clone()
                            .unwrap_or_else(|| "-".to_string()),
                    };
                    return Err(self.fail(err));
                }
                self.state = CoordinatorState::HandshakePending;
                Ok(false)
            }
        }
    }

    /// Read the answer to the handshake just sent.
    ///
    /// Late answers to earlier, timed-out handshakes are skipped. `None`
    /// when nothing arrives within the acknowledgment timeout.
    async fn await_handshake_ack(&mut self) -> Option<Ack> {
        let deadline = Instant::now() + self.settings.handshake_ack_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self.transport.await_ack(remaining).await?;
            let ack = Ack::classify(&line);
            if self.handshake.unanswered > 0 && matches!(ack, Ack::Handshake | Ack::Declined) {
                self.handshake.unanswered -= 1;
                tracing::warn!(
                    ack = ?ack,
                    still_unanswered = self.handshake.unanswered,
                    "Discarding stale acknowledgment of an earlier handshake"
                );
                continue;
            }
            return Some(ack);
        }
    }

    fn accept_handshake(&mut self) {
        self.pending = 0;
        self.handshake.consecutive_failures = 0;
        if self.state == CoordinatorState::HandshakePending {
            self.state = CoordinatorState::Streaming;
        }
    }

    fn fail(&mut self, err: CdcWireError) -> CdcWireError {
        tracing::error!(endpoint = %self.transport.endpoint(), "{}", err);
        self.state = CoordinatorState::Failed;
        err
    }

    fn ensure_not_failed(&self) -> Result<()> {
        if self.state == CoordinatorState::Failed {
            return Err(CdcWireError::Failed {
                endpoint: self.transport.endpoint().to_string(),
            });
        }
        Ok(())
    }
}
