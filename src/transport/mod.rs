//! Transport module - the single downstream channel.
//!
//! Provides one [`Transport`] over:
//! - TCP, plain (`tcpsource`) or acknowledgment-enforcing (`cdcsource`)
//! - Named pipes (fifo on Unix, pipe client on Windows)
//! - A null sink that discards everything
//!
//! ```text
//!  Coordinator ──write(Record)──► RecordWriter ──► socket / pipe / nothing
//!       ▲                                              │
//!       └──────────── await_ack(timeout) ◄─────────────┘  (TCP only)
//! ```
//!
//! Write and flush failures are returned once and never retried; the
//! transport is then reported unhealthy.

mod pipe;
mod tcp;

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{OutputType, Settings};
use crate::error::{CdcWireError, Result};
use crate::protocol::{now_timestamp, Ack, Record, Separators};

pub use pipe::{PipeChannel, PipeWriter};
pub use tcp::{TcpChannel, TcpEndpoint};

use tcp::connect;

#[derive(Debug)]
enum Channel {
    Tcp(TcpChannel),
    Pipe(PipeChannel),
    Null,
    Closed,
}

/// Open downstream channel.
#[derive(Debug)]
pub struct Transport {
    kind: OutputType,
    endpoint: String,
    separators: Separators,
    channel: Channel,
}

impl Transport {
    /// Open the channel described by `settings`.
    ///
    /// TCP connects with bounded retry; acknowledging consumers must then
    /// report readiness. Every TCP session starts with an init record.
    /// `shutdown` aborts the connect and readiness waits.
    pub async fn open(settings: &Settings, shutdown: &CancellationToken) -> Result<Self> {
        let kind = settings.output_type;
        let channel = match kind {
            OutputType::TcpSource | OutputType::CdcSource => {
                let endpoint = TcpEndpoint::parse(&settings.endpoint)?;
                tracing::info!(endpoint = %endpoint, output_type = %kind, "Connecting to server");
                let stream = connect(&endpoint, settings.connect_timeout(), shutdown).await?;
                tracing::info!(endpoint = %endpoint, "Connection to server established");
                Channel::Tcp(TcpChannel::new(stream))
            }
            OutputType::NamedPipe => Channel::Pipe(PipeChannel::open(&settings.endpoint).await?),
            OutputType::Null => {
                tracing::info!("Output is discarded (null transport)");
                Channel::Null
            }
        };

        let mut transport = Self {
            kind,
            endpoint: settings.endpoint.clone(),
            separators: settings.separators(),
            channel,
        };

        if kind.is_enforcing() {
            transport
                .await_ready(settings.ready_timeout(), shutdown)
                .await?;
        }
        if kind.is_tcp() {
            transport
                .write(&Record::Init {
                    timestamp: now_timestamp(),
                })
                .await?;
            transport.flush().await?;
        }
        Ok(transport)
    }

    /// A transport that discards everything.
    pub fn null() -> Self {
        Self {
            kind: OutputType::Null,
            endpoint: String::new(),
            separators: Separators::default(),
            channel: Channel::Null,
        }
    }

    /// Encode and queue one record.
    pub async fn write(&mut self, record: &Record) -> Result<()> {
        let line = record.encode(&self.separators);
        tracing::debug!(record = ?line, "Sending");
        let outcome = match &mut self.channel {
            Channel::Tcp(tcp) => tcp.writer().write_record(line.as_bytes()).await,
            Channel::Pipe(pipe) => pipe.writer().write_record(line.as_bytes()).await,
            Channel::Null => Ok(()),
            Channel::Closed => Err(closed_error()),
        };
        outcome.map_err(|source| {
            tracing::error!(endpoint = %self.endpoint, "Error while writing record: {}", source);
            CdcWireError::Write {
                endpoint: self.endpoint.clone(),
                source,
            }
        })
    }

    /// Push queued records out of the process.
    pub async fn flush(&mut self) -> Result<()> {
        let outcome = match &mut self.channel {
            Channel::Tcp(tcp) => tcp.writer().flush().await,
            Channel::Pipe(pipe) => pipe.writer().flush().await,
            Channel::Null => Ok(()),
            Channel::Closed => Err(closed_error()),
        };
        outcome.map_err(|source| {
            tracing::error!(endpoint = %self.endpoint, "Error while flushing output: {}", source);
            CdcWireError::Flush {
                endpoint: self.endpoint.clone(),
                source,
            }
        })
    }

    /// Wait up to `timeout` for one acknowledgment line.
    ///
    /// `None` on timeout, end of stream or a channel without a read side.
    pub async fn await_ack(&mut self, timeout: Duration) -> Option<String> {
        match &mut self.channel {
            Channel::Tcp(tcp) => tcp.read_line(timeout).await,
            _ => None,
        }
    }

    /// Flush and release the channel. Never fails; safe to call twice.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.channel, Channel::Closed) {
            Channel::Tcp(mut tcp) => {
                let writer = tcp.writer();
                if let Err(e) = writer.shutdown().await {
                    tracing::warn!(endpoint = %self.endpoint, "Error while closing connection: {}", e);
                }
                tracing::info!(
                    endpoint = %self.endpoint,
                    records = writer.records_written(),
                    bytes = writer.bytes_written(),
                    "Connection closed"
                );
            }
            Channel::Pipe(mut pipe) => {
                let writer = pipe.writer();
                if let Err(e) = writer.shutdown().await {
                    tracing::warn!(endpoint = %self.endpoint, "Error while closing pipe: {}", e);
                }
                tracing::info!(
                    endpoint = %self.endpoint,
                    records = writer.records_written(),
                    bytes = writer.bytes_written(),
                    "Named pipe closed"
                );
            }
            Channel::Null | Channel::Closed => {}
        }
    }

    /// Whether the consumer acknowledges handshakes.
    pub fn is_enforcing(&self) -> bool {
        self.kind.is_enforcing()
    }

    /// False after any write or flush failure, and after close.
    pub fn is_healthy(&self) -> bool {
        match &self.channel {
            Channel::Tcp(tcp) => !tcp.is_broken(),
            Channel::Pipe(pipe) => !pipe.is_broken(),
            Channel::Null => true,
            Channel::Closed => false,
        }
    }

    /// Channel kind.
    pub fn kind(&self) -> OutputType {
        self.kind
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait for the consumer's readiness line.
    async fn await_ready(&mut self, timeout: Duration, shutdown: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let endpoint = self.endpoint.clone();
        let not_ready = || CdcWireError::NotReady {
            endpoint: endpoint.clone(),
            timeout_secs: timeout.as_secs(),
        };
        tracing::info!(endpoint = %endpoint, "Waiting for server to become ready");
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(not_ready());
            }
            let line = tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(CdcWireError::Cancelled { endpoint: endpoint.clone() });
                }
                line = self.await_ack(remaining) => line,
            };
            match line.as_deref().map(Ack::classify) {
                Some(Ack::Ready) => {
                    tracing::info!(endpoint = %endpoint, "Server is ready to receive data");
                    return Ok(());
                }
                Some(other) => {
                    tracing::warn!(ack = ?other, "Unexpected message while waiting for readiness");
                }
                None => return Err(not_ready()),
            }
        }
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "transport is closed")
}
