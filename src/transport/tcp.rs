//! TCP channel to the consumer.
//!
//! Connecting retries in a bounded loop: each dial gets [`DIAL_TIMEOUT`],
//! failed dials are spaced by [`POLL_INTERVAL`], progress is logged every
//! [`PROGRESS_INTERVAL`], and the whole loop gives up after the configured
//! connect timeout. A shutdown token interrupts the loop at any point.
//!
//! The read half carries single-line acknowledgments from acknowledging
//! consumers. Reads are bounded by a timeout and a timeout is not an error.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CdcWireError, Result};
use crate::writer::RecordWriter;

/// Per-attempt dial timeout.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between failed dials.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often to report that we are still waiting.
pub(crate) const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Parsed `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpEndpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl TcpEndpoint {
    /// Parse `host:port`. IPv6 hosts may be bracketed.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || {
            CdcWireError::Config(format!(
                "Endpoint '{}' is invalid, should be of format <host_name_or_ip>:<port>",
                input
            ))
        };
        let (host, port) = input.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() || (host.contains(':') && !input.contains('[')) {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for TcpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connect, retrying until `timeout` elapses or `shutdown` fires.
pub(crate) async fn connect(
    endpoint: &TcpEndpoint,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<TcpStream> {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut last_progress = start;
    let cancelled = || CdcWireError::Cancelled {
        endpoint: endpoint.to_string(),
    };

    loop {
        let dial = tokio::time::timeout(
            DIAL_TIMEOUT,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        );
        let reason = tokio::select! {
            _ = shutdown.cancelled() => return Err(cancelled()),
            outcome = dial => match outcome {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not disable Nagle on {}: {}", endpoint, e);
                    }
                    return Ok(stream);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("dial timed out after {:?}", DIAL_TIMEOUT),
            },
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(CdcWireError::Connect {
                endpoint: endpoint.to_string(),
                waited_secs: now.duration_since(start).as_secs(),
                reason,
            });
        }
        if now.duration_since(last_progress) >= PROGRESS_INTERVAL {
            tracing::info!(
                endpoint = %endpoint,
                remaining_secs = deadline.duration_since(now).as_secs(),
                last_error = %reason,
                "Waiting for server connection"
            );
            last_progress = now;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Connected TCP channel.
#[derive(Debug)]
pub struct TcpChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: RecordWriter<OwnedWriteHalf>,
    /// Bytes of an acknowledgment line read before a timeout hit.
    partial: Vec<u8>,
}

impl TcpChannel {
    /// Wrap a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: RecordWriter::new(write_half),
            partial: Vec::new(),
        }
    }

    /// The record writer over the write half.
    pub fn writer(&mut self) -> &mut RecordWriter<OwnedWriteHalf> {
        &mut self.writer
    }

    /// Whether an earlier write failure broke the stream.
    pub fn is_broken(&self) -> bool {
        self.writer.is_poisoned()
    }

    /// Read one acknowledgment line, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout, end of stream or read error. A line cut
    /// short by the timeout is kept and completed by the next call.
    pub async fn read_line(&mut self, timeout: Duration) -> Option<String> {
        // read_until keeps partial bytes in `partial` when the timeout cancels it.
        let read = self.reader.read_until(b'\n', &mut self.partial);
        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(0)) => {
                tracing::debug!("Feedback channel closed by server");
                None
            }
            Ok(Ok(_)) => {
                let line = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&line);
                Some(line.trim_end_matches(['\r', '\n']).to_string())
            }
            Ok(Err(e)) => {
                tracing::warn!("Feedback not received from server, message: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}
