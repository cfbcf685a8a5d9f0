//! Heartbeat timer bounding the time between handshakes.
//!
//! A background task sleeps a fixed tick and adds it to a shared millisecond
//! accumulator. The coordinator reads the accumulator through
//! [`HeartbeatTimer::is_due`] and zeroes it with [`HeartbeatTimer::reset`]
//! after every handshake attempt.
//!
//! The accumulator is the only state shared with the coordinator; it is a
//! single `AtomicU64`, so reads, increments and resets never block.
//!
//! # Example
//!
//! ```ignore
//! let timer = HeartbeatTimer::start(Duration::from_secs(60));
//! if timer.is_due() {
//!     // send handshake
//!     timer.reset();
//! }
//! timer.stop();
//! timer.join().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Accumulator granularity.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Background clock deciding when a timed handshake is due.
#[derive(Debug)]
pub struct HeartbeatTimer {
    elapsed_ms: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    threshold: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatTimer {
    /// Start a timer that becomes due after `threshold`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(threshold: Duration) -> Self {
        Self::with_tick(threshold, DEFAULT_TICK)
    }

    /// Start a timer with a custom tick.
    pub fn with_tick(threshold: Duration, tick: Duration) -> Self {
        let elapsed_ms = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tracing::debug!(
            threshold_secs = threshold.as_secs_f64(),
            "Timer started, handshake with target will be done at least this often"
        );

        let task = tokio::spawn(tick_loop(
            elapsed_ms.clone(),
            stopped.clone(),
            cancel.clone(),
            tick,
        ));

        Self {
            elapsed_ms,
            stopped,
            threshold,
            cancel,
            task: Some(task),
        }
    }

    /// Whether the handshake interval has been reached.
    #[inline]
    pub fn is_due(&self) -> bool {
        self.elapsed() >= self.threshold
    }

    /// Time accumulated since the last reset.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::Acquire))
    }

    /// Zero the accumulator.
    #[inline]
    pub fn reset(&self) {
        self.elapsed_ms.store(0, Ordering::Release);
    }

    /// Configured handshake interval.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Ask the background task to stop.
    ///
    /// The task notices within one tick. Use [`join`](Self::join) to wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the background task has exited.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop and wait for the background task to exit.
    pub async fn join(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Heartbeat task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn tick_loop(
    elapsed_ms: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    cancel: CancellationToken,
    tick: Duration,
) {
    let tick_ms = tick.as_millis() as u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(tick) => {
                elapsed_ms.fetch_add(tick_ms, Ordering::AcqRel);
            }
        }
    }
    stopped.store(true, Ordering::Release);
    tracing::debug!("Heartbeat timer stopped");
}
