//! Buffering shipper: accumulates formatted entries and flushes them as one
//! batch when the buffer fills, when the flush timer fires, on demand, or at
//! shutdown.
//!
//! Delivery is best effort. A flush snapshots and clears the buffer before
//! the network call, and a batch whose push fails is dropped, not requeued.
//! Failures are reported on the [`DIAGNOSTICS_TARGET`] tracing target and in
//! the returned [`FlushOutcome`]; they never surface as errors to producers.
//!
//! At most one flush is in flight per shipper. Size-triggered flushes queue
//! behind it; timer ticks that find one in flight are skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::batch::BatchFormatter;
use crate::client::{ClientError, Transport};
use crate::config::Config;
use crate::entry::{LogEntry, LogRecord};

/// Tracing target for the shipper's own operational diagnostics.
pub const DIAGNOSTICS_TARGET: &str = "oci_log_shipper::diagnostics";

/// Configuration for the shipper.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Number of entries that triggers a flush
    pub buffer_size: usize,

    /// Period of the timer-driven flush
    pub flush_interval: Duration,

    /// Upper bound on the final flush at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ShipperConfig {
    pub fn new(buffer_size: usize, flush_interval: Duration) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            flush_interval,
            ..Self::default()
        }
    }
}

impl From<&Config> for ShipperConfig {
    fn from(config: &Config) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            flush_interval: config.flush_interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Statistics about shipper operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipperStats {
    /// Records accepted into the buffer
    pub entries_received: u64,

    /// Entries in batches answered with 200
    pub entries_delivered: u64,

    /// Entries lost to failed pushes, timeouts or `clear`
    pub entries_dropped: u64,

    pub size_flushes: u64,
    pub interval_flushes: u64,
    pub manual_flushes: u64,
    pub shutdown_flushes: u64,

    /// Flushes whose batch was dropped
    pub failed_flushes: u64,
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Manual,
    Shutdown,
    /// Direct batch send bypassing the buffer
    Direct,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Direct => "direct",
        }
    }
}

/// Why a batch was dropped.
#[derive(Debug)]
pub enum DeliveryFailure {
    /// The endpoint answered with something other than 200
    Rejected { status: StatusCode, body: String },

    /// The push never produced a response
    Transport(ClientError),
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Rejected { status, body } => {
                write!(f, "rejected with status {}: {}", status, body)
            }
            DeliveryFailure::Transport(e) => write!(f, "{}", e),
        }
    }
}

/// Result of a flush attempt.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing to send; no network call was made
    Empty,

    /// The batch was accepted
    Delivered { entries: usize },

    /// The batch was lost
    Dropped {
        entries: usize,
        reason: DeliveryFailure,
    },

    /// The shutdown flush did not finish within `shutdown_timeout`; the
    /// entries it was responsible for are lost
    TimedOut { entries: usize },
}

impl FlushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, FlushOutcome::Delivered { .. })
    }

    /// Whether the flush lost entries.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FlushOutcome::Dropped { .. } | FlushOutcome::TimedOut { .. }
        )
    }
}

/// Errors returned to producers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Shipper has been shut down")]
    Closed,
}

#[derive(Debug, Default)]
struct ShipperState {
    buffer: Vec<LogEntry>,
    stats: ShipperStats,
    /// Set once by `shutdown`; appends are refused afterwards
    closed: bool,
}

/// Buffers log entries and ships them through a [`Transport`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use oci_log_shipper::batch::BatchFormatter;
/// use oci_log_shipper::client::LogClient;
/// use oci_log_shipper::config::Config;
/// use oci_log_shipper::entry::{LogLevel, LogRecord};
/// use oci_log_shipper::shipper::{Shipper, ShipperConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::from_env().expect("Failed to load config");
///     let client = LogClient::new(&config).expect("Failed to create client");
///     let shipper = Arc::new(Shipper::new(
///         client,
///         BatchFormatter::from_config(&config),
///         ShipperConfig::from(&config),
///     ));
///
///     let timer = shipper.spawn_interval_flush();
///     shipper.enqueue(LogRecord::new(LogLevel::Info, "hello")).await.ok();
///
///     shipper.shutdown().await;
///     timer.await.ok();
/// }
/// ```
pub struct Shipper<T> {
    transport: T,
    formatter: BatchFormatter,
    config: ShipperConfig,
    state: Mutex<ShipperState>,
    /// Held for the duration of a push; at most one flush in flight
    in_flight: Mutex<()>,
    /// Mirrors `ShipperState::closed` for the flush timer
    closed_tx: watch::Sender<bool>,
}

impl<T: Transport> Shipper<T> {
    pub fn new(transport: T, formatter: BatchFormatter, config: ShipperConfig) -> Self {
        let state = ShipperState {
            buffer: Vec::with_capacity(config.buffer_size),
            ..ShipperState::default()
        };
        let (closed_tx, _) = watch::channel(false);

        Self {
            transport,
            formatter,
            config,
            state: Mutex::new(state),
            in_flight: Mutex::new(()),
            closed_tx,
        }
    }

    /// Format a record and append it to the buffer.
    ///
    /// When the append fills the buffer, the flush runs before this returns.
    /// A failed flush is not an error here.
    pub async fn enqueue(&self, record: LogRecord) -> Result<(), BufferError> {
        let entry = self
            .formatter
            .format_entry(record.level, &record.message, &record.context);

        let full = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(BufferError::Closed);
            }
            state.stats.entries_received += 1;
            state.buffer.push(entry);
            state.buffer.len() >= self.config.buffer_size
        };

        if full {
            self.flush_with(FlushTrigger::Size).await;
        }

        Ok(())
    }

    /// Flush whatever is buffered now.
    pub async fn flush(&self) -> FlushOutcome {
        self.flush_with(FlushTrigger::Manual).await
    }

    /// Format and push `records` as one batch right away, bypassing the buffer.
    ///
    /// Refused with `BufferError::Closed` after shutdown, like `enqueue`.
    pub async fn ship_batch(&self, records: Vec<LogRecord>) -> Result<FlushOutcome, BufferError> {
        let entries: Vec<LogEntry> = records
            .iter()
            .map(|r| self.formatter.format_entry(r.level, &r.message, &r.context))
            .collect();

        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(BufferError::Closed);
            }
            if entries.is_empty() {
                return Ok(FlushOutcome::Empty);
            }
            state.stats.entries_received += entries.len() as u64;
        }

        let _in_flight = self.in_flight.lock().await;
        Ok(self.deliver(entries, FlushTrigger::Direct).await)
    }

    /// Close the shipper and make the one final flush, bounded by
    /// `shutdown_timeout`.
    ///
    /// Only the first call flushes; later calls return `Empty`. Every
    /// `enqueue` that returned `Ok` before the close is part of this flush or
    /// an earlier one. On timeout the remaining entries are discarded and
    /// counted as dropped.
    pub async fn shutdown(&self) -> FlushOutcome {
        let buffered = {
            let mut state = self.state.lock().await;
            if state.closed {
                return FlushOutcome::Empty;
            }
            state.closed = true;
            state.buffer.len()
        };
        self.closed_tx.send_replace(true);

        info!(
            target: DIAGNOSTICS_TARGET,
            buffered,
            "Shutting down shipper, flushing remaining entries"
        );

        // Entries handed to the push; lost with it if the timeout hits.
        let taken = AtomicUsize::new(0);
        let final_flush = async {
            let _in_flight = self.in_flight.lock().await;
            let Some(entries) = self.take_buffer(FlushTrigger::Shutdown).await else {
                return FlushOutcome::Empty;
            };
            taken.store(entries.len(), Ordering::Release);
            self.deliver(entries, FlushTrigger::Shutdown).await
        };

        match tokio::time::timeout(self.config.shutdown_timeout, final_flush).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let mut state = self.state.lock().await;
                let lost = taken.load(Ordering::Acquire) + state.buffer.len();
                state.buffer.clear();
                state.stats.entries_dropped += lost as u64;
                state.stats.failed_flushes += 1;

                warn!(
                    target: DIAGNOSTICS_TARGET,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    entries = lost,
                    "Shutdown flush timed out, remaining entries lost"
                );
                FlushOutcome::TimedOut { entries: lost }
            }
        }
    }

    /// Discard buffered entries without sending them.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let discarded = state.buffer.len();
        state.buffer.clear();
        state.stats.entries_dropped += discarded as u64;
        discarded
    }

    /// Number of entries waiting for the next flush.
    pub async fn buffered_len(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    pub async fn stats(&self) -> ShipperStats {
        self.state.lock().await.stats.clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    async fn flush_with(&self, trigger: FlushTrigger) -> FlushOutcome {
        let _in_flight = match trigger {
            FlushTrigger::Interval => match self.in_flight.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("Flush already in flight, skipping interval flush");
                    return FlushOutcome::Empty;
                }
            },
            _ => self.in_flight.lock().await,
        };

        match self.take_buffer(trigger).await {
            Some(entries) => self.deliver(entries, trigger).await,
            None => FlushOutcome::Empty,
        }
    }

    /// Snapshot and clear the buffer. Caller holds `in_flight`.
    async fn take_buffer(&self, trigger: FlushTrigger) -> Option<Vec<LogEntry>> {
        let mut state = self.state.lock().await;

        // A queued size flush may find the buffer already drained.
        if trigger == FlushTrigger::Size && state.buffer.len() < self.config.buffer_size {
            return None;
        }
        if state.buffer.is_empty() {
            return None;
        }

        match trigger {
            FlushTrigger::Size => state.stats.size_flushes += 1,
            FlushTrigger::Interval => state.stats.interval_flushes += 1,
            FlushTrigger::Manual => state.stats.manual_flushes += 1,
            FlushTrigger::Shutdown => state.stats.shutdown_flushes += 1,
            FlushTrigger::Direct => {}
        }

        Some(std::mem::replace(
            &mut state.buffer,
            Vec::with_capacity(self.config.buffer_size),
        ))
    }

    /// Push one batch and record the result. Caller holds `in_flight`.
    async fn deliver(&self, entries: Vec<LogEntry>, trigger: FlushTrigger) -> FlushOutcome {
        let count = entries.len();
        let envelope = self.formatter.wrap(entries);

        debug!(entries = count, trigger = trigger.as_str(), "Flushing buffer");

        let outcome = match self.transport.push(&envelope).await {
            Ok(response) if response.is_success() => FlushOutcome::Delivered { entries: count },
            Ok(response) => FlushOutcome::Dropped {
                entries: count,
                reason: DeliveryFailure::Rejected {
                    status: response.status,
                    body: response.body,
                },
            },
            Err(e) => FlushOutcome::Dropped {
                entries: count,
                reason: DeliveryFailure::Transport(e),
            },
        };

        let mut state = self.state.lock().await;
        match &outcome {
            FlushOutcome::Delivered { entries } => {
                state.stats.entries_delivered += *entries as u64;
                debug!(entries = *entries, trigger = trigger.as_str(), "Batch delivered");
            }
            FlushOutcome::Dropped { entries, reason } => {
                state.stats.entries_dropped += *entries as u64;
                state.stats.failed_flushes += 1;
                match reason {
                    DeliveryFailure::Rejected { status, body } => warn!(
                        target: DIAGNOSTICS_TARGET,
                        status = status.as_u16(),
                        response = %body,
                        entries = *entries,
                        trigger = trigger.as_str(),
                        "Batch rejected by endpoint, dropping entries"
                    ),
                    DeliveryFailure::Transport(e) => error!(
                        target: DIAGNOSTICS_TARGET,
                        error = %e,
                        entries = *entries,
                        trigger = trigger.as_str(),
                        "Failed to push batch, dropping entries"
                    ),
                }
            }
            FlushOutcome::Empty | FlushOutcome::TimedOut { .. } => {}
        }

        outcome
    }
}

impl<T: Transport + 'static> Shipper<T> {
    /// Spawn the timer-driven flush.
    ///
    /// Ticks every `flush_interval` and flushes a non-empty buffer. The task
    /// ends as soon as the shipper is shut down, without waiting for the next
    /// tick.
    pub fn spawn_interval_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let shipper = Arc::clone(self);
        let mut closed = self.closed_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(shipper.config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                if *closed.borrow_and_update() {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        shipper.flush_with(FlushTrigger::Interval).await;
                    }
                    _ = closed.changed() => {}
                }
            }

            debug!("Shipper closed, stopping interval flush");
        })
    }
}
