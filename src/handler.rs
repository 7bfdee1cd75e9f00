//! Host-facing handler: level filtering, bubbling and context enrichment in
//! front of a shared [`Shipper`].

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::client::Transport;
use crate::config::Config;
use crate::entry::{Context, LogLevel, LogRecord};
use crate::shipper::{BufferError, FlushOutcome, Shipper, DIAGNOSTICS_TARGET};

/// Timestamp layout of the `formatted_timestamp` context field.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whether a record should continue to the next handler in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

/// Accepts records at or above `min_level` and hands them to the shipper.
pub struct LogHandler<T> {
    shipper: Arc<Shipper<T>>,
    min_level: LogLevel,
    bubble: bool,
}

impl<T: Transport> LogHandler<T> {
    pub fn new(shipper: Arc<Shipper<T>>, min_level: LogLevel, bubble: bool) -> Self {
        Self {
            shipper,
            min_level,
            bubble,
        }
    }

    /// Use the configured level and bubble flag.
    pub fn from_config(shipper: Arc<Shipper<T>>, config: &Config) -> Self {
        Self::new(shipper, config.level, config.bubble)
    }

    pub fn is_handling(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Enrich and enqueue a record.
    ///
    /// Records below the minimum level pass through untouched. A record that
    /// cannot be enqueued because the shipper is closed is reported as a
    /// diagnostic and otherwise treated as handled.
    pub async fn handle(&self, record: LogRecord) -> Propagation {
        if !self.is_handling(record.level) {
            return Propagation::Continue;
        }

        let record = enrich(record);
        if let Err(e) = self.shipper.enqueue(record).await {
            warn!(target: DIAGNOSTICS_TARGET, error = %e, "Dropping record");
        }

        if self.bubble {
            Propagation::Continue
        } else {
            Propagation::Stop
        }
    }

    /// Enrich the handled records and push them as one batch immediately.
    ///
    /// Fails with `BufferError::Closed` once the shipper is shut down.
    pub async fn handle_batch(&self, records: Vec<LogRecord>) -> Result<FlushOutcome, BufferError> {
        let records: Vec<LogRecord> = records
            .into_iter()
            .filter(|r| self.is_handling(r.level))
            .map(enrich)
            .collect();

        self.shipper.ship_batch(records).await
    }

    pub fn shipper(&self) -> &Arc<Shipper<T>> {
        &self.shipper
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn bubble(&self) -> bool {
        self.bubble
    }
}

/// Merge `extra` into `context` and stamp channel, timestamp and pid.
fn enrich(mut record: LogRecord) -> LogRecord {
    let mut context: Context = std::mem::take(&mut record.context);
    context.extend(std::mem::take(&mut record.extra));

    context.insert("channel".to_string(), Value::String(record.channel.clone()));
    context.insert(
        "formatted_timestamp".to_string(),
        Value::String(record.datetime.format(TIMESTAMP_FORMAT).to_string()),
    );
    context.insert(
        "process_id".to_string(),
        Value::from(std::process::id()),
    );

    record.context = context;
    record
}
