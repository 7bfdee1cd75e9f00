//! Batch envelope construction.
//!
//! The ingestion API takes one or more entry batches per request, each
//! carrying routing metadata (source host, subject, type) next to the
//! entries themselves.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::entry::{iso8601, Context, LogEntry, LogLevel};

/// Envelope schema version understood by the ingestion API.
pub const SPEC_VERSION: &str = "1";

/// Source used when the hostname cannot be determined.
const UNKNOWN_SOURCE: &str = "unknown";

/// Request body for a push call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub specversion: String,

    #[serde(rename = "logEntryBatches")]
    pub log_entry_batches: Vec<LogEntryBatch>,
}

impl BatchEnvelope {
    /// Total number of entries across all batches.
    pub fn len(&self) -> usize {
        self.log_entry_batches.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every entry in order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.log_entry_batches.iter().flat_map(|b| b.entries.iter())
    }
}

/// One batch of entries sharing source, subject and type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntryBatch {
    pub defaultlogentrytime: String,
    pub source: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub entries: Vec<LogEntry>,
}

/// Turns records into entries and entries into envelopes.
#[derive(Debug, Clone)]
pub struct BatchFormatter {
    source: String,
    subject: String,
    entry_type: String,
}

impl BatchFormatter {
    pub fn new(
        source: impl Into<String>,
        subject: impl Into<String>,
        entry_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            subject: subject.into(),
            entry_type: entry_type.into(),
        }
    }

    /// Build a formatter for this host using the configured subject and type.
    pub fn from_config(config: &Config) -> Self {
        Self::new(local_hostname(), &config.subject, &config.entry_type)
    }

    /// Format a single record. See [`LogEntry::format`].
    pub fn format_entry(&self, level: LogLevel, message: &str, context: &Context) -> LogEntry {
        LogEntry::format(level, message, context)
    }

    /// Wrap entries into a fresh envelope stamped with the current time.
    ///
    /// An empty input still yields a well-formed envelope with no entries.
    pub fn wrap(&self, entries: Vec<LogEntry>) -> BatchEnvelope {
        BatchEnvelope {
            specversion: SPEC_VERSION.to_string(),
            log_entry_batches: vec![LogEntryBatch {
                defaultlogentrytime: iso8601(Utc::now()),
                source: self.source.clone(),
                subject: self.subject.clone(),
                entry_type: self.entry_type.clone(),
                entries,
            }],
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Hostname of this machine, or `"unknown"` if it cannot be read.
pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy().into_owned();
            if name.is_empty() {
                UNKNOWN_SOURCE.to_string()
            } else {
                name
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to read hostname, using fallback source");
            UNKNOWN_SOURCE.to_string()
        }
    }
}
