//! Log records as the host application hands them over, and the formatted
//! entries that end up on the wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Structured context attached to a record.
///
/// Backed by a sorted map so the rendered JSON is stable across runs.
pub type Context = serde_json::Map<String, Value>;

/// Severity levels, lowest to highest (RFC 5424 order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    /// Get all levels in ascending severity.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Notice,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
            LogLevel::Alert,
            LogLevel::Emergency,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Alert => "alert",
            LogLevel::Emergency => "emergency",
        }
    }

    /// Parse a level name, case-insensitively. `warn` and `fatal` are accepted
    /// as aliases for `warning` and `critical`.
    pub fn parse(value: &str) -> Option<LogLevel> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "notice" => Some(LogLevel::Notice),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "critical" | "fatal" => Some(LogLevel::Critical),
            "alert" => Some(LogLevel::Alert),
            "emergency" => Some(LogLevel::Emergency),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw record produced by the host application.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub context: Context,
    /// Processor-added fields, merged into `context` before shipping
    pub extra: Context,
    pub channel: String,
    pub datetime: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            context: Context::new(),
            extra: Context::new(),
            channel: "app".to_string(),
            datetime: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_extra(mut self, extra: Context) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// A single formatted entry as accepted by the ingestion API.
///
/// Immutable once created; `data` is an opaque string on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub time: String,
    pub data: String,
}

impl LogEntry {
    /// Format a record into an entry with a fresh v4 id and the current time.
    ///
    /// `data` is `"<LEVEL>: <message> <context as JSON>"`.
    pub fn format(level: LogLevel, message: &str, context: &Context) -> Self {
        let context_json =
            serde_json::to_string(context).unwrap_or_else(|_| String::from("{}"));

        Self {
            id: Uuid::new_v4().to_string(),
            time: iso8601(Utc::now()),
            data: format!(
                "{}: {} {}",
                level.as_str().to_uppercase(),
                message,
                context_json
            ),
        }
    }
}

/// Render a timestamp the way the ingestion API expects it.
pub fn iso8601(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
