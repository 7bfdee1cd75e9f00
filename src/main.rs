//! OCI Log Shipper - Ships log lines from stdin to OCI Logging
//!
//! This service reads log records from standard input, buffers them, and
//! batch-pushes them to the OCI Logging ingestion API with signed requests.
//!
//! ## Input
//!
//! One record per line. A JSON object with a `message` field is read as a
//! structured record with optional `level`, `context` and `channel`:
//!
//! ```text
//! {"level":"error","message":"Payment failed","context":{"order_id":456}}
//! ```
//!
//! Any other non-empty line is shipped as an `info` record.
//!
//! ## Features
//!
//! - Size-based and time-based buffer flushing
//! - RSA-SHA256 signed requests
//! - Graceful shutdown on EOF or SIGINT with a bounded final flush
//!
//! ## Configuration
//!
//! Configuration is loaded from `OCI_LOGS_*` environment variables, see
//! [`oci_log_shipper::config`]. `RUST_LOG` filters the shipper's own
//! diagnostics (default: info), which go to stderr.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oci_log_shipper::batch::BatchFormatter;
use oci_log_shipper::client::LogClient;
use oci_log_shipper::config::Config;
use oci_log_shipper::entry::{LogLevel, LogRecord};
use oci_log_shipper::handler::LogHandler;
use oci_log_shipper::shipper::{FlushOutcome, Shipper, ShipperConfig};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting OCI Log Shipper...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            let summary = config.summary();
            info!(
                endpoint = %summary.endpoint,
                log_id = %summary.log_id,
                region = %summary.region,
                buffer_size = config.buffer_size,
                flush_interval_secs = config.flush_interval.as_secs(),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Create signed HTTP client; a bad private key fails here
    let client = match LogClient::new(&config) {
        Ok(client) => {
            info!(
                endpoint = %client.endpoint(),
                key_id = %client.signer().key_id(),
                "HTTP client initialized"
            );
            client
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let shipper = Arc::new(Shipper::new(
        client,
        BatchFormatter::from_config(&config),
        ShipperConfig::from(&config),
    ));
    let timer_handle = shipper.spawn_interval_flush();
    let handler = LogHandler::from_config(Arc::clone(&shipper), &config);

    info!("OCI Log Shipper running. Reading records from stdin, Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut records_read: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(record) = parse_line(&line) {
                        records_read += 1;
                        handler.handle(record).await;
                    }
                }
                Ok(None) => {
                    info!("Input closed, stopping...");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from stdin, stopping...");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received, stopping..."),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
                break;
            }
        }
    }

    // Graceful shutdown
    info!(records_read, "Initiating graceful shutdown...");

    match shipper.shutdown().await {
        FlushOutcome::Empty => info!("Nothing left to flush"),
        FlushOutcome::Delivered { entries } => info!(entries, "Final batch delivered"),
        FlushOutcome::Dropped { entries, reason } => {
            warn!(entries, reason = %reason, "Final batch dropped")
        }
        FlushOutcome::TimedOut { entries } => warn!(entries, "Final flush timed out"),
    }

    if let Err(e) = timer_handle.await {
        warn!(error = %e, "Flush timer task panicked during shutdown");
    }

    let stats = shipper.stats().await;
    info!(
        received = stats.entries_received,
        delivered = stats.entries_delivered,
        dropped = stats.entries_dropped,
        failed_flushes = stats.failed_flushes,
        "OCI Log Shipper stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Turn one input line into a record. Blank lines yield `None`.
fn parse_line(line: &str) -> Option<LogRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(Value::String(message)) = object.remove("message") {
            let level = object
                .get("level")
                .and_then(Value::as_str)
                .and_then(LogLevel::parse)
                .unwrap_or(LogLevel::Info);

            let mut record = LogRecord::new(level, message);
            if let Some(Value::Object(context)) = object.remove("context") {
                record = record.with_context(context);
            }
            if let Some(Value::String(channel)) = object.remove("channel") {
                record = record.with_channel(channel);
            }
            return Some(record);
        }
    }

    Some(LogRecord::new(LogLevel::Info, trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_line() {
        let record = parse_line("  service started  ").unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.message, "service started");
        assert!(record.context.is_empty());
        assert_eq!(record.channel, "app");
    }

    #[test]
    fn test_parse_blank_line() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \t").is_none());
    }

    #[test]
    fn test_parse_structured_line() {
        let record = parse_line(
            r#"{"level":"error","message":"Payment failed","context":{"order_id":456},"channel":"billing"}"#,
        )
        .unwrap();

        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "Payment failed");
        assert_eq!(record.context["order_id"], json!(456));
        assert_eq!(record.channel, "billing");
    }

    #[test]
    fn test_parse_structured_defaults() {
        let record = parse_line(r#"{"message":"hi","level":"bogus"}"#).unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.message, "hi");
        assert!(record.context.is_empty());
    }

    #[test]
    fn test_parse_json_without_message_is_plain() {
        let line = r#"{"msg":"not ours"}"#;
        let record = parse_line(line).unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.message, line);

        let record = parse_line("[1, 2, 3]").unwrap();
        assert_eq!(record.message, "[1, 2, 3]");
    }
}
