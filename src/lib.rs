//! OCI Log Shipper Library
//!
//! This library buffers application log records and ships them in batches
//! to the OCI Logging ingestion API over signed HTTP requests:
//!
//! - **config**: Environment-based configuration and signing identity
//! - **signer**: RSA-SHA256 HTTP request signing
//! - **entry**: Log levels, raw records and formatted entries
//! - **batch**: Batch envelope construction
//! - **client**: Signed HTTP transport to the ingestion endpoint
//! - **shipper**: Buffering with size, time, manual and shutdown flushes
//! - **handler**: Level filtering and context enrichment for host applications
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oci_log_shipper::batch::BatchFormatter;
//! use oci_log_shipper::client::LogClient;
//! use oci_log_shipper::config::Config;
//! use oci_log_shipper::entry::{LogLevel, LogRecord};
//! use oci_log_shipper::handler::LogHandler;
//! use oci_log_shipper::shipper::{Shipper, ShipperConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Create signed HTTP client
//!     let client = LogClient::new(&config).expect("Failed to create client");
//!
//!     // Create shipper and start the periodic flush
//!     let shipper = Arc::new(Shipper::new(
//!         client,
//!         BatchFormatter::from_config(&config),
//!         ShipperConfig::from(&config),
//!     ));
//!     let timer = shipper.spawn_interval_flush();
//!
//!     // Hand records over through the handler
//!     let handler = LogHandler::from_config(Arc::clone(&shipper), &config);
//!     handler.handle(LogRecord::new(LogLevel::Info, "User logged in")).await;
//!
//!     // Flush what is left before exiting
//!     shipper.shutdown().await;
//!     timer.await.ok();
//! }
//! ```

// Module declarations
pub mod batch;
pub mod client;
pub mod config;
pub mod entry;
pub mod handler;
pub mod shipper;
pub mod signer;

// Re-export commonly used types at crate root for convenience
pub use batch::{BatchEnvelope, BatchFormatter, LogEntryBatch};
pub use client::{ClientError, HttpOutcome, LogClient, Transport};
pub use config::{Config, ConfigError};
pub use entry::{Context, LogEntry, LogLevel, LogRecord};
pub use handler::{LogHandler, Propagation};
pub use shipper::{
    BufferError, DeliveryFailure, FlushOutcome, Shipper, ShipperConfig, ShipperStats,
    DIAGNOSTICS_TARGET,
};
pub use signer::{Identity, RequestSigner, SigningError};
