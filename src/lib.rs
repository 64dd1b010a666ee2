//! Telemetry Forwarder Library
//!
//! This library provides components for durable sensor-to-InfluxDB
//! telemetry forwarding:
//!
//! - **config**: Environment-based configuration for the forwarder
//! - **point**: The time-series data model (points and batches)
//! - **sensor**: 1-Wire, DHT, and remote-API probes
//! - **sink**: InfluxDB 1.x client with ensure-database and ping on connect
//! - **journal**: Durable local fallback log with flush reconciliation
//! - **collector**: The polling/write/degrade cycle state machine
//! - **health**: Passive TCP liveness listener
//!
//! # Example
//!
//! ```no_run
//! use telemetry_forwarder::collector::Collector;
//! use telemetry_forwarder::config::Config;
//! use telemetry_forwarder::journal::Journal;
//! use telemetry_forwarder::sensor::AirProbe;
//! use telemetry_forwarder::sink::SinkConnection;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let journal = Journal::new(config.journal_path.clone());
//!
//!     // A startup connect failure is not fatal; the collector
//!     // reconnects lazily and journals in the meantime.
//!     let sink = SinkConnection::connect(&config).await.ok();
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let collector = Collector::new(config, None, AirProbe::Disabled, journal, sink);
//!     collector.run(shutdown_rx).await;
//! }
//! ```

// Module declarations
pub mod collector;
pub mod config;
pub mod health;
pub mod journal;
pub mod point;
pub mod sensor;
pub mod sink;

// Re-export commonly used types at crate root for convenience
pub use collector::{Collector, CollectorStats};
pub use config::{AirSource, Config, ConfigError};
pub use journal::{Journal, JournalError};
pub use point::{Batch, Measurement, Point, PointFields};
pub use sensor::{
    AirProbe, AirReading, ApiProbe, DhtDriver, DhtFault, DhtReading, GpioProbe, IioDhtDriver,
    OneWireProbe, SensorError, Unit,
};
pub use sink::{SinkConnection, SinkError};
