//! Telemetry Forwarder - durable sensor-to-InfluxDB pipeline
//!
//! This service polls local temperature/humidity probes on a fixed
//! interval and writes the readings to InfluxDB. When the database is
//! unreachable it degrades to a durable local journal and reconciles it
//! automatically once connectivity returns.
//!
//! ## Features
//!
//! - 1-Wire, DHT (IIO), and remote-API sensor sources
//! - Journal fallback with flush-before-fresh-data ordering
//! - One reconnect-and-retry per failed write, then degrade
//! - Passive TCP liveness endpoint for external monitoring
//! - Graceful shutdown on SIGINT with deterministic probe release
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables; see the library's
//! `config::Config` docs for the full list. `RUST_LOG` controls the
//! logging filter (default: info).

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_forwarder::collector::Collector;
use telemetry_forwarder::config::{AirSource, Config};
use telemetry_forwarder::health;
use telemetry_forwarder::journal::Journal;
use telemetry_forwarder::sensor::{AirProbe, ApiProbe, GpioProbe, IioDhtDriver, OneWireProbe};
use telemetry_forwarder::sink::SinkConnection;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting telemetry forwarder...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                influx_url = %config.influx_url,
                database = %config.database,
                poll_interval_secs = config.poll_interval.as_secs(),
                health_port = config.health_port,
                air_source = ?config.air_source,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // A forwarder with nothing to poll would spin uselessly; this is the
    // only runtime error class that terminates the process.
    if !config.has_sensor_source() {
        error!(
            "no sensor sources configured; set TELEMETRY_FORWARDER_W1_DEVICE \
             or TELEMETRY_FORWARDER_AIR_SOURCE"
        );
        std::process::exit(1);
    }

    // Build the configured probes
    let water = config
        .w1_device
        .clone()
        .map(|device| OneWireProbe::new(device, config.unit));
    let air = match &config.air_source {
        AirSource::Api { url } => match ApiProbe::new(url.clone(), config.request_timeout) {
            Ok(probe) => AirProbe::Api(probe),
            Err(e) => {
                error!(error = %e, "Failed to create API probe");
                std::process::exit(1);
            }
        },
        AirSource::Dht { device } => {
            let driver = IioDhtDriver::new(device.clone());
            AirProbe::Dht(GpioProbe::new(Box::new(driver), config.unit))
        }
        AirSource::Disabled => AirProbe::Disabled,
    };

    // Bind the liveness listener before anything can block
    let listener = match health::bind(config.health_port).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port = config.health_port, error = %e, "Failed to bind health listener");
            std::process::exit(1);
        }
    };
    let health_handle = tokio::spawn(health::serve(listener));

    // Initial sink connect; failure here is degraded, not fatal
    let sink = match SinkConnection::connect(&config).await {
        Ok(conn) => {
            info!(database = conn.database(), "Connected to InfluxDB");
            Some(conn)
        }
        Err(e) => {
            warn!(error = %e, "InfluxDB unreachable at startup; journaling until it returns");
            None
        }
    };

    let journal = Journal::new(config.journal_path.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = Collector::new(config, water, air, journal, sink);
    let collector_handle = tokio::spawn(collector.run(shutdown_rx));

    // Wait for shutdown signal
    info!("Telemetry forwarder running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    }

    // Graceful shutdown: let an in-flight cycle finish, bounded by a timeout.
    // Dropping the collector releases the probe resources on every path.
    let _ = shutdown_tx.send(true);
    let shutdown_timeout = Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, collector_handle).await {
        Ok(Ok(())) => {
            info!("Collector shut down gracefully");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Collector task panicked during shutdown");
        }
        Err(_) => {
            warn!("Collector shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    health_handle.abort();
    info!("Telemetry forwarder stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
