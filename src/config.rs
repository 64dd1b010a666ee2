//! Configuration module for the telemetry forwarder.
//!
//! All settings load from environment variables with validated ranges and
//! sensible defaults. The sink settings mirror an InfluxDB 1.x deployment;
//! sensor settings select which probes the collector polls.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::sensor::Unit;

/// Default InfluxDB base URL
const DEFAULT_INFLUX_URL: &str = "http://localhost:8086";

/// Default target database
const DEFAULT_DATABASE: &str = "pond_data";

/// Suffix applied to the database name in test mode
const TEST_DATABASE_SUFFIX: &str = "_test";

/// Default polling interval in seconds
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Minimum polling interval to leave the sensors settle time
const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// Maximum polling interval to keep the data stream useful
const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Default HTTP timeout for sink and API probe requests, in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default journal file path
const DEFAULT_JOURNAL_PATH: &str = "sensor_journal.log";

/// Default health listener port
const DEFAULT_HEALTH_PORT: u16 = 9991;

/// Where the air measurement comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AirSource {
    /// Remote JSON endpoint returning a numeric `value`
    Api { url: String },

    /// DHT-class sensor exposed through an IIO sysfs device directory
    Dht { device: PathBuf },

    /// No air measurement this deployment
    Disabled,
}

/// Configuration for the telemetry forwarder.
///
/// All settings can be configured via environment variables:
/// - `TELEMETRY_FORWARDER_INFLUX_URL`: InfluxDB base URL (default: http://localhost:8086)
/// - `TELEMETRY_FORWARDER_DATABASE`: target database (default: pond_data)
/// - `TELEMETRY_FORWARDER_TEST_MODE`: write to `<database>_test` instead (default: false)
/// - `TELEMETRY_FORWARDER_INFLUX_USER` / `_INFLUX_PASSWORD`: optional credentials
/// - `TELEMETRY_FORWARDER_POLL_INTERVAL_SECS`: seconds between cycles (default: 60)
/// - `TELEMETRY_FORWARDER_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 10)
/// - `TELEMETRY_FORWARDER_JOURNAL_PATH`: journal file (default: sensor_journal.log)
/// - `TELEMETRY_FORWARDER_HEALTH_PORT`: liveness TCP port (default: 9991)
/// - `TELEMETRY_FORWARDER_W1_DEVICE`: 1-Wire `w1_slave` path; unset disables the water probe
/// - `TELEMETRY_FORWARDER_AIR_SOURCE`: `api`, `dht`, or `none` (default: none)
/// - `TELEMETRY_FORWARDER_AIR_API_URL`: endpoint for the `api` air source
/// - `TELEMETRY_FORWARDER_IIO_DEVICE`: IIO device directory for the `dht` air source
/// - `TELEMETRY_FORWARDER_UNIT`: `fahrenheit` or `celsius` (default: fahrenheit)
#[derive(Debug, Clone)]
pub struct Config {
    /// InfluxDB base URL, no trailing slash
    pub influx_url: String,

    /// Target database, with the test suffix already applied
    pub database: String,

    /// Optional (user, password) credentials for the sink
    pub influx_auth: Option<(String, String)>,

    /// Time between collection cycles
    pub poll_interval: Duration,

    /// HTTP timeout for sink requests and the API probe
    pub request_timeout: Duration,

    /// Path of the durable journal file
    pub journal_path: PathBuf,

    /// TCP port of the liveness listener
    pub health_port: u16,

    /// 1-Wire device file of the water probe, if configured
    pub w1_device: Option<PathBuf>,

    /// Source of air measurements
    pub air_source: AirSource,

    /// Display unit for temperatures
    pub unit: Unit,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    fn new(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable fails to parse, a validated
    /// range is exceeded, or a selected air source is missing its
    /// companion setting.
    pub fn from_env() -> Result<Self, ConfigError> {
        let influx_url = env::var("TELEMETRY_FORWARDER_INFLUX_URL")
            .unwrap_or_else(|_| DEFAULT_INFLUX_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let mut database = env::var("TELEMETRY_FORWARDER_DATABASE")
            .unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        if parse_bool("TELEMETRY_FORWARDER_TEST_MODE")? {
            database.push_str(TEST_DATABASE_SUFFIX);
        }

        let influx_auth = parse_auth()?;
        let poll_interval = Duration::from_secs(parse_poll_interval()?);
        let request_timeout = Duration::from_secs(parse_secs(
            "TELEMETRY_FORWARDER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);

        let journal_path = env::var("TELEMETRY_FORWARDER_JOURNAL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_JOURNAL_PATH));

        let health_port = parse_health_port()?;
        let w1_device = env::var("TELEMETRY_FORWARDER_W1_DEVICE")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let air_source = parse_air_source()?;
        let unit = parse_unit()?;

        Ok(Self {
            influx_url,
            database,
            influx_auth,
            poll_interval,
            request_timeout,
            journal_path,
            health_port,
            w1_device,
            air_source,
            unit,
        })
    }

    /// Whether any sensor source is configured at all.
    ///
    /// A configuration with nothing to poll is the one startup error that
    /// terminates the process instead of letting it spin uselessly.
    pub fn has_sensor_source(&self) -> bool {
        self.w1_device.is_some() || self.air_source != AirSource::Disabled
    }
}

impl Default for Config {
    /// Default configuration, useful for tests and local runs.
    fn default() -> Self {
        Self {
            influx_url: DEFAULT_INFLUX_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            influx_auth: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            journal_path: PathBuf::from(DEFAULT_JOURNAL_PATH),
            health_port: DEFAULT_HEALTH_PORT,
            w1_device: None,
            air_source: AirSource::Disabled,
            unit: Unit::Fahrenheit,
        }
    }
}

fn parse_bool(env_var: &str) -> Result<bool, ConfigError> {
    match env::var(env_var) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::new(
                env_var,
                format!("'{}' is not a valid boolean", other),
            )),
        },
        Err(_) => Ok(false),
    }
}

fn parse_auth() -> Result<Option<(String, String)>, ConfigError> {
    let user = env::var("TELEMETRY_FORWARDER_INFLUX_USER").ok();
    let password = env::var("TELEMETRY_FORWARDER_INFLUX_PASSWORD").ok();
    match (user, password) {
        (Some(user), Some(password)) => Ok(Some((user, password))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::new(
            "TELEMETRY_FORWARDER_INFLUX_PASSWORD",
            "username set without a password",
        )),
        (None, Some(_)) => Err(ConfigError::new(
            "TELEMETRY_FORWARDER_INFLUX_USER",
            "password set without a username",
        )),
    }
}

/// Parse the polling interval with range validation.
fn parse_poll_interval() -> Result<u64, ConfigError> {
    let env_var = "TELEMETRY_FORWARDER_POLL_INTERVAL_SECS";

    match env::var(env_var) {
        Ok(value) => {
            let interval: u64 = value.parse().map_err(|_| {
                ConfigError::new(env_var, format!("'{}' is not a valid number", value))
            })?;

            if interval < MIN_POLL_INTERVAL_SECS {
                return Err(ConfigError::new(
                    env_var,
                    format!(
                        "poll interval {} is below minimum ({}s)",
                        interval, MIN_POLL_INTERVAL_SECS
                    ),
                ));
            }

            if interval > MAX_POLL_INTERVAL_SECS {
                return Err(ConfigError::new(
                    env_var,
                    format!(
                        "poll interval {} exceeds maximum ({}s)",
                        interval, MAX_POLL_INTERVAL_SECS
                    ),
                ));
            }

            Ok(interval)
        }
        Err(_) => Ok(DEFAULT_POLL_INTERVAL_SECS),
    }
}

fn parse_secs(env_var: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(env_var) {
        Ok(value) => {
            let secs: u64 = value.parse().map_err(|_| {
                ConfigError::new(env_var, format!("'{}' is not a valid number", value))
            })?;
            if secs == 0 {
                return Err(ConfigError::new(env_var, "must be greater than 0"));
            }
            Ok(secs)
        }
        Err(_) => Ok(default),
    }
}

fn parse_health_port() -> Result<u16, ConfigError> {
    let env_var = "TELEMETRY_FORWARDER_HEALTH_PORT";
    match env::var(env_var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::new(env_var, format!("'{}' is not a valid port", value))),
        Err(_) => Ok(DEFAULT_HEALTH_PORT),
    }
}

fn parse_air_source() -> Result<AirSource, ConfigError> {
    let env_var = "TELEMETRY_FORWARDER_AIR_SOURCE";
    let selected = env::var(env_var).unwrap_or_else(|_| "none".to_string());

    match selected.to_ascii_lowercase().as_str() {
        "none" => Ok(AirSource::Disabled),
        "api" => {
            let url = env::var("TELEMETRY_FORWARDER_AIR_API_URL").map_err(|_| {
                ConfigError::new(
                    "TELEMETRY_FORWARDER_AIR_API_URL",
                    "required when the air source is 'api'",
                )
            })?;
            Ok(AirSource::Api { url })
        }
        "dht" => {
            let device = env::var("TELEMETRY_FORWARDER_IIO_DEVICE").map_err(|_| {
                ConfigError::new(
                    "TELEMETRY_FORWARDER_IIO_DEVICE",
                    "required when the air source is 'dht'",
                )
            })?;
            Ok(AirSource::Dht {
                device: PathBuf::from(device),
            })
        }
        other => Err(ConfigError::new(
            env_var,
            format!("'{}' is not one of api, dht, none", other),
        )),
    }
}

fn parse_unit() -> Result<Unit, ConfigError> {
    let env_var = "TELEMETRY_FORWARDER_UNIT";
    match env::var(env_var) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "fahrenheit" | "f" => Ok(Unit::Fahrenheit),
            "celsius" | "c" => Ok(Unit::Celsius),
            other => Err(ConfigError::new(
                env_var,
                format!("'{}' is not one of fahrenheit, celsius", other),
            )),
        },
        Err(_) => Ok(Unit::Fahrenheit),
    }
}
