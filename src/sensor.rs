//! Sensor probes feeding the collector.
//!
//! Three probe variants share one failure contract: a failed read means
//! "skip this measurement for this cycle", surfaced as a typed
//! [`SensorError`] the collector logs and moves past. Nothing in here
//! panics or terminates the process.
//!
//! - [`OneWireProbe`] reads a DS18B20 `w1_slave` device file.
//! - [`GpioProbe`] reads a DHT-class temperature/humidity sensor through
//!   the [`DhtDriver`] register-read boundary.
//! - [`ApiProbe`] fetches a temperature from a remote JSON endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Attempts to observe a valid CRC marker before giving up on a 1-Wire read.
const W1_CRC_ATTEMPTS: u32 = 10;

/// Delay between 1-Wire CRC marker re-reads.
const W1_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Bounded attempt count for DHT reads.
const DHT_ATTEMPTS: u32 = 3;

/// Backoff between DHT attempts after a transient fault.
const DHT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Display unit for temperature readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Fahrenheit,
    Celsius,
}

impl Unit {
    /// Convert a Celsius reading to this unit, rounded to two decimals.
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            Unit::Celsius => round2(celsius),
            Unit::Fahrenheit => round2(celsius * 9.0 / 5.0 + 32.0),
        }
    }

    /// Convert a raw millidegree-Celsius register value to this unit.
    pub fn from_millidegrees(&self, millidegrees: i64) -> f64 {
        self.from_celsius(millidegrees as f64 / 1000.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Errors surfaced by sensor probes.
#[derive(Debug)]
pub enum SensorError {
    /// Device file or directory is missing (wiring or sensor ID problem)
    NotFound(PathBuf),

    /// Device file exists but could not be read
    Io(std::io::Error),

    /// Device payload did not match the expected format
    Malformed(String),

    /// The integrity marker never became valid within the bounded retries
    CrcTimeout { attempts: u32 },

    /// All bounded retry attempts failed with transient faults
    Exhausted { attempts: u32 },

    /// The probe aborted on a fault the retry loop cannot recover from
    Fatal(String),

    /// Remote API request failed (transport, timeout, status, or decode)
    Http(reqwest::Error),

    /// Probe could not be constructed
    Setup(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::NotFound(path) => {
                write!(f, "sensor device not found: {}", path.display())
            }
            SensorError::Io(e) => write!(f, "sensor read failed: {}", e),
            SensorError::Malformed(msg) => write!(f, "unexpected sensor payload: {}", msg),
            SensorError::CrcTimeout { attempts } => {
                write!(f, "integrity marker not valid after {} attempts", attempts)
            }
            SensorError::Exhausted { attempts } => {
                write!(f, "sensor read failed after {} attempts", attempts)
            }
            SensorError::Fatal(msg) => write!(f, "fatal sensor fault: {}", msg),
            SensorError::Http(e) => write!(f, "API request failed: {}", e),
            SensorError::Setup(msg) => write!(f, "probe setup failed: {}", msg),
        }
    }
}

impl std::error::Error for SensorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SensorError::Io(e) => Some(e),
            SensorError::Http(e) => Some(e),
            _ => None,
        }
    }
}

/// DS18B20 probe over the 1-Wire sysfs interface.
///
/// The kernel exposes each sensor as a two-line text file: a status line
/// ending in `YES` once the CRC is valid, then a payload line carrying the
/// temperature in millidegrees Celsius after a `t=` marker.
pub struct OneWireProbe {
    device: PathBuf,
    unit: Unit,
}

impl OneWireProbe {
    pub fn new(device: impl Into<PathBuf>, unit: Unit) -> Self {
        Self {
            device: device.into(),
            unit,
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Read the current temperature in the configured display unit.
    ///
    /// Re-reads the device for a short bounded window while the CRC marker
    /// is absent; a marker that never settles, a missing device, or a
    /// malformed payload all yield an error.
    pub async fn read_temperature(&self) -> Result<f64, SensorError> {
        for attempt in 1..=W1_CRC_ATTEMPTS {
            let raw = tokio::fs::read_to_string(&self.device).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SensorError::NotFound(self.device.clone())
                } else {
                    SensorError::Io(e)
                }
            })?;

            match parse_w1_slave(&raw)? {
                Some(millidegrees) => return Ok(self.unit.from_millidegrees(millidegrees)),
                None => {
                    if attempt < W1_CRC_ATTEMPTS {
                        tokio::time::sleep(W1_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(SensorError::CrcTimeout {
            attempts: W1_CRC_ATTEMPTS,
        })
    }
}

/// Parse a `w1_slave` payload.
///
/// Returns `Ok(None)` while the CRC marker is still pending, the raw
/// millidegree value once valid, and an error for payloads that can never
/// become valid.
fn parse_w1_slave(raw: &str) -> Result<Option<i64>, SensorError> {
    let mut lines = raw.lines();
    let status = lines
        .next()
        .ok_or_else(|| SensorError::Malformed("empty device payload".to_string()))?;

    if !status.trim_end().ends_with("YES") {
        return Ok(None);
    }

    let payload = lines
        .next()
        .ok_or_else(|| SensorError::Malformed("missing payload line".to_string()))?;

    let field = payload
        .rsplit_once("t=")
        .map(|(_, v)| v.trim())
        .ok_or_else(|| SensorError::Malformed("no t= field in payload".to_string()))?;

    field
        .parse::<i64>()
        .map(Some)
        .map_err(|_| SensorError::Malformed(format!("invalid millidegree value '{}'", field)))
}

/// A reading from a DHT-class combined sensor, in raw Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DhtReading {
    pub temperature_c: f64,
    pub humidity: f64,
}

/// Fault classes the DHT retry loop distinguishes.
#[derive(Debug)]
pub enum DhtFault {
    /// A fault worth retrying after a short backoff (checksum glitch, EIO)
    Transient(String),

    /// A fault that aborts the retry loop immediately (device gone)
    Fatal(String),
}

impl std::fmt::Display for DhtFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DhtFault::Transient(msg) => write!(f, "transient fault: {}", msg),
            DhtFault::Fatal(msg) => write!(f, "fatal fault: {}", msg),
        }
    }
}

/// Register-read boundary for DHT-class hardware.
///
/// Implementations perform one typed read; retry policy lives in
/// [`GpioProbe`]. `release` is invoked exactly once when the owning probe
/// shuts down, on every exit path including interrupt.
pub trait DhtDriver: Send {
    fn read(&mut self) -> Result<DhtReading, DhtFault>;

    fn release(&mut self) {}
}

/// DHT driver over the Linux IIO sysfs channels.
///
/// The kernel `dht11` driver exposes `in_temp_input` (millidegrees C) and
/// `in_humidityrelative_input` (millipercent) under the device directory.
/// Reads frequently fail with `EIO` while the sensor is mid-conversion;
/// those are transient. A missing device directory is fatal.
pub struct IioDhtDriver {
    device_dir: PathBuf,
}

impl IioDhtDriver {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    fn read_channel(&self, channel: &str) -> Result<f64, DhtFault> {
        let path = self.device_dir.join(channel);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DhtFault::Fatal(format!("{} missing: {}", path.display(), e))
            } else {
                DhtFault::Transient(format!("{}: {}", path.display(), e))
            }
        })?;
        raw.trim()
            .parse::<f64>()
            .map_err(|_| DhtFault::Transient(format!("unparseable channel value '{}'", raw.trim())))
    }
}

impl DhtDriver for IioDhtDriver {
    fn read(&mut self) -> Result<DhtReading, DhtFault> {
        let temp_milli = self.read_channel("in_temp_input")?;
        let humidity_milli = self.read_channel("in_humidityrelative_input")?;
        Ok(DhtReading {
            temperature_c: temp_milli / 1000.0,
            humidity: humidity_milli / 1000.0,
        })
    }
}

/// A combined air temperature and humidity reading in display units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// DHT-class probe with bounded retry.
///
/// Up to three attempts with a short backoff between them; a transient
/// fault retries, a fatal fault aborts the loop immediately. The driver is
/// owned exclusively and released when the probe is dropped.
pub struct GpioProbe {
    driver: Box<dyn DhtDriver>,
    unit: Unit,
}

impl GpioProbe {
    pub fn new(driver: Box<dyn DhtDriver>, unit: Unit) -> Self {
        Self { driver, unit }
    }

    pub async fn read(&mut self) -> Result<AirReading, SensorError> {
        for attempt in 1..=DHT_ATTEMPTS {
            match self.driver.read() {
                Ok(reading) => {
                    return Ok(AirReading {
                        temperature: self.unit.from_celsius(reading.temperature_c),
                        humidity: round2(reading.humidity),
                    })
                }
                Err(DhtFault::Transient(msg)) => {
                    warn!(attempt, max_attempts = DHT_ATTEMPTS, error = %msg, "transient DHT fault");
                    if attempt < DHT_ATTEMPTS {
                        tokio::time::sleep(DHT_RETRY_DELAY).await;
                    }
                }
                Err(DhtFault::Fatal(msg)) => return Err(SensorError::Fatal(msg)),
            }
        }
        Err(SensorError::Exhausted {
            attempts: DHT_ATTEMPTS,
        })
    }
}

impl Drop for GpioProbe {
    fn drop(&mut self) {
        self.driver.release();
    }
}

#[derive(Debug, Deserialize)]
struct ApiReading {
    value: f64,
}

/// Remote temperature probe over HTTP.
///
/// A GET with a fixed timeout against an endpoint returning a JSON object
/// with a numeric `value` field. Non-2xx responses and malformed payloads
/// are errors, never panics.
pub struct ApiProbe {
    http: reqwest::Client,
    url: String,
}

impl ApiProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SensorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SensorError::Setup(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn read_temperature(&self) -> Result<f64, SensorError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(SensorError::Http)?
            .error_for_status()
            .map_err(SensorError::Http)?;

        let reading: ApiReading = response.json().await.map_err(SensorError::Http)?;
        Ok(reading.value)
    }
}

/// The configured source for air measurements.
pub enum AirProbe {
    Api(ApiProbe),
    Dht(GpioProbe),
    Disabled,
}

impl AirProbe {
    pub fn is_disabled(&self) -> bool {
        matches!(self, AirProbe::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const VALID_PAYLOAD: &str =
        "73 01 4b 46 7f ff 0d 10 41 : crc=41 YES\n73 01 4b 46 7f ff 0d 10 41 t=23187\n";
    const PENDING_PAYLOAD: &str =
        "73 01 4b 46 7f ff 0d 10 41 : crc=41 NO\n73 01 4b 46 7f ff 0d 10 41 t=23187\n";

    #[test]
    fn test_parse_valid_payload() {
        assert_eq!(parse_w1_slave(VALID_PAYLOAD).unwrap(), Some(23187));
    }

    #[test]
    fn test_parse_pending_crc() {
        assert_eq!(parse_w1_slave(PENDING_PAYLOAD).unwrap(), None);
    }

    #[test]
    fn test_parse_negative_millidegrees() {
        let payload = "aa bb : crc=00 YES\naa bb t=-1562\n";
        assert_eq!(parse_w1_slave(payload).unwrap(), Some(-1562));
    }

    #[test]
    fn test_parse_missing_field_is_error() {
        let payload = "aa bb : crc=00 YES\naa bb cc dd\n";
        assert!(matches!(
            parse_w1_slave(payload),
            Err(SensorError::Malformed(_))
        ));
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(Unit::Fahrenheit.from_millidegrees(23187), 73.74);
        assert_eq!(Unit::Celsius.from_millidegrees(23187), 23.19);
        assert_eq!(Unit::Fahrenheit.from_millidegrees(0), 32.0);
        assert_eq!(Unit::Fahrenheit.from_millidegrees(-1562), 29.19);
    }

    #[tokio::test]
    async fn test_one_wire_reads_valid_device() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID_PAYLOAD.as_bytes()).unwrap();
        file.flush().unwrap();

        let probe = OneWireProbe::new(file.path(), Unit::Fahrenheit);
        let temp = probe.read_temperature().await.unwrap();
        assert_eq!(temp, 73.74);
    }

    #[tokio::test]
    async fn test_one_wire_missing_device() {
        let probe = OneWireProbe::new("/nonexistent/w1_slave", Unit::Fahrenheit);
        assert!(matches!(
            probe.read_temperature().await,
            Err(SensorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_one_wire_retries_until_marker_settles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w1_slave");
        std::fs::write(&path, PENDING_PAYLOAD).unwrap();

        // The kernel flips the marker to YES a couple of re-reads in.
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            std::fs::write(&writer_path, VALID_PAYLOAD).unwrap();
        });

        let probe = OneWireProbe::new(path, Unit::Fahrenheit);
        let temp = probe.read_temperature().await.unwrap();
        assert_eq!(temp, 73.74);
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_wire_crc_never_settles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PENDING_PAYLOAD.as_bytes()).unwrap();
        file.flush().unwrap();

        let probe = OneWireProbe::new(file.path(), Unit::Fahrenheit);
        match probe.read_temperature().await {
            Err(SensorError::CrcTimeout { attempts }) => assert_eq!(attempts, W1_CRC_ATTEMPTS),
            other => panic!("expected CrcTimeout, got {:?}", other.map(|_| ())),
        }
    }

    struct ScriptedDriver {
        responses: VecDeque<Result<DhtReading, DhtFault>>,
        released: Arc<AtomicBool>,
    }

    impl ScriptedDriver {
        fn new(responses: Vec<Result<DhtReading, DhtFault>>) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            (
                Self {
                    responses: responses.into(),
                    released: released.clone(),
                },
                released,
            )
        }
    }

    impl DhtDriver for ScriptedDriver {
        fn read(&mut self) -> Result<DhtReading, DhtFault> {
            self.responses
                .pop_front()
                .unwrap_or(Err(DhtFault::Fatal("script exhausted".to_string())))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn ok_reading() -> Result<DhtReading, DhtFault> {
        Ok(DhtReading {
            temperature_c: 20.0,
            humidity: 45.6,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpio_transient_then_ok() {
        let (driver, _) = ScriptedDriver::new(vec![
            Err(DhtFault::Transient("checksum".to_string())),
            ok_reading(),
        ]);
        let mut probe = GpioProbe::new(Box::new(driver), Unit::Fahrenheit);

        let reading = probe.read().await.unwrap();
        assert_eq!(reading.temperature, 68.0);
        assert_eq!(reading.humidity, 45.6);
    }

    #[tokio::test]
    async fn test_gpio_fatal_aborts_immediately() {
        let (driver, _) = ScriptedDriver::new(vec![
            Err(DhtFault::Fatal("device gone".to_string())),
            ok_reading(),
        ]);
        let mut probe = GpioProbe::new(Box::new(driver), Unit::Fahrenheit);

        assert!(matches!(probe.read().await, Err(SensorError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpio_exhausts_after_bounded_attempts() {
        let (driver, _) = ScriptedDriver::new(vec![
            Err(DhtFault::Transient("1".to_string())),
            Err(DhtFault::Transient("2".to_string())),
            Err(DhtFault::Transient("3".to_string())),
        ]);
        let mut probe = GpioProbe::new(Box::new(driver), Unit::Celsius);

        match probe.read().await {
            Err(SensorError::Exhausted { attempts }) => assert_eq!(attempts, DHT_ATTEMPTS),
            other => panic!("expected Exhausted, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_gpio_releases_driver_on_drop() {
        let (driver, released) = ScriptedDriver::new(vec![ok_reading()]);
        let probe = GpioProbe::new(Box::new(driver), Unit::Fahrenheit);
        assert!(!released.load(Ordering::SeqCst));
        drop(probe);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_iio_driver_missing_directory_is_fatal() {
        let mut driver = IioDhtDriver::new("/nonexistent/iio:device0");
        assert!(matches!(driver.read(), Err(DhtFault::Fatal(_))));
    }

    #[test]
    fn test_iio_driver_reads_channels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_temp_input"), "21687\n").unwrap();
        std::fs::write(dir.path().join("in_humidityrelative_input"), "45600\n").unwrap();

        let mut driver = IioDhtDriver::new(dir.path());
        let reading = driver.read().unwrap();
        assert!((reading.temperature_c - 21.687).abs() < 1e-9);
        assert!((reading.humidity - 45.6).abs() < 1e-9);
    }

    #[test]
    fn test_api_reading_deserialization() {
        let reading: ApiReading = serde_json::from_str(r#"{"value": 67.3}"#).unwrap();
        assert_eq!(reading.value, 67.3);

        assert!(serde_json::from_str::<ApiReading>(r#"{"value": "warm"}"#).is_err());
        assert!(serde_json::from_str::<ApiReading>(r#"{}"#).is_err());
    }

    #[test]
    fn test_sensor_error_display() {
        let err = SensorError::CrcTimeout { attempts: 10 };
        assert!(format!("{}", err).contains("10"));

        let err = SensorError::Exhausted { attempts: 3 };
        assert!(format!("{}", err).contains("3 attempts"));

        let err = SensorError::Fatal("device gone".to_string());
        assert!(format!("{}", err).contains("device gone"));
    }
}
