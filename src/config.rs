use log::info;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::bluetooth::payload::MAX_DEVICE_NAME_LEN;
use crate::error::ConfigError;
use crate::models::{PerKind, SensorKind};

const DEFAULT_DEVICE_NAME: &str = "ESP32-SK";
const DEFAULT_IIO_ROOT: &str = "/sys/bus/iio/devices";

/// Decimal places each record field can carry (×100, ×100, ×10)
const MAX_PRECISION: PerKind<u32> = PerKind {
    temperature: 2,
    humidity: 2,
    pressure: 1,
};

/// Process-wide settings, read once at startup and shared by reference
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub device_name: String,
    pub update_interval: Duration,
    pub advertising_interval: Duration,
    pub enabled: PerKind<bool>,
    /// Added to every sample; pressure offset is stored in Pa
    pub calibration: PerKind<f64>,
    /// Decimal places kept after calibration
    pub precision: PerKind<u32>,
    pub use_mock_sensors: bool,
    /// Inclusive `(min, max)` for mock draws; pressure range is stored in Pa
    pub mock_ranges: PerKind<(f64, f64)>,
    pub mock_seed: Option<u64>,
    pub iio_root: PathBuf,
    pub bus_read_timeout: Duration,
    pub led_name: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            update_interval: Duration::from_millis(1000),
            advertising_interval: Duration::from_millis(100),
            enabled: PerKind {
                temperature: true,
                humidity: true,
                pressure: true,
            },
            calibration: PerKind {
                temperature: 0.0,
                humidity: 0.0,
                pressure: 0.0,
            },
            precision: PerKind {
                temperature: 2,
                humidity: 1,
                pressure: 1,
            },
            use_mock_sensors: false,
            mock_ranges: PerKind {
                temperature: (20.0, 25.0),
                humidity: (40.0, 60.0),
                pressure: (101_000.0, 102_000.0),
            },
            mock_seed: None,
            iio_root: PathBuf::from(DEFAULT_IIO_ROOT),
            bus_read_timeout: Duration::from_millis(250),
            led_name: None,
        }
    }
}

impl DeviceConfig {
    /// Load configuration from the environment (and `.env`, if present)
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key/value source, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DeviceConfig::default();

        let device_name = lookup("DEVICE_NAME")
            .map(|name| name.trim().to_string())
            .unwrap_or(defaults.device_name);

        let update_interval =
            parse_interval(&lookup, "SENSOR_UPDATE_INTERVAL_MS", defaults.update_interval)?;
        let advertising_interval = parse_interval(
            &lookup,
            "BLE_ADVERTISING_INTERVAL_MS",
            defaults.advertising_interval,
        )?;

        let enabled = PerKind {
            temperature: parse_flag(&lookup, "SENSOR_TEMPERATURE", defaults.enabled.temperature)?,
            humidity: parse_flag(&lookup, "SENSOR_HUMIDITY", defaults.enabled.humidity)?,
            pressure: parse_flag(&lookup, "SENSOR_PRESSURE", defaults.enabled.pressure)?,
        };

        // Pressure settings are written in hPa and kept internally in Pa
        let calibration = PerKind {
            temperature: parse_value(&lookup, "TEMPERATURE_OFFSET", 0.0)?,
            humidity: parse_value(&lookup, "HUMIDITY_OFFSET", 0.0)?,
            pressure: parse_value::<f64, _>(&lookup, "PRESSURE_OFFSET", 0.0)? * 100.0,
        };

        let precision = PerKind {
            temperature: parse_value(
                &lookup,
                "TEMPERATURE_PRECISION",
                defaults.precision.temperature,
            )?,
            humidity: parse_value(&lookup, "HUMIDITY_PRECISION", defaults.precision.humidity)?,
            pressure: parse_value(&lookup, "PRESSURE_PRECISION", defaults.precision.pressure)?,
        };

        let (press_min, press_max) =
            parse_range(&lookup, "MOCK_PRESSURE_RANGE", (1010.0, 1020.0))?;
        let mock_ranges = PerKind {
            temperature: parse_range(
                &lookup,
                "MOCK_TEMPERATURE_RANGE",
                defaults.mock_ranges.temperature,
            )?,
            humidity: parse_range(&lookup, "MOCK_HUMIDITY_RANGE", defaults.mock_ranges.humidity)?,
            pressure: (press_min * 100.0, press_max * 100.0),
        };

        let mock_seed = match lookup("MOCK_SEED") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "MOCK_SEED",
                value: raw,
            })?),
            None => None,
        };

        let config = DeviceConfig {
            device_name,
            update_interval,
            advertising_interval,
            enabled,
            calibration,
            precision,
            use_mock_sensors: parse_flag(&lookup, "USE_MOCK_SENSORS", defaults.use_mock_sensors)?,
            mock_ranges,
            mock_seed,
            iio_root: lookup("SENSOR_IIO_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.iio_root),
            bus_read_timeout: parse_interval(
                &lookup,
                "SENSOR_READ_TIMEOUT_MS",
                defaults.bus_read_timeout,
            )?,
            led_name: lookup("LED_NAME").filter(|name| !name.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the constraints the encoder relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.device_name.len();
        if len == 0 {
            return Err(ConfigError::EmptyName);
        }
        if len > MAX_DEVICE_NAME_LEN {
            return Err(ConfigError::NameTooLong {
                name: self.device_name.clone(),
                len,
                max: MAX_DEVICE_NAME_LEN,
            });
        }

        // Finer precision than the record's fixed-point scale is lost on the wire
        let precision_keys = [
            (SensorKind::Temperature, "TEMPERATURE_PRECISION"),
            (SensorKind::Humidity, "HUMIDITY_PRECISION"),
            (SensorKind::Pressure, "PRESSURE_PRECISION"),
        ];
        for (kind, key) in precision_keys {
            let precision = self.precision.get(kind);
            if precision > MAX_PRECISION.get(kind) {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: precision.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = SensorKind> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter(move |kind| self.enabled.get(*kind))
    }

    /// Log the effective configuration at startup
    pub fn log_summary(&self) {
        let enabled: Vec<String> = self.enabled_kinds().map(|k| k.to_string()).collect();
        info!("Device name: {}", self.device_name);
        info!("Version: {}", env!("CARGO_PKG_VERSION"));
        info!(
            "Advertising interval: {}ms",
            self.advertising_interval.as_millis()
        );
        info!("Sensor update interval: {}ms", self.update_interval.as_millis());
        info!("Enabled sensors: {:?}", enabled);
        info!("Mock sensors: {}", self.use_mock_sensors);
    }
}

fn parse_value<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
        None => Ok(default),
    }
}

fn parse_interval<F>(
    lookup: &F,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let millis: u64 = parse_value(lookup, key, default.as_millis() as u64)?;
    if millis == 0 {
        return Err(ConfigError::ZeroInterval { key });
    }
    Ok(Duration::from_millis(millis))
}

fn parse_range<F>(
    lookup: &F,
    key: &'static str,
    default: (f64, f64),
) -> Result<(f64, f64), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    let invalid = || ConfigError::InvalidRange {
        key,
        value: raw.clone(),
    };

    let (min, max) = raw.split_once(',').ok_or_else(invalid)?;
    let min: f64 = min.trim().parse().map_err(|_| invalid())?;
    let max: f64 = max.trim().parse().map_err(|_| invalid())?;

    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(invalid());
    }
    Ok((min, max))
}
