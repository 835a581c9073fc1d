/// Sensor acquisition with fallback to generated values
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use tokio::time::{timeout, Duration};

use crate::config::DeviceConfig;
use crate::models::{PerKind, ReadingSet, SensorKind};
use crate::sensors::iio::SensorBus;
use crate::utils::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    Mock,
    Hardware,
}

impl fmt::Display for SensorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorMode::Mock => f.write_str("MOCK"),
            SensorMode::Hardware => f.write_str("REAL"),
        }
    }
}

/// Produces calibrated, rounded readings from hardware or from a random generator
///
/// Once demoted to mock mode the source never returns to hardware mode.
pub struct SensorSource<B> {
    bus: B,
    mode: SensorMode,
    rng: StdRng,
    calibration: PerKind<f64>,
    precision: PerKind<u32>,
    mock_ranges: PerKind<(f64, f64)>,
    read_timeout: Duration,
}

impl<B: SensorBus> SensorSource<B> {
    pub fn new(config: &DeviceConfig, bus: B) -> Self {
        let rng = match config.mock_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        SensorSource {
            bus,
            mode: if config.use_mock_sensors {
                SensorMode::Mock
            } else {
                SensorMode::Hardware
            },
            rng,
            calibration: config.calibration,
            precision: config.precision,
            mock_ranges: config.mock_ranges,
            read_timeout: config.bus_read_timeout,
        }
    }

    /// Set up the hardware bus, falling back to mock mode if it is unusable
    pub async fn initialize(&mut self) -> SensorMode {
        if self.mode == SensorMode::Hardware {
            match timeout(self.read_timeout, self.bus.scan()).await {
                Ok(Ok(0)) => {
                    warn!("No sensor devices found, falling back to mock mode");
                    self.mode = SensorMode::Mock;
                }
                Ok(Ok(count)) => debug!("{} sensor device(s) available", count),
                Ok(Err(e)) => {
                    warn!(
                        "Error initializing sensors: {}. Falling back to mock mode",
                        e
                    );
                    self.mode = SensorMode::Mock;
                }
                Err(_) => {
                    warn!("Sensor scan timed out, falling back to mock mode");
                    self.mode = SensorMode::Mock;
                }
            }
        }

        info!("Sensor source initialized ({} mode)", self.mode);
        self.mode
    }

    /// Take one reading of `kind`
    ///
    /// The calibration offset is added, humidity is clamped to 0-100 %, and
    /// the result is rounded half away from zero to the configured number of
    /// decimals. A failed or timed out hardware read yields `None`.
    pub async fn sample(&mut self, kind: SensorKind) -> Option<f64> {
        let raw = match self.mode {
            SensorMode::Mock => Some(self.mock_value(kind)),
            SensorMode::Hardware => self.read_hardware(kind).await,
        }?;

        let mut value = raw + self.calibration.get(kind);
        if kind == SensorKind::Humidity {
            value = value.clamp(0.0, 100.0);
        }
        let value = round_to(value, self.precision.get(kind));

        if value.is_finite() {
            Some(value)
        } else {
            warn!("Discarding non-finite {} reading", kind);
            None
        }
    }

    /// Sample every kind enabled in `config`
    pub async fn read_all(&mut self, config: &DeviceConfig) -> ReadingSet {
        let mut readings = ReadingSet::new();
        for kind in config.enabled_kinds() {
            let value = self.sample(kind).await;
            readings = readings.with(kind, value);
        }
        debug!("Readings: {:?}", readings);
        readings
    }

    fn mock_value(&mut self, kind: SensorKind) -> f64 {
        let (min, max) = self.mock_ranges.get(kind);
        self.rng.gen_range(min..=max)
    }

    async fn read_hardware(&mut self, kind: SensorKind) -> Option<f64> {
        match timeout(self.read_timeout, self.bus.read(kind)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("Error reading {}: {}", kind, e);
                None
            }
            Err(_) => {
                warn!(
                    "Reading {} timed out after {}ms",
                    kind,
                    self.read_timeout.as_millis()
                );
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BusError;
    use std::collections::HashMap;

    /// Scripted bus for exercising the source without hardware
    #[derive(Default)]
    pub(crate) struct FakeBus {
        pub devices: usize,
        pub scan_fails: bool,
        pub scan_hangs: bool,
        pub values: HashMap<SensorKind, f64>,
        pub hang_on: Option<SensorKind>,
        pub reads: usize,
    }

    impl SensorBus for FakeBus {
        async fn scan(&mut self) -> Result<usize, BusError> {
            if self.scan_hangs {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.scan_fails {
                return Err(BusError::Unavailable {
                    path: "/dev/i2c-0".into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(self.devices)
        }

        async fn read(&mut self, kind: SensorKind) -> Result<f64, BusError> {
            self.reads += 1;
            if self.hang_on == Some(kind) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.values
                .get(&kind)
                .copied()
                .ok_or(BusError::NoChannel(kind))
        }
    }

    pub(crate) fn hardware_config() -> DeviceConfig {
        DeviceConfig {
            bus_read_timeout: Duration::from_millis(20),
            mock_seed: Some(7),
            ..DeviceConfig::default()
        }
    }

    #[tokio::test]
    async fn zero_device_scan_falls_back_to_mock_permanently() {
        let bus = FakeBus::default();
        let mut source = SensorSource::new(&hardware_config(), bus);

        assert_eq!(source.initialize().await, SensorMode::Mock);

        for _ in 0..20 {
            let t = source.sample(SensorKind::Temperature).await.unwrap();
            let h = source.sample(SensorKind::Humidity).await.unwrap();
            let p = source.sample(SensorKind::Pressure).await.unwrap();
            assert!((20.0..=25.0).contains(&t));
            assert!((40.0..=60.0).contains(&h));
            assert!((101_000.0..=102_000.0).contains(&p));
        }
        assert_eq!(source.mode, SensorMode::Mock);
        assert_eq!(source.bus.reads, 0);
    }

    #[tokio::test]
    async fn scan_error_falls_back_to_mock() {
        let bus = FakeBus {
            scan_fails: true,
            ..FakeBus::default()
        };
        let mut source = SensorSource::new(&hardware_config(), bus);

        assert_eq!(source.initialize().await, SensorMode::Mock);
        assert!(source.sample(SensorKind::Pressure).await.is_some());
    }

    #[tokio::test]
    async fn stalled_scan_falls_back_to_mock() {
        let bus = FakeBus {
            devices: 1,
            scan_hangs: true,
            values: HashMap::from([(SensorKind::Temperature, 30.0)]),
            ..FakeBus::default()
        };
        let mut source = SensorSource::new(&hardware_config(), bus);

        assert_eq!(source.initialize().await, SensorMode::Mock);
        let t = source.sample(SensorKind::Temperature).await.unwrap();
        assert!((20.0..=25.0).contains(&t));
        assert_eq!(source.bus.reads, 0);
    }

    #[tokio::test]
    async fn hardware_values_are_calibrated_and_rounded() {
        let bus = FakeBus {
            devices: 1,
            values: HashMap::from([
                (SensorKind::Temperature, 22.345),
                (SensorKind::Humidity, 99.0),
                (SensorKind::Pressure, 101_325.04),
            ]),
            ..FakeBus::default()
        };
        let config = DeviceConfig {
            calibration: PerKind {
                temperature: 0.0,
                humidity: 2.5,
                pressure: 0.0,
            },
            ..hardware_config()
        };
        let mut source = SensorSource::new(&config, bus);

        assert_eq!(source.initialize().await, SensorMode::Hardware);
        assert_eq!(source.sample(SensorKind::Temperature).await, Some(22.35));
        assert_eq!(source.sample(SensorKind::Humidity).await, Some(100.0));
        assert_eq!(source.sample(SensorKind::Pressure).await, Some(101_325.0));
    }

    #[tokio::test]
    async fn failing_read_only_affects_that_sample() {
        let bus = FakeBus {
            devices: 1,
            values: HashMap::from([(SensorKind::Pressure, 100_000.0)]),
            hang_on: Some(SensorKind::Humidity),
            ..FakeBus::default()
        };
        let mut source = SensorSource::new(&hardware_config(), bus);
        source.initialize().await;

        let readings = source.read_all(&hardware_config()).await;

        assert_eq!(readings.get(SensorKind::Temperature), None);
        assert_eq!(readings.get(SensorKind::Humidity), None);
        assert_eq!(readings.get(SensorKind::Pressure), Some(100_000.0));
        assert_eq!(source.mode, SensorMode::Hardware);
    }

    #[tokio::test]
    async fn seeded_mock_source_is_reproducible() {
        let config = DeviceConfig {
            use_mock_sensors: true,
            mock_seed: Some(42),
            ..DeviceConfig::default()
        };

        let mut first = SensorSource::new(&config, FakeBus::default());
        let mut second = SensorSource::new(&config, FakeBus::default());
        first.initialize().await;
        second.initialize().await;

        assert_eq!(first.read_all(&config).await, second.read_all(&config).await);
    }

    #[tokio::test]
    async fn disabled_kinds_are_not_sampled() {
        let config = DeviceConfig {
            use_mock_sensors: true,
            enabled: PerKind {
                temperature: true,
                humidity: false,
                pressure: false,
            },
            ..DeviceConfig::default()
        };
        let mut source = SensorSource::new(&config, FakeBus::default());
        source.initialize().await;

        let readings = source.read_all(&config).await;
        assert!(readings.get(SensorKind::Temperature).is_some());
        assert_eq!(readings.get(SensorKind::Humidity), None);
        assert_eq!(readings.get(SensorKind::Pressure), None);
    }
}
