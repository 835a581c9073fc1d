//! Hardware sensor access through the Linux IIO sysfs interface
//!
//! Environmental sensors such as the BME280 are exposed by the kernel under
//! `/sys/bus/iio/devices/iio:deviceN/` with one file per channel.

use log::{debug, info};
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::BusError;
use crate::models::SensorKind;

/// Access to the hardware sensors
#[allow(async_fn_in_trait)]
pub trait SensorBus {
    /// Discover attached sensors, returning how many were found
    async fn scan(&mut self) -> Result<usize, BusError>;

    /// Read one raw value in °C, %RH or Pa
    async fn read(&mut self, kind: SensorKind) -> Result<f64, BusError>;
}

/// Channel file and the factor converting its contents to bridge units
fn channel(kind: SensorKind) -> (&'static str, f64) {
    match kind {
        SensorKind::Temperature => ("in_temp_input", 0.001), // milli °C
        SensorKind::Humidity => ("in_humidityrelative_input", 0.001), // milli %RH
        SensorKind::Pressure => ("in_pressure_input", 1000.0), // kPa
    }
}

pub struct IioBus {
    root: PathBuf,
    devices: Vec<PathBuf>,
}

impl IioBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        IioBus {
            root: root.into(),
            devices: Vec::new(),
        }
    }
}

impl SensorBus for IioBus {
    async fn scan(&mut self) -> Result<usize, BusError> {
        let unavailable = |source| BusError::Unavailable {
            path: self.root.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(unavailable)?;
        let mut devices = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            if !entry.file_name().to_string_lossy().starts_with("iio:device") {
                continue;
            }

            let path = entry.path();
            let mut has_channel = false;
            for kind in SensorKind::ALL {
                if tokio::fs::try_exists(path.join(channel(kind).0))
                    .await
                    .unwrap_or(false)
                {
                    has_channel = true;
                    break;
                }
            }

            if has_channel {
                let name = tokio::fs::read_to_string(path.join("name"))
                    .await
                    .unwrap_or_default();
                info!("Found sensor {} at {}", name.trim(), path.display());
                devices.push(path);
            } else {
                debug!("Skipping {}: no environmental channels", path.display());
            }
        }

        devices.sort();
        self.devices = devices;
        Ok(self.devices.len())
    }

    async fn read(&mut self, kind: SensorKind) -> Result<f64, BusError> {
        let (file, scale) = channel(kind);

        for device in &self.devices {
            let raw = match tokio::fs::read_to_string(device.join(file)).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(BusError::Read { kind, source }),
            };

            let value: f64 = raw.trim().parse().map_err(|_| BusError::Parse {
                kind,
                raw: raw.trim().to_string(),
            })?;
            return Ok(value * scale);
        }

        Err(BusError::NoChannel(kind))
    }
}
