use std::fmt;

/// The three environmental quantities the bridge knows how to sample and broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
    ];

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Pressure => "Pa",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Pressure => "pressure",
        };
        f.write_str(name)
    }
}

/// One value of `T` for each sensor kind
///
/// Used for per-kind configuration (offsets, precision, mock ranges, enable flags).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerKind<T> {
    pub temperature: T,
    pub humidity: T,
    pub pressure: T,
}

impl<T: Copy> PerKind<T> {
    pub fn get(&self, kind: SensorKind) -> T {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Humidity => self.humidity,
            SensorKind::Pressure => self.pressure,
        }
    }
}

/// Readings gathered during one poll cycle
///
/// Temperature is in °C, humidity in %RH and pressure in Pa. A kind that was
/// not sampled, or whose sample failed, is `None`. Values are fixed once the
/// set is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingSet {
    temperature: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the set with `kind` recorded as `value`
    pub fn with(mut self, kind: SensorKind, value: Option<f64>) -> Self {
        let value = value.filter(|v| v.is_finite());
        match kind {
            SensorKind::Temperature => self.temperature = value,
            SensorKind::Humidity => self.humidity = value,
            SensorKind::Pressure => self.pressure = value,
        }
        self
    }

    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Humidity => self.humidity,
            SensorKind::Pressure => self.pressure,
        }
    }

    /// Iterate over the readings that are present
    pub fn present(&self) -> impl Iterator<Item = (SensorKind, f64)> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter_map(move |kind| self.get(kind).map(|value| (kind, value)))
    }
}

/// Outcome of checking one reading against its plausible range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationResult {
    pub kind: SensorKind,
    pub value: Option<f64>,
    pub valid: bool,
}

/// Sensor values recovered from a received advertisement
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeData {
    pub version: u8,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub battery: u8,
}
