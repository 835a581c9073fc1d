/// Plausibility checks for sensor readings
use log::warn;
use std::ops::RangeInclusive;

use crate::models::{ReadingSet, SensorKind, ValidationResult};

/// Inclusive range a reading of `kind` must fall in
///
/// - temperature: -40 to 85 °C (typical sensor operating range)
/// - humidity: 0 to 100 %
/// - pressure: 30000 to 110000 Pa (300 to 1100 hPa)
pub fn valid_range(kind: SensorKind) -> RangeInclusive<f64> {
    match kind {
        SensorKind::Temperature => -40.0..=85.0,
        SensorKind::Humidity => 0.0..=100.0,
        SensorKind::Pressure => 30_000.0..=110_000.0,
    }
}

/// Check a single reading; an absent reading is never valid
pub fn validate(kind: SensorKind, value: Option<f64>) -> bool {
    value.is_some_and(|v| valid_range(kind).contains(&v))
}

/// Check every present reading in the set without altering it
pub fn validate_set(readings: &ReadingSet) -> Vec<ValidationResult> {
    readings
        .present()
        .map(|(kind, value)| ValidationResult {
            kind,
            value: Some(value),
            valid: validate(kind, Some(value)),
        })
        .collect()
}

/// True when every present reading is within its range
///
/// Absent kinds are not counted as failures. Each out-of-range reading is
/// logged as a warning; callers still encode and broadcast the set.
pub fn validate_all(readings: &ReadingSet) -> bool {
    let mut all_valid = true;
    for result in validate_set(readings).iter().filter(|r| !r.valid) {
        warn!(
            "Invalid {}: {:?} {}",
            result.kind,
            result.value,
            result.kind.unit()
        );
        all_valid = false;
    }
    all_valid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        assert!(validate(SensorKind::Temperature, Some(-40.0)));
        assert!(validate(SensorKind::Temperature, Some(85.0)));
        assert!(!validate(SensorKind::Temperature, Some(85.01)));
        assert!(validate(SensorKind::Humidity, Some(0.0)));
        assert!(validate(SensorKind::Humidity, Some(100.0)));
        assert!(!validate(SensorKind::Humidity, Some(-0.1)));
        assert!(validate(SensorKind::Pressure, Some(30_000.0)));
        assert!(validate(SensorKind::Pressure, Some(110_000.0)));
        assert!(!validate(SensorKind::Pressure, Some(1013.25)));
    }

    #[test]
    fn absent_reading_is_invalid() {
        for kind in SensorKind::ALL {
            assert!(!validate(kind, None));
        }
    }

    #[test]
    fn empty_set_is_valid() {
        assert!(validate_all(&ReadingSet::new()));
        assert!(validate_set(&ReadingSet::new()).is_empty());
    }

    #[test]
    fn absent_kinds_do_not_fail_the_set() {
        let readings = ReadingSet::new()
            .with(SensorKind::Temperature, Some(21.0))
            .with(SensorKind::Humidity, None);
        assert!(validate_all(&readings));
    }

    #[test]
    fn one_out_of_range_reading_fails_the_set_but_keeps_values() {
        let readings = ReadingSet::new()
            .with(SensorKind::Temperature, Some(21.0))
            .with(SensorKind::Pressure, Some(120_000.0));

        assert!(!validate_all(&readings));

        let results = validate_set(&readings);
        assert_eq!(
            results,
            vec![
                ValidationResult {
                    kind: SensorKind::Temperature,
                    value: Some(21.0),
                    valid: true
                },
                ValidationResult {
                    kind: SensorKind::Pressure,
                    value: Some(120_000.0),
                    valid: false
                },
            ]
        );
        assert_eq!(readings.get(SensorKind::Pressure), Some(120_000.0));
    }
}
