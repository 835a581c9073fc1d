/// Advertisement payload encoding and decoding for the bridge's sensor record
use log::warn;

use crate::config::DeviceConfig;
use crate::models::{BridgeData, ReadingSet, SensorKind};

// Advertisement protocol constants
pub const COMPANY_ID: u16 = 0xFFFF; // Reserved for testing / custom payloads
pub const FORMAT_VERSION: u8 = 1;
pub const RECORD_LEN: usize = 12;
pub const MAX_ADVERTISEMENT_LEN: usize = 31; // Legacy advertising PDU data limit
pub const MAX_DEVICE_NAME_LEN: usize = 8;
pub const PLACEHOLDER_BATTERY_PERCENT: u8 = 100; // No battery telemetry source yet

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
pub const AD_TYPE_MANUFACTURER: u8 = 0xFF;
const FLAGS_LE_GENERAL_NO_BREDR: u8 = 0x06;

// flags (3) + name header (2) + manufacturer header (2) + record
const FIXED_OVERHEAD: usize = 3 + 2 + 2 + RECORD_LEN;
const _: () = assert!(FIXED_OVERHEAD + MAX_DEVICE_NAME_LEN <= MAX_ADVERTISEMENT_LEN);

/// Encoded advertisement data, ready to hand to a broadcaster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementPayload {
    bytes: Vec<u8>,
}

impl AdvertisementPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Iterate over the `[length][type][value]` elements of the payload
    pub fn elements(&self) -> AdElements<'_> {
        parse_elements(&self.bytes)
    }
}

/// A single advertising data structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdElement<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over AD structures; stops at a zero length or a truncated element
pub struct AdElements<'a> {
    remaining: &'a [u8],
}

pub fn parse_elements(bytes: &[u8]) -> AdElements<'_> {
    AdElements { remaining: bytes }
}

impl<'a> Iterator for AdElements<'a> {
    type Item = AdElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.remaining.split_first()?;
        let len = len as usize;
        if len == 0 || rest.len() < len {
            self.remaining = &[];
            return None;
        }
        let (element, rest) = rest.split_at(len);
        self.remaining = rest;
        Some(AdElement {
            ad_type: element[0],
            data: &element[1..],
        })
    }
}

/// Scale a reading to its fixed-point wire integer
///
/// Rounds half away from zero; values outside the integer range saturate.
fn scaled(value: Option<f64>, factor: f64) -> f64 {
    value.map(|v| (v * factor).round()).unwrap_or(0.0)
}

/// Build the 12-byte manufacturer record
///
/// Layout (little-endian):
/// - Bytes 0-1: Company identifier (0xFFFF)
/// - Byte 2: Format version (1)
/// - Bytes 3-4: Temperature (signed 16-bit, 0.01 °C)
/// - Bytes 5-6: Humidity (unsigned 16-bit, 0.01 %)
/// - Bytes 7-10: Pressure (unsigned 32-bit, 0.1 Pa)
/// - Byte 11: Battery level (percent)
///
/// Absent readings are written as zero.
pub fn encode_record(readings: &ReadingSet, battery: u8) -> [u8; RECORD_LEN] {
    let temperature = scaled(readings.get(SensorKind::Temperature), 100.0) as i16;
    let humidity = scaled(readings.get(SensorKind::Humidity), 100.0) as u16;
    let pressure = scaled(readings.get(SensorKind::Pressure), 10.0) as u32;

    let mut record = [0u8; RECORD_LEN];
    record[0..2].copy_from_slice(&COMPANY_ID.to_le_bytes());
    record[2] = FORMAT_VERSION;
    record[3..5].copy_from_slice(&temperature.to_le_bytes());
    record[5..7].copy_from_slice(&humidity.to_le_bytes());
    record[7..11].copy_from_slice(&pressure.to_le_bytes());
    record[11] = battery;
    record
}

/// Encode a reading set into a complete advertisement payload
///
/// The device name length is checked by [`DeviceConfig::validate`]; this
/// function does not truncate.
pub fn encode(readings: &ReadingSet, config: &DeviceConfig) -> AdvertisementPayload {
    let name = config.device_name.as_bytes();
    let record = encode_record(readings, PLACEHOLDER_BATTERY_PERCENT);

    let mut bytes = Vec::with_capacity(FIXED_OVERHEAD + name.len());
    bytes.extend_from_slice(&[2, AD_TYPE_FLAGS, FLAGS_LE_GENERAL_NO_BREDR]);
    bytes.extend_from_slice(&[(name.len() + 1) as u8, AD_TYPE_COMPLETE_NAME]);
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(&[(RECORD_LEN + 1) as u8, AD_TYPE_MANUFACTURER]);
    bytes.extend_from_slice(&record);

    AdvertisementPayload { bytes }
}

/// Decode the manufacturer data body of a bridge advertisement
///
/// The body is the record without its company identifier, as BlueZ reports
/// manufacturer data keyed by company id:
/// - Byte 0: Format version (1)
/// - Bytes 1-2: Temperature (signed 16-bit, 0.01 °C)
/// - Bytes 3-4: Humidity (unsigned 16-bit, 0.01 %)
/// - Bytes 5-8: Pressure (unsigned 32-bit, 0.1 Pa)
/// - Byte 9: Battery level
///
/// # Returns
/// Some(BridgeData) if the body has the expected length and version, None otherwise
pub fn decode_sensor_data(data: &[u8]) -> Option<BridgeData> {
    if data.len() != RECORD_LEN - 2 || data[0] != FORMAT_VERSION {
        if !data.is_empty() {
            warn!(
                "Invalid bridge data: len={}, format={}",
                data.len(),
                data[0]
            );
        }
        return None;
    }

    let temperature = i16::from_le_bytes([data[1], data[2]]) as f64 / 100.0;
    let humidity = u16::from_le_bytes([data[3], data[4]]) as f64 / 100.0;
    let pressure = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as f64 / 10.0;

    Some(BridgeData {
        version: data[0],
        temperature,
        humidity,
        pressure,
        battery: data[9],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_named(name: &str) -> DeviceConfig {
        DeviceConfig {
            device_name: name.to_string(),
            ..DeviceConfig::default()
        }
    }

    fn full_set(t: f64, h: f64, p: f64) -> ReadingSet {
        ReadingSet::new()
            .with(SensorKind::Temperature, Some(t))
            .with(SensorKind::Humidity, Some(h))
            .with(SensorKind::Pressure, Some(p))
    }

    fn manufacturer_data(payload: &AdvertisementPayload) -> &[u8] {
        payload
            .elements()
            .find(|element| element.ad_type == AD_TYPE_MANUFACTURER)
            .map(|element| element.data)
            .unwrap()
    }

    #[test]
    fn reference_reading_encodes_to_expected_bytes() {
        let readings = ReadingSet::new()
            .with(SensorKind::Temperature, Some(22.35))
            .with(SensorKind::Humidity, None)
            .with(SensorKind::Pressure, Some(101325.0));

        let record = encode_record(&readings, PLACEHOLDER_BATTERY_PERCENT);

        assert_eq!(&record[0..3], &[0xFF, 0xFF, 0x01]);
        assert_eq!(&record[3..5], &[0xBB, 0x08]); // 2235
        assert_eq!(&record[5..7], &[0x00, 0x00]);
        assert_eq!(&record[7..11], &1_013_250u32.to_le_bytes());
        assert_eq!(&record[7..11], &[0x02, 0x76, 0x0F, 0x00]);
        assert_eq!(record[11], 100);
    }

    #[test]
    fn advertisement_layout_matches_wire_format() {
        let payload = encode(&full_set(21.0, 50.0, 100000.0), &config_named("ESP32-SK"));
        let bytes = payload.as_bytes();

        assert_eq!(&bytes[0..3], &[0x02, 0x01, 0x06]);
        assert_eq!(&bytes[3..5], &[9, AD_TYPE_COMPLETE_NAME]);
        assert_eq!(&bytes[5..13], b"ESP32-SK");
        assert_eq!(&bytes[13..15], &[13, AD_TYPE_MANUFACTURER]);
        assert_eq!(bytes.len(), 27);
        assert!(bytes.len() <= MAX_ADVERTISEMENT_LEN);
    }

    #[test]
    fn longest_allowed_name_fits_the_advertisement() {
        let name = "N".repeat(MAX_DEVICE_NAME_LEN);
        let payload = encode(&ReadingSet::new(), &config_named(&name));

        assert!(payload.as_bytes().len() <= MAX_ADVERTISEMENT_LEN);
        assert_eq!(manufacturer_data(&payload).len(), RECORD_LEN);
    }

    #[test]
    fn absent_readings_are_zero_filled_independently() {
        let only_pressure = ReadingSet::new().with(SensorKind::Pressure, Some(95000.0));
        let record = encode_record(&only_pressure, 100);
        assert_eq!(&record[3..7], &[0, 0, 0, 0]);
        assert_eq!(&record[7..11], &950_000u32.to_le_bytes());

        let only_temperature = ReadingSet::new().with(SensorKind::Temperature, Some(-12.5));
        let record = encode_record(&only_temperature, 100);
        assert_eq!(&record[3..5], &(-1250i16).to_le_bytes());
        assert_eq!(&record[5..11], &[0; 6]);

        let empty = encode_record(&ReadingSet::new(), 100);
        assert_eq!(empty.len(), RECORD_LEN);
        assert_eq!(&empty[3..11], &[0; 8]);
    }

    #[test]
    fn encoding_is_deterministic() {
        let readings = full_set(18.25, 63.4, 99876.5);
        let config = config_named("BOAT");
        assert_eq!(encode(&readings, &config), encode(&readings, &config));
    }

    #[test]
    fn decoded_values_round_trip_within_precision() {
        let cases = [
            (-40.0, 0.0, 30000.0),
            (85.0, 100.0, 110000.0),
            (22.35, 47.5, 101325.3),
            (-0.01, 0.01, 30000.1),
        ];

        for (t, h, p) in cases {
            let payload = encode(&full_set(t, h, p), &config_named("ESP32-SK"));
            let manufacturer = manufacturer_data(&payload);
            assert_eq!(u16::from_le_bytes([manufacturer[0], manufacturer[1]]), COMPANY_ID);

            let decoded = decode_sensor_data(&manufacturer[2..]).unwrap();
            assert!((decoded.temperature - t).abs() <= 0.005 + 1e-9, "temperature {t}");
            assert!((decoded.humidity - h).abs() <= 0.005 + 1e-9, "humidity {h}");
            assert!((decoded.pressure - p).abs() <= 0.05 + 1e-9, "pressure {p}");
            assert_eq!(decoded.battery, PLACEHOLDER_BATTERY_PERCENT);
        }
    }

    #[test]
    fn out_of_type_range_values_saturate() {
        let readings = ReadingSet::new()
            .with(SensorKind::Temperature, Some(500.0))
            .with(SensorKind::Humidity, Some(-3.0));
        let record = encode_record(&readings, 100);

        assert_eq!(&record[3..5], &i16::MAX.to_le_bytes());
        assert_eq!(&record[5..7], &[0, 0]);
    }

    #[test]
    fn decoder_rejects_wrong_length_or_version() {
        assert_eq!(decode_sensor_data(&[]), None);
        assert_eq!(decode_sensor_data(&[1, 2, 3]), None);
        assert_eq!(decode_sensor_data(&[2, 0, 0, 0, 0, 0, 0, 0, 0, 100]), None);
    }

    #[test]
    fn element_parser_stops_on_truncation() {
        let bytes = [2, 0x01, 0x06, 5, 0x09, b'a'];
        let elements: Vec<_> = parse_elements(&bytes).collect();

        assert_eq!(
            elements,
            vec![AdElement {
                ad_type: 0x01,
                data: &[0x06]
            }]
        );
    }
}
