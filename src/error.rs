use std::path::PathBuf;
use thiserror::Error;

use crate::models::SensorKind;

/// Configuration problems detected at startup
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} must be given as 'min,max' with min <= max, got '{value}'")]
    InvalidRange { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    ZeroInterval { key: &'static str },

    #[error("DEVICE_NAME must not be empty")]
    EmptyName,

    #[error("DEVICE_NAME '{name}' is {len} bytes, at most {max} fit in the advertisement")]
    NameTooLong { name: String, len: usize, max: usize },
}

/// Failures talking to the sensor hardware
#[derive(Error, Debug)]
pub enum BusError {
    #[error("sensor bus not available at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no sensor provides {0}")]
    NoChannel(SensorKind),

    #[error("failed to read {kind}: {source}")]
    Read {
        kind: SensorKind,
        #[source]
        source: std::io::Error,
    },

    #[error("unparseable {kind} value '{raw}'")]
    Parse { kind: SensorKind, raw: String },
}

/// Failures from the radio stack
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("broadcaster has not been started")]
    NotStarted,

    #[error("malformed advertisement payload: {0}")]
    MalformedPayload(&'static str),
}

/// Errors that abort a single poll cycle
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("cycle panicked: {0}")]
    Panic(String),
}
