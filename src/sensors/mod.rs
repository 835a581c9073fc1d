pub mod iio;
pub mod source;
pub mod validation;

pub use iio::{IioBus, SensorBus};
pub use source::{SensorMode, SensorSource};
pub use validation::validate_all;
