//! Presence detection with an ultrasonic ranger.
//!
//! A [`DistanceSensor`] produces raw, noisy distances; the
//! [`ProximityDetector`] turns them into a debounced "someone is standing
//! here" signal.

mod detector;
mod dummy;
mod hcsr04;

pub use detector::{Hysteresis, ProximityDetector, SensorFactory};
pub use dummy::{DummySensor, DummySensorBuilder};
pub use hcsr04::HcSr04;

use crate::config::ProximityConfig;

use log::info;
use std::{borrow::Cow, fmt, io};

/// Opens the HC-SR04 described by `config`, or the simulated sensor when
/// `simulate` is set.
pub fn sensor_factory(config: &ProximityConfig, simulate: bool) -> SensorFactory {
    if simulate {
        info!("Using the simulated distance sensor");
        return Box::new(|| Ok(Box::new(DummySensor::builder().build()) as Box<dyn DistanceSensor>));
    }
    let (trig, echo, timeout) = (config.trig_pin, config.echo_pin, config.echo_timeout());
    Box::new(move || Ok(Box::new(HcSr04::open(trig, echo, timeout)?) as Box<dyn DistanceSensor>))
}

/// Something that can measure a distance in centimetres.
pub trait DistanceSensor: Send {
    /// Take one reading. The value may be out of range; filtering is the
    /// detector's job.
    fn measure_distance(&mut self) -> Result<f64, SensorError>;
}

impl<S: DistanceSensor + ?Sized> DistanceSensor for Box<S> {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        (**self).measure_distance()
    }
}

/// Errors a distance sensor can report.
#[derive(Debug)]
pub enum SensorError {
    /// GPIO access failed.
    IoError(io::Error),
    /// The echo line did not change within the allowed time.
    EchoTimeout,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            SensorError::IoError(error) => Cow::from(format!("io error: {}", error)),
            SensorError::EchoTimeout => Cow::from("no echo from ranger"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for SensorError {}

impl From<io::Error> for SensorError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}
