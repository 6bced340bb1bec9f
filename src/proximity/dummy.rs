//! A simulated ranger.

use super::{DistanceSensor, SensorError};

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::{Duration, Instant};

/// A simulated ranger for running the controller without hardware.
///
/// Alternates between someone standing in front of the kiosk for `visit`
/// and an empty aisle for `gap`, adds uniform noise, and now and then
/// produces an out-of-range glitch or a failed reading.
#[derive(Debug)]
pub struct DummySensor {
    started: Instant,
    near: f64,
    far: f64,
    noise: f64,
    visit: Duration,
    gap: Duration,
    glitch_rate: f64,
    error_rate: f64,
    rng: StdRng,
}

/// Builder for [`DummySensor`].
#[derive(Debug, Clone)]
pub struct DummySensorBuilder {
    near: f64,
    far: f64,
    noise: f64,
    visit: Duration,
    gap: Duration,
    glitch_rate: f64,
    error_rate: f64,
}

impl Default for DummySensorBuilder {
    fn default() -> Self {
        Self {
            near: 10.0,
            far: 150.0,
            noise: 2.0,
            visit: Duration::from_secs(20),
            gap: Duration::from_secs(15),
            glitch_rate: 0.02,
            error_rate: 0.0,
        }
    }
}

impl DummySensorBuilder {
    /// Distance of a visitor.
    pub fn near(mut self, cm: f64) -> Self {
        self.near = cm;
        self
    }

    /// Distance of the opposite wall.
    pub fn far(mut self, cm: f64) -> Self {
        self.far = cm;
        self
    }

    /// Half-width of the uniform noise added to every reading.
    pub fn noise(mut self, cm: f64) -> Self {
        self.noise = cm.abs();
        self
    }

    /// How long each visit lasts.
    pub fn visit(mut self, visit: Duration) -> Self {
        self.visit = visit;
        self
    }

    /// How long the aisle stays empty between visits.
    pub fn gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    /// Probability of an out-of-range reading.
    pub fn glitch_rate(mut self, rate: f64) -> Self {
        self.glitch_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Probability of a failed reading.
    pub fn error_rate(mut self, rate: f64) -> Self {
        self.error_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Start the simulated schedule now.
    pub fn build(self) -> DummySensor {
        DummySensor {
            started: Instant::now(),
            near: self.near,
            far: self.far,
            noise: self.noise,
            visit: self.visit,
            gap: self.gap,
            glitch_rate: self.glitch_rate,
            error_rate: self.error_rate,
            rng: StdRng::from_entropy(),
        }
    }
}

impl DummySensor {
    /// A builder with the default schedule.
    pub fn builder() -> DummySensorBuilder {
        DummySensorBuilder::default()
    }

    /// Whether the simulated visitor is present at `elapsed` since start.
    /// Each cycle begins with the empty aisle.
    fn visitor_present(&self, elapsed: Duration) -> bool {
        let cycle = (self.gap + self.visit).as_secs_f64();
        if cycle <= 0.0 {
            return false;
        }
        elapsed.as_secs_f64() % cycle >= self.gap.as_secs_f64()
    }
}

impl DistanceSensor for DummySensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        if self.rng.gen_bool(self.error_rate) {
            return Err(SensorError::EchoTimeout);
        }
        if self.rng.gen_bool(self.glitch_rate) {
            return Ok(if self.rng.gen() { 0.3 } else { 1200.0 });
        }

        let base = if self.visitor_present(self.started.elapsed()) {
            self.near
        } else {
            self.far
        };
        let jitter = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..self.noise)
        } else {
            0.0
        };
        Ok(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_sensor_reports_far_wall_first() {
        let mut sensor = DummySensor::builder()
            .noise(0.0)
            .glitch_rate(0.0)
            .gap(Duration::from_secs(60))
            .build();
        assert_eq!(sensor.measure_distance().unwrap(), 150.0);
    }

    #[test]
    fn visitor_schedule() {
        let sensor = DummySensor::builder()
            .gap(Duration::from_secs(2))
            .visit(Duration::from_secs(3))
            .build();
        assert!(!sensor.visitor_present(Duration::from_millis(1999)));
        assert!(sensor.visitor_present(Duration::from_millis(2000)));
        assert!(sensor.visitor_present(Duration::from_millis(4999)));
        assert!(!sensor.visitor_present(Duration::from_millis(5000)));
    }

    #[test]
    fn noise_stays_in_band() {
        let mut sensor = DummySensor::builder()
            .noise(1.5)
            .glitch_rate(0.0)
            .gap(Duration::from_secs(60))
            .build();
        for _ in 0..200 {
            let d = sensor.measure_distance().unwrap();
            assert!((148.5..151.5).contains(&d), "{d}");
        }
    }

    #[test]
    fn always_failing_sensor() {
        let mut sensor = DummySensor::builder().error_rate(1.0).build();
        assert!(matches!(
            sensor.measure_distance(),
            Err(SensorError::EchoTimeout)
        ));
    }
}
