//! Debouncing of distance readings into a presence signal.

use super::{DistanceSensor, SensorError};
use crate::{config::ProximityConfig, telemetry::TelemetrySink, worker::StopFlag};

use log::{debug, error, info, warn};
use serde_json::json;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Opens (or re-opens) the underlying sensor.
pub type SensorFactory = Box<dyn FnMut() -> Result<Box<dyn DistanceSensor>, SensorError> + Send>;

/// Dwell-time debouncing of a boolean signal.
///
/// `confirmed` only becomes `true` once the raw signal has been `true`
/// without interruption for `wake_trigger`, and only becomes `false` once
/// it has been `false` without interruption for `sleep_trigger`. Any change
/// of the raw signal restarts the clock.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    raw_close: bool,
    confirmed: bool,
    state_entered_at: Instant,
    wake_trigger: Duration,
    sleep_trigger: Duration,
}

impl Hysteresis {
    /// Starts out far and unconfirmed.
    pub fn new(wake_trigger: Duration, sleep_trigger: Duration, now: Instant) -> Self {
        Self {
            raw_close: false,
            confirmed: false,
            state_entered_at: now,
            wake_trigger,
            sleep_trigger,
        }
    }

    /// Feed one raw sample taken at `now` and return the confirmed state.
    pub fn update(&mut self, raw_close: bool, now: Instant) -> bool {
        if raw_close != self.raw_close {
            self.raw_close = raw_close;
            self.state_entered_at = now;
        }

        let held = now.saturating_duration_since(self.state_entered_at);
        if self.raw_close && !self.confirmed && held >= self.wake_trigger {
            self.confirmed = true;
        } else if !self.raw_close && self.confirmed && held >= self.sleep_trigger {
            self.confirmed = false;
        }
        self.confirmed
    }

    /// The debounced state.
    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    /// The last raw sample.
    pub fn raw_close(&self) -> bool {
        self.raw_close
    }

    /// When the raw signal last changed.
    pub fn state_entered_at(&self) -> Instant {
        self.state_entered_at
    }
}

/// Turns noisy distance readings into a debounced presence signal.
///
/// The sensor handle is opened lazily and thrown away after
/// `error_threshold` consecutive failures, so a wedged ranger is re-opened
/// on the next poll instead of stopping the loop.
pub struct ProximityDetector {
    config: ProximityConfig,
    open_sensor: SensorFactory,
    sensor: Option<Box<dyn DistanceSensor>>,
    consecutive_errors: u32,
    hysteresis: Hysteresis,
    last_distance: Option<f64>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl ProximityDetector {
    /// A detector that opens its sensor through `open_sensor` on first use.
    pub fn new(config: &ProximityConfig, open_sensor: SensorFactory) -> Self {
        Self {
            hysteresis: Hysteresis::new(config.wake_trigger(), config.sleep_trigger(), Instant::now()),
            config: config.clone(),
            open_sensor,
            sensor: None,
            consecutive_errors: 0,
            last_distance: None,
            telemetry: None,
        }
    }

    /// Publish presence edges to `sink`.
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// The current debounced state.
    pub fn confirmed(&self) -> bool {
        self.hysteresis.confirmed()
    }

    /// The last valid reading, if any.
    pub fn last_distance(&self) -> Option<f64> {
        self.last_distance
    }

    /// Whether a reading is physically plausible for the ranger.
    pub fn is_valid(&self, distance: f64) -> bool {
        distance.is_finite() && distance >= self.config.min_valid_cm && distance <= self.config.max_valid_cm
    }

    fn record_error(&mut self, e: SensorError) {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.config.error_threshold.max(1) {
            error!(
                "Distance sensor failed {} times in a row ({}), re-initialising",
                self.consecutive_errors, e
            );
            self.sensor = None;
            self.consecutive_errors = 0;
        } else {
            warn!("Distance sensor error: {}", e);
        }
    }

    /// Take one reading. Out-of-range values and sensor errors yield `None`
    /// and leave the debounced state untouched.
    pub fn measure(&mut self) -> Option<f64> {
        if self.sensor.is_none() {
            match (self.open_sensor)() {
                Ok(sensor) => {
                    info!("Distance sensor ready");
                    self.sensor = Some(sensor);
                }
                Err(e) => {
                    self.record_error(e);
                    return None;
                }
            }
        }

        let reading = self.sensor.as_mut()?.measure_distance();
        match reading {
            Ok(distance) => {
                self.consecutive_errors = 0;
                if self.is_valid(distance) {
                    Some(distance)
                } else {
                    debug!("Discarding out-of-range reading {:.1} cm", distance);
                    None
                }
            }
            Err(e) => {
                self.record_error(e);
                None
            }
        }
    }

    /// The median of up to `median_samples` valid readings, or `None` if
    /// none of them was valid.
    pub fn measure_filtered(&mut self) -> Option<f64> {
        let samples = self.config.median_samples.max(1);
        let mut readings = Vec::with_capacity(samples);
        for i in 0..samples {
            if i > 0 {
                thread::sleep(self.config.median_gap());
            }
            if let Some(d) = self.measure() {
                readings.push(d);
            }
        }
        median(&mut readings)
    }

    /// Take a reading (filtered if configured) and update the debounced
    /// state. Returns the confirmed state.
    pub fn poll(&mut self) -> bool {
        let reading = if self.config.median_filter {
            self.measure_filtered()
        } else {
            self.measure()
        };
        match reading {
            Some(distance) => self.apply_reading(distance, Instant::now()),
            None => self.confirmed(),
        }
    }

    /// Feed a reading taken at `now` into the debouncer. Publishes telemetry
    /// only when the confirmed state actually changes.
    pub fn apply_reading(&mut self, distance: f64, now: Instant) -> bool {
        if !self.is_valid(distance) {
            return self.confirmed();
        }
        self.last_distance = Some(distance);

        let was_confirmed = self.confirmed();
        let threshold = if was_confirmed {
            self.config.sleep_distance_cm
        } else {
            self.config.wake_distance_cm
        };
        let confirmed = self.hysteresis.update(distance <= threshold, now);

        if confirmed != was_confirmed {
            if confirmed {
                info!("User present ({:.1} cm)", distance);
            } else {
                info!("User left ({:.1} cm)", distance);
            }
            if let Some(sink) = &self.telemetry {
                sink.publish(json!({
                    "user_present": confirmed,
                    "distance_cm": distance,
                }));
            }
        }
        confirmed
    }

    /// Poll every `poll_interval` until `stop` is raised, calling `on_edge`
    /// with the new state each time the confirmed state changes.
    pub fn continuously_monitor<F>(&mut self, stop: &StopFlag, mut on_edge: F)
    where
        F: FnMut(bool),
    {
        let interval = self.config.poll_interval();
        while !stop.is_raised() {
            let before = self.confirmed();
            let after = self.poll();
            if after != before {
                on_edge(after);
            }
            stop.sleep(interval);
        }
        debug!("Proximity monitor stopped");
    }

    /// Release the sensor handle. The next reading re-opens it.
    pub fn release(&mut self) {
        self.sensor = None;
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeTelemetry, ScriptedSensor};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    const WAKE: Duration = Duration::from_secs(1);
    const SLEEP: Duration = Duration::from_secs(5);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn detector(readings: Vec<Result<f64, SensorError>>) -> (ProximityDetector, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let th_opens = opens.clone();
        let sensor = ScriptedSensor::new(readings);
        let config = ProximityConfig {
            median_gap_ms: 0,
            ..ProximityConfig::default()
        };
        let factory: SensorFactory = Box::new(move || {
            th_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(sensor.clone()) as Box<dyn DistanceSensor>)
        });
        (ProximityDetector::new(&config, factory), opens)
    }

    #[test]
    fn short_approach_is_never_confirmed() {
        let t0 = Instant::now();
        let mut h = Hysteresis::new(WAKE, SLEEP, t0);
        for i in 0..9 {
            assert!(!h.update(true, t0 + ms(i * 100)));
        }
        for i in 9..200 {
            assert!(!h.update(false, t0 + ms(i * 100)));
        }
    }

    #[test]
    fn approach_then_leave() {
        let t0 = Instant::now();
        let mut h = Hysteresis::new(WAKE, SLEEP, t0);

        // Close from 0.0 s through 1.0 s.
        for i in 0..10 {
            assert!(!h.update(true, t0 + ms(i * 100)), "confirmed early at {i}");
        }
        assert!(h.update(true, t0 + ms(1000)));

        // Far from 1.1 s on; absence is confirmed 5 s later, not before.
        for i in 11..61 {
            assert!(h.update(false, t0 + ms(i * 100)), "dropped early at {i}");
        }
        assert!(!h.update(false, t0 + ms(6100)));
    }

    #[test]
    fn flicker_restarts_the_clock() {
        let t0 = Instant::now();
        let mut h = Hysteresis::new(WAKE, SLEEP, t0);
        h.update(true, t0);
        h.update(false, t0 + ms(800));
        assert!(!h.update(true, t0 + ms(900)));
        assert!(!h.update(true, t0 + ms(1500)));
        assert!(h.update(true, t0 + ms(1900)));
        assert_eq!(h.state_entered_at(), t0 + ms(900));
    }

    #[test]
    fn out_of_range_readings_leave_state_alone() {
        let (mut det, _) = detector(vec![]);
        let t0 = Instant::now();
        det.apply_reading(10.0, t0);
        assert!(det.apply_reading(10.0, t0 + ms(1000)));
        // Glitches during the absence window do not count as far readings.
        for i in 0..100 {
            assert!(det.apply_reading(0.5, t0 + ms(1000 + i * 100)));
            assert!(det.apply_reading(900.0, t0 + ms(1000 + i * 100)));
        }
        assert_eq!(det.last_distance(), Some(10.0));
    }

    #[test]
    fn sleep_distance_keeps_present_user() {
        let (mut det, _) = detector(vec![]);
        let t0 = Instant::now();
        // 20 cm is beyond the wake distance: never wakes.
        for i in 0..30 {
            assert!(!det.apply_reading(20.0, t0 + ms(i * 100)));
        }
        let t1 = t0 + ms(3000);
        det.apply_reading(10.0, t1);
        assert!(det.apply_reading(10.0, t1 + WAKE));
        // 20 cm is inside the sleep distance: stays present.
        for i in 0..100 {
            assert!(det.apply_reading(20.0, t1 + WAKE + ms(i * 100)));
        }
    }

    #[test]
    fn telemetry_only_on_edges() {
        let (det, _) = detector(vec![]);
        let sink = Arc::new(FakeTelemetry::new());
        let mut det = det.with_telemetry(sink.clone());
        let t0 = Instant::now();

        for i in 0..30 {
            det.apply_reading(10.0, t0 + ms(i * 100));
        }
        for i in 30..100 {
            det.apply_reading(100.0, t0 + ms(i * 100));
        }

        let sent = sink.payloads();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["user_present"], true);
        assert_eq!(sent[1]["user_present"], false);
    }

    #[test]
    fn measure_discards_invalid() {
        let (mut det, _) = detector(vec![Ok(1.0), Ok(401.0), Ok(55.5)]);
        assert_eq!(det.measure(), None);
        assert_eq!(det.measure(), None);
        assert_eq!(det.measure(), Some(55.5));
    }

    #[test]
    fn median_filter() {
        let (mut det, _) = detector(vec![Ok(30.0), Ok(500.0), Ok(10.0), Ok(20.0), Ok(90.0), Ok(40.0)]);
        assert_eq!(det.measure_filtered(), Some(20.0));
        assert_eq!(det.measure_filtered(), Some(40.0));
        assert_eq!(det.measure_filtered(), None);
    }

    #[test]
    fn median_of_even_count() {
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn sensor_is_recreated_after_repeated_errors() {
        let mut readings: Vec<Result<f64, SensorError>> =
            (0..5).map(|_| Err(SensorError::EchoTimeout)).collect();
        readings.push(Ok(42.0));
        let (mut det, opens) = detector(readings);

        for _ in 0..5 {
            assert_eq!(det.measure(), None);
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(det.measure(), Some(42.0));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn monitor_reports_edges_and_stops() {
        let readings: Vec<Result<f64, SensorError>> = (0..10_000).map(|_| Ok(10.0)).collect();
        let (det, _) = detector(readings);
        let mut det = ProximityDetector {
            config: ProximityConfig {
                poll_interval_ms: 5,
                wake_trigger_duration: 0.05,
                ..ProximityConfig::default()
            },
            hysteresis: Hysteresis::new(ms(50), SLEEP, Instant::now()),
            ..det
        };

        let stop = StopFlag::new();
        let th_stop = stop.clone();
        let mut edges = Vec::new();
        det.continuously_monitor(&stop, |present| {
            edges.push(present);
            th_stop.raise();
        });
        assert_eq!(edges, vec![true]);
    }
}
