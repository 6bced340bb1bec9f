mod gui;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread::spawn,
    time::{Duration, Instant},
};

use canteen::{
    args::KioskArgs,
    config::KioskConfig,
    proximity::{sensor_factory, ProximityDetector},
    worker::{join_with_timeout, lock, StopFlag},
};
use clap::Parser;
use gui::{engage_gui, Snapshot};
use log::error;

/// Seconds of history kept for the chart.
const HISTORY_SECS: f64 = 60.0;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = KioskArgs::parse();
    let mut config = match KioskConfig::from_path_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load {}: {}", args.config.display(), e);
            return;
        }
    };
    args.apply(&mut config);
    let proximity = config.proximity.clone();

    let snapshot = Arc::new(Mutex::new(Snapshot {
        wake_cm: proximity.wake_distance_cm,
        sleep_cm: proximity.sleep_distance_cm,
        ..Snapshot::default()
    }));
    let stop = StopFlag::new();

    let th_snapshot = snapshot.clone();
    let th_stop = stop.clone();
    let sampler = spawn(move || {
        let mut detector = ProximityDetector::new(&proximity, sensor_factory(&proximity, args.simulate));
        let start = Instant::now();
        let mut trace = VecDeque::new();
        while !th_stop.is_raised() {
            let confirmed = detector.poll();
            let now = start.elapsed().as_secs_f64();
            if let Some(distance) = detector.last_distance() {
                trace.push_back((now, distance));
            }
            while trace.front().map_or(false, |&(t, _)| now - t > HISTORY_SECS) {
                trace.pop_front();
            }

            let mut snapshot = lock(&th_snapshot);
            snapshot.now = now;
            snapshot.confirmed = confirmed;
            snapshot.trace = trace.iter().copied().collect();
            drop(snapshot);

            th_stop.sleep(proximity.poll_interval());
        }
    });

    let gui_snapshot = snapshot.clone();
    if let Err(e) = engage_gui(Box::new(move || lock(&gui_snapshot).clone())) {
        error!("{}", e);
    }

    stop.raise();
    join_with_timeout(sampler, Duration::from_secs(1), "sampler");
}
