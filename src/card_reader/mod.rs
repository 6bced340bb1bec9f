//! RFID card polling.
//!
//! A [`CardQuery`] asks the hardware once; the [`CardReader`] turns that into
//! a background polling loop with a callback, and into the blocking
//! single-shot read used during sign-in.

mod nfc;

pub use nfc::parse_uid;

use crate::{
    config::{CardConfig, CommandSpec},
    process::run_with_timeout,
    worker::{join_with_timeout, lock, StopFlag},
};

use log::{debug, error, info, warn};
use std::{
    borrow::Cow,
    fmt, io,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Pause between queries that found nothing. `nfc-list` returns at once
/// when no card is on the reader.
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Errors from one card query.
#[derive(Debug)]
pub enum CardError {
    /// The card-listing program is not installed.
    ToolMissing(String),
    /// Running the tool failed.
    IoError(io::Error),
}

impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            CardError::ToolMissing(program) => Cow::from(format!("{} not found, is libnfc installed?", program)),
            CardError::IoError(error) => Cow::from(format!("io error: {}", error)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for CardError {}

impl From<io::Error> for CardError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

/// One attempt at reading a card.
pub trait CardQuery: Send + Sync {
    /// Look for a card for at most `timeout`. No card, or a reader that did
    /// not answer in time, is `Ok(None)`.
    fn query(&self, timeout: Duration) -> Result<Option<String>, CardError>;
}

/// Queries the reader by running `nfc-list` and parsing its output.
#[derive(Debug, Clone)]
pub struct NfcList {
    command: CommandSpec,
}

impl NfcList {
    /// Runs the program and arguments from `config`.
    pub fn new(config: &CardConfig) -> Self {
        Self {
            command: CommandSpec {
                program: config.program.clone(),
                args: config.args.clone(),
            },
        }
    }
}

impl CardQuery for NfcList {
    fn query(&self, timeout: Duration) -> Result<Option<String>, CardError> {
        match run_with_timeout(&self.command, &[], timeout) {
            Ok(Some(output)) => Ok(parse_uid(&output.stdout)),
            Ok(None) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CardError::ToolMissing(self.command.program.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A blank identifier is no identifier.
fn normalize(uid: Option<String>) -> Option<String> {
    uid.map(|u| u.trim().to_owned()).filter(|u| !u.is_empty())
}

struct ReadLoop {
    stop: StopFlag,
    handle: JoinHandle<()>,
}

/// Polls a [`CardQuery`] without blocking its caller.
///
/// Queries are serialised, so the polling loop and [`CardReader::read_once`]
/// never drive the reader at the same time.
pub struct CardReader {
    query: Arc<dyn CardQuery>,
    config: CardConfig,
    device: Arc<Mutex<()>>,
    read_loop: Mutex<Option<ReadLoop>>,
}

impl CardReader {
    /// An idle reader over `query`. Nothing runs until
    /// [`CardReader::start_reading`] or [`CardReader::read_once`].
    pub fn new(query: Arc<dyn CardQuery>, config: &CardConfig) -> Self {
        Self {
            query,
            config: config.clone(),
            device: Arc::new(Mutex::new(())),
            read_loop: Mutex::new(None),
        }
    }

    /// Whether the polling loop is running.
    pub fn is_reading(&self) -> bool {
        lock(&self.read_loop)
            .as_ref()
            .map_or(false, |l| !l.handle.is_finished())
    }

    /// Start polling in the background, calling `on_uid` for every card
    /// seen. Returns `false` if the loop is already running.
    ///
    /// `on_uid` runs on the polling thread. If it wants to stop the reader
    /// it must do so through [`crate::worker::spawn_detached`].
    pub fn start_reading<F>(&self, on_uid: F) -> bool
    where
        F: FnMut(String) + Send + 'static,
    {
        let mut read_loop = lock(&self.read_loop);
        if let Some(running) = read_loop.as_ref() {
            if !running.handle.is_finished() {
                debug!("Card reader already running");
                return false;
            }
        }

        let stop = StopFlag::new();
        let th_stop = stop.clone();
        let query = self.query.clone();
        let device = self.device.clone();
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("card-reader".to_owned())
            .spawn(move || poll_loop(query, device, config, th_stop, on_uid));

        match spawned {
            Ok(handle) => {
                info!("Card reader started");
                *read_loop = Some(ReadLoop { stop, handle });
                true
            }
            Err(e) => {
                error!("Could not start card reader thread: {}", e);
                false
            }
        }
    }

    /// Stop the polling loop and wait for it, up to `stop_timeout`.
    /// Does nothing if it is not running.
    pub fn stop_reading(&self) {
        let Some(ReadLoop { stop, handle }) = lock(&self.read_loop).take() else {
            return;
        };
        stop.raise();
        if join_with_timeout(handle, self.config.stop_timeout(), "card-reader") {
            info!("Card reader stopped");
        }
    }

    /// Block until a card is presented or `timeout` elapses.
    pub fn read_once(&self, timeout: Duration) -> Option<String> {
        self.read_once_until(timeout, &StopFlag::new())
    }

    /// [`CardReader::read_once`] that also gives up when `stop` is raised.
    pub fn read_once_until(&self, timeout: Duration, stop: &StopFlag) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || stop.is_raised() {
                debug!("No card within {:?}", timeout);
                return None;
            }

            let result = {
                let _device = lock(&self.device);
                self.query.query(self.config.poll_timeout().min(remaining))
            };
            match result {
                Ok(uid) => {
                    if let Some(uid) = normalize(uid) {
                        info!("Card read: {}", uid);
                        return Some(uid);
                    }
                }
                Err(CardError::ToolMissing(program)) => {
                    error!("Card reader unavailable: {} not found", program);
                    return None;
                }
                Err(e) => warn!("Card query failed: {}", e),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            stop.sleep(IDLE_BACKOFF.min(remaining));
        }
    }
}

impl Drop for CardReader {
    fn drop(&mut self) {
        self.stop_reading();
    }
}

fn poll_loop<F>(
    query: Arc<dyn CardQuery>,
    device: Arc<Mutex<()>>,
    config: CardConfig,
    stop: StopFlag,
    mut on_uid: F,
) where
    F: FnMut(String),
{
    while !stop.is_raised() {
        let result = {
            let _device = lock(&device);
            query.query(config.poll_timeout())
        };
        match result {
            Ok(uid) => match normalize(uid) {
                Some(uid) => {
                    info!("Card presented: {}", uid);
                    on_uid(uid);
                    stop.sleep(config.cooldown());
                }
                None => {
                    stop.sleep(IDLE_BACKOFF);
                }
            },
            Err(CardError::ToolMissing(program)) => {
                error!("Card reader unavailable: {} not found, polling stops", program);
                break;
            }
            Err(e) => {
                warn!("Card query failed: {}", e);
                stop.sleep(IDLE_BACKOFF);
            }
        }
    }
    debug!("Card reader loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedCards;
    use std::sync::mpsc::channel;

    fn reader(cards: &Arc<ScriptedCards>) -> CardReader {
        let config = CardConfig {
            poll_timeout: 0.05,
            cooldown: 0.05,
            ..CardConfig::default()
        };
        CardReader::new(cards.clone(), &config)
    }

    #[test]
    fn read_once_waits_for_a_card() {
        let cards = Arc::new(ScriptedCards::new(vec![
            Ok(None),
            Ok(Some("  ".to_owned())),
            Ok(Some(" 04a3b2c1\n".to_owned())),
        ]));
        let uid = reader(&cards).read_once(Duration::from_secs(5));
        assert_eq!(uid.as_deref(), Some("04a3b2c1"));
        assert_eq!(cards.calls(), 3);
    }

    #[test]
    fn read_once_times_out() {
        let cards = Arc::new(ScriptedCards::new(vec![]));
        let start = Instant::now();
        assert_eq!(reader(&cards).read_once(Duration::from_millis(250)), None);
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn read_once_gives_up_without_tool() {
        let cards = Arc::new(ScriptedCards::new(vec![Err(CardError::ToolMissing(
            "nfc-list".to_owned(),
        ))]));
        let start = Instant::now();
        assert_eq!(reader(&cards).read_once(Duration::from_secs(10)), None);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn read_once_honours_stop() {
        let cards = Arc::new(ScriptedCards::new(vec![]));
        let stop = StopFlag::new();
        stop.raise();
        assert_eq!(reader(&cards).read_once_until(Duration::from_secs(10), &stop), None);
        assert_eq!(cards.calls(), 0);
    }

    #[test]
    fn polling_reports_cards() {
        let cards = Arc::new(ScriptedCards::new(vec![Ok(None), Ok(Some("abcd".to_owned()))]));
        let reader = reader(&cards);
        let (tx, rx) = channel();
        assert!(reader.start_reading(move |uid| {
            let _ = tx.send(uid);
        }));
        assert!(!reader.start_reading(|_| {}));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "abcd");
        reader.stop_reading();
        assert!(!reader.is_reading());
    }

    #[test]
    fn stop_is_idempotent() {
        let cards = Arc::new(ScriptedCards::new(vec![]));
        let reader = reader(&cards);
        reader.stop_reading();
        assert!(reader.start_reading(|_| {}));
        reader.stop_reading();
        reader.stop_reading();
        assert!(!reader.is_reading());
        // And it can be started again.
        assert!(reader.start_reading(|_| {}));
        reader.stop_reading();
    }

    #[test]
    fn missing_tool_ends_the_loop() {
        let cards = Arc::new(ScriptedCards::new(vec![Err(CardError::ToolMissing(
            "nfc-list".to_owned(),
        ))]));
        let reader = reader(&cards);
        assert!(reader.start_reading(|_| panic!("no card expected")));

        let deadline = Instant::now() + Duration::from_secs(2);
        while reader.is_reading() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!reader.is_reading());
        assert_eq!(cards.calls(), 1);
    }
}
