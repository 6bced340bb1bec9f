//! The user session and who may start one.
//!
//! ```text
//! Idle ──activation──▶ AwaitingCard ──card──▶ Authenticated(uid)
//!  ▲                        │                        │
//!  └──── no card / back ────┘◀── absence / back / visitor button
//! ```
//!
//! Two sources can start a session: the proximity detector's presence edge
//! and the touchscreen's visitor button. The first to take the session lock
//! wins and the other source is muted until the session ends. The card
//! handshake blocks, so it runs on its own thread.

use crate::{
    card_reader::CardReader,
    config::CardConfig,
    display::{Page, Screen, STATUS, UID},
    handler::SessionHooks,
    proximity::ProximityDetector,
    worker::{join_with_timeout, lock, StopFlag},
};

use log::{debug, error, info, warn};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Shown when no usable card was presented in time.
pub const LOGIN_FAILED: &str = "Login failed";

/// Bound on joining the proximity monitor on shutdown.
const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nobody is being served.
    Idle,
    /// A session was requested and the card handshake is running.
    AwaitingCard,
    /// Signed in with this card id.
    Authenticated(String),
}

/// What started a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSource {
    /// Someone stepped up to the kiosk.
    Proximity,
    /// The visitor button or the card page.
    Touchscreen,
}

impl fmt::Display for ActivationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationSource::Proximity => write!(f, "proximity"),
            ActivationSource::Touchscreen => write!(f, "touchscreen"),
        }
    }
}

struct Session {
    state: SessionState,
    source: Option<ActivationSource>,
    /// Bumped on every activation and reset, so a handshake that outlived
    /// its session can tell.
    generation: u64,
    /// Cancels the running card handshake.
    cancel: StopFlag,
}

/// Owns the session and drives the card handshake.
pub struct Orchestrator {
    me: Weak<Orchestrator>,
    screen: Arc<dyn Screen>,
    card_reader: Arc<CardReader>,
    config: CardConfig,
    session: Mutex<Session>,
    proximity_enabled: AtomicBool,
    touch_enabled: AtomicBool,
    stop: StopFlag,
    /// Handshakes not yet known to be finished. Cancelled ones may still
    /// be winding down.
    auth_tasks: Mutex<Vec<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// An idle orchestrator with both activation sources enabled.
    pub fn new(screen: Arc<dyn Screen>, card_reader: Arc<CardReader>, config: &CardConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            screen,
            card_reader,
            config: config.clone(),
            session: Mutex::new(Session {
                state: SessionState::Idle,
                source: None,
                generation: 0,
                cancel: StopFlag::new(),
            }),
            proximity_enabled: AtomicBool::new(true),
            touch_enabled: AtomicBool::new(true),
            stop: StopFlag::new(),
            auth_tasks: Mutex::new(Vec::new()),
            monitor: Mutex::new(None),
        })
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        lock(&self.session).state.clone()
    }

    /// What started the current session.
    pub fn source(&self) -> Option<ActivationSource> {
        lock(&self.session).source
    }

    /// Whether `source` may currently start a session.
    pub fn source_enabled(&self, source: ActivationSource) -> bool {
        match source {
            ActivationSource::Proximity => self.proximity_enabled.load(Ordering::SeqCst),
            ActivationSource::Touchscreen => self.touch_enabled.load(Ordering::SeqCst),
        }
    }

    fn set_sources(&self, proximity: bool, touch: bool) {
        self.proximity_enabled.store(proximity, Ordering::SeqCst);
        self.touch_enabled.store(touch, Ordering::SeqCst);
    }

    /// Move from `Idle` to `AwaitingCard` and start the card handshake.
    /// Returns `false`, doing nothing, if a session is already running or
    /// `source` is muted.
    pub fn request_activation(&self, source: ActivationSource) -> bool {
        if self.stop.is_raised() {
            return false;
        }
        let (generation, cancel) = {
            let mut session = lock(&self.session);
            if session.state != SessionState::Idle {
                info!("Session already active, {} activation dropped", source);
                return false;
            }
            if !self.source_enabled(source) {
                info!("{} activation is disabled, dropped", source);
                return false;
            }
            session.state = SessionState::AwaitingCard;
            session.source = Some(source);
            session.generation += 1;
            session.cancel = StopFlag::new();
            match source {
                ActivationSource::Proximity => self.set_sources(true, false),
                ActivationSource::Touchscreen => self.set_sources(false, true),
            }
            (session.generation, session.cancel.clone())
        };
        info!("Session started by {}, waiting for a card", source);

        let Some(me) = self.me.upgrade() else {
            return false;
        };
        let spawned = thread::Builder::new()
            .name("card-auth".to_owned())
            .spawn(move || me.authenticate(generation, &cancel));
        match spawned {
            Ok(task) => {
                let mut tasks = lock(&self.auth_tasks);
                tasks.retain(|t| !t.is_finished());
                tasks.push(task);
                true
            }
            Err(e) => {
                error!("Could not start card handshake: {}", e);
                self.reset("handshake unavailable");
                false
            }
        }
    }

    /// The blocking card handshake for session `generation`.
    fn authenticate(&self, generation: u64, cancel: &StopFlag) {
        self.screen.show_page(Page::ReadCard);
        let uid = self
            .card_reader
            .read_once_until(self.config.auth_timeout(), cancel)
            .map(|uid| uid.trim().to_owned())
            .filter(|uid| !uid.is_empty());

        match uid {
            Some(uid) => {
                {
                    let mut session = lock(&self.session);
                    if session.generation != generation || session.state != SessionState::AwaitingCard {
                        debug!("Card {} arrived after its session ended", uid);
                        return;
                    }
                    session.state = SessionState::Authenticated(uid.clone());
                }
                info!("User {} signed in", uid);
                self.screen.show_page(Page::VoiceReco);
                self.screen.set_text(UID, &uid);
            }
            None => {
                if cancel.is_raised() {
                    debug!("Card handshake cancelled");
                    return;
                }
                warn!("No valid card presented, signing out");
                self.screen.set_text(STATUS, LOGIN_FAILED);
                cancel.sleep(self.config.failure_pause());
                if self.reset_generation(generation, "authentication failed") {
                    self.screen.show_page(Page::Start);
                }
            }
        }
    }

    /// End the current session, whatever its state. Returns `false` if
    /// there was none.
    pub fn reset(&self, reason: &str) -> bool {
        let mut session = lock(&self.session);
        self.reset_locked(&mut session, reason)
    }

    fn reset_generation(&self, generation: u64, reason: &str) -> bool {
        let mut session = lock(&self.session);
        if session.generation != generation {
            return false;
        }
        self.reset_locked(&mut session, reason)
    }

    fn reset_locked(&self, session: &mut Session, reason: &str) -> bool {
        if session.state == SessionState::Idle {
            return false;
        }
        session.cancel.raise();
        session.state = SessionState::Idle;
        session.source = None;
        session.generation += 1;
        self.set_sources(true, true);
        info!("Session ended: {}", reason);
        true
    }

    /// Confirmed presence edges from the proximity detector.
    pub fn on_presence(&self, present: bool) {
        if present {
            if self.source_enabled(ActivationSource::Proximity) {
                self.request_activation(ActivationSource::Proximity);
            } else {
                debug!("Presence ignored, proximity activation disabled");
            }
        } else if self.reset("user left") {
            self.screen.show_page(Page::Start);
        }
    }

    /// Run `detector` on its own thread, feeding its edges into
    /// [`Orchestrator::on_presence`]. Returns `false` if a monitor is
    /// already running.
    pub fn start_proximity(&self, mut detector: ProximityDetector) -> bool {
        let mut monitor = lock(&self.monitor);
        if monitor.as_ref().map_or(false, |m| !m.is_finished()) {
            return false;
        }
        let Some(me) = self.me.upgrade() else {
            return false;
        };
        let stop = self.stop.clone();
        let spawned = thread::Builder::new().name("proximity".to_owned()).spawn(move || {
            detector.continuously_monitor(&stop, |present| me.on_presence(present));
            detector.release();
        });
        match spawned {
            Ok(handle) => {
                info!("Proximity monitor started");
                *monitor = Some(handle);
                true
            }
            Err(e) => {
                error!("Could not start proximity monitor: {}", e);
                false
            }
        }
    }

    /// Stop the monitor, cancel any handshake and join them all.
    pub fn shutdown(&self) {
        self.stop.raise();
        self.reset("shutdown");
        if let Some(monitor) = lock(&self.monitor).take() {
            join_with_timeout(monitor, MONITOR_JOIN_TIMEOUT, "proximity");
        }
        // Each handshake may sit out one query of its own and one of a
        // handshake queued on the reader before it.
        let timeout = self.config.poll_timeout() * 2 + self.config.stop_timeout();
        let tasks: Vec<_> = lock(&self.auth_tasks).drain(..).collect();
        for task in tasks {
            join_with_timeout(task, timeout, "card-auth");
        }
    }
}

impl SessionHooks for Orchestrator {
    fn visitor_requested(&self) {
        match self.state() {
            SessionState::Idle => {
                self.request_activation(ActivationSource::Touchscreen);
            }
            SessionState::AwaitingCard => {
                info!("Visitor request dropped, already waiting for a card");
            }
            SessionState::Authenticated(_) => {
                self.reset("visitor mode");
            }
        }
    }

    fn back_requested(&self) {
        self.reset("back");
    }

    fn card_presented(&self, uid: String) {
        let uid = uid.trim();
        if uid.is_empty() {
            return;
        }
        let mut session = lock(&self.session);
        match session.state {
            SessionState::Idle => {
                session.source = Some(ActivationSource::Touchscreen);
                self.set_sources(false, true);
            }
            SessionState::AwaitingCard => {
                // The card page beat the handshake to it.
                session.cancel.raise();
            }
            SessionState::Authenticated(_) => {}
        }
        session.generation += 1;
        session.state = SessionState::Authenticated(uid.to_owned());
        info!("User {} signed in from the card page", uid);
    }

    fn current_user(&self) -> Option<String> {
        match &lock(&self.session).state {
            SessionState::Authenticated(uid) => Some(uid.clone()),
            _ => None,
        }
    }

    fn features_armed(&self) -> bool {
        matches!(self.state(), SessionState::Authenticated(_))
    }
}
