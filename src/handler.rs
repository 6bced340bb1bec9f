//! Reacting to the display's buttons.
//!
//! Every inbound frame is dispatched from the serial listener thread, so
//! nothing here may block for long: recognition, the AI pipelines and
//! speech synthesis all run on their own task threads. The listener only
//! ever waits for a recording to wind down, which is bounded by
//! `join_timeout`.

use crate::{
    card_reader::CardReader,
    config::{DisplayConfig, RecordingConfig},
    display::{Page, Screen, LOG, REPLY, STATUS, UID, VOICE_TEXT},
    log_buffer::LogBuffer,
    protocol::CommandCode,
    recognizer::SpeechRecognizer,
    services::KioskServices,
    worker::{join_with_timeout, lock, spawn_detached, StopFlag},
};

use chrono::Local;
use log::{debug, error, info, warn};
use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

/// How long shutdown waits for each pipeline task.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shown when a voice or photo button is pressed before sign-in.
const SIGN_IN_FIRST: &str = "Please present your card first";

/// What the handler needs from whoever owns the user session.
pub trait SessionHooks: Send + Sync {
    /// The visitor-mode button was pressed.
    fn visitor_requested(&self);

    /// The back button was pressed.
    fn back_requested(&self);

    /// A card was read on the card page.
    fn card_presented(&self, uid: String);

    /// The signed-in user, if any.
    fn current_user(&self) -> Option<String>;

    /// Whether voice and photo features may run.
    fn features_armed(&self) -> bool {
        self.current_user().is_some()
    }
}

/// Whether a recording is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Nothing is being recorded.
    Idle,
    /// The recogniser is listening.
    Recording,
}

struct RecordingSession {
    active: bool,
    stop: StopFlag,
    transcript: Arc<Mutex<String>>,
    task: Option<JoinHandle<()>>,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self {
            active: false,
            stop: StopFlag::new(),
            transcript: Arc::new(Mutex::new(String::new())),
            task: None,
        }
    }
}

/// The multi-line status widget, with a timestamp on every line.
struct StatusLog {
    buffer: Mutex<LogBuffer>,
    screen: Arc<dyn Screen>,
}

impl StatusLog {
    fn append(&self, message: &str) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        let rendered = {
            let mut buffer = lock(&self.buffer);
            buffer.append(&line);
            buffer.render_escaped()
        };
        self.screen.set_escaped_text(LOG, &rendered);
    }

    fn clear(&self) {
        lock(&self.buffer).clear();
        self.screen.set_text(LOG, "");
    }
}

/// Maps display frames to kiosk features.
pub struct CommandHandler {
    screen: Arc<dyn Screen>,
    services: Arc<dyn KioskServices>,
    recognizer: Arc<dyn SpeechRecognizer>,
    card_reader: Arc<CardReader>,
    hooks: Arc<dyn SessionHooks>,
    status: Arc<StatusLog>,
    recording: Mutex<RecordingSession>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: RecordingConfig,
}

impl CommandHandler {
    /// A handler drawing on `screen`. Session questions go to `hooks`.
    pub fn new(
        screen: Arc<dyn Screen>,
        services: Arc<dyn KioskServices>,
        recognizer: Arc<dyn SpeechRecognizer>,
        card_reader: Arc<CardReader>,
        hooks: Arc<dyn SessionHooks>,
        recording: &RecordingConfig,
        display: &DisplayConfig,
    ) -> Self {
        let status = StatusLog {
            buffer: Mutex::new(LogBuffer::new(
                display.max_lines,
                display.max_chars_per_line,
                &display.line_break,
            )),
            screen: screen.clone(),
        };
        Self {
            screen,
            services,
            recognizer,
            card_reader,
            hooks,
            status: Arc::new(status),
            recording: Mutex::new(RecordingSession::default()),
            tasks: Mutex::new(Vec::new()),
            config: recording.clone(),
        }
    }

    /// Handle one command byte from the display.
    pub fn handle_frame(&self, byte: u8) {
        debug!("Frame 0x{:02X}", byte);
        match CommandCode::try_from(byte) {
            Ok(code) => self.handle_command(code),
            Err(e) => warn!("Ignoring frame: {}", e),
        }
    }

    /// Run the feature behind `code`. Anything slow is handed to a task
    /// thread.
    pub fn handle_command(&self, code: CommandCode) {
        info!("Command: {}", code);
        match code {
            CommandCode::VisitorMode => {
                self.screen.show_page(Page::VisitorLogin);
                self.hooks.visitor_requested();
            }
            CommandCode::Back => {
                self.screen.show_page(Page::Home);
                self.hooks.back_requested();
            }
            CommandCode::EnableCardReader => {
                self.enable_card_reader();
            }
            CommandCode::DisableCardReader => {
                self.card_reader.stop_reading();
            }
            CommandCode::StartRecording => {
                if self.armed_for(code) {
                    self.start_recording();
                }
            }
            CommandCode::StopRecording => {
                self.stop_recording();
            }
            CommandCode::CaptureDishPhoto => {
                if self.armed_for(code) {
                    self.screen.show_page(Page::Menu);
                    self.capture_dishes();
                }
            }
            CommandCode::AnalyzePlate => {
                if self.armed_for(code) {
                    self.screen.show_page(Page::Analyze);
                    self.analyze_plate();
                }
            }
            CommandCode::ShowCardPage => {
                self.screen.show_page(Page::ReadCard);
            }
        }
    }

    /// Voice and photo features are for signed-in users only.
    fn armed_for(&self, code: CommandCode) -> bool {
        if self.hooks.features_armed() {
            return true;
        }
        warn!("{} refused, nobody is signed in", code);
        self.screen.set_text(STATUS, SIGN_IN_FIRST);
        false
    }

    /// Whether a recording is in progress.
    pub fn recording_state(&self) -> RecordingState {
        if lock(&self.recording).active {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    /// Start recognising speech in the background. Returns `false` if a
    /// recording is already running.
    pub fn start_recording(&self) -> bool {
        let mut recording = lock(&self.recording);
        if recording.active {
            debug!("Already recording");
            return false;
        }

        // A fresh flag, so a recogniser left over from a detached join keeps
        // seeing its own raised one.
        let stop = StopFlag::new();
        let transcript = Arc::new(Mutex::new(String::new()));
        self.screen.set_text(VOICE_TEXT, "");

        let th_stop = stop.clone();
        let th_transcript = transcript.clone();
        let recognizer = self.recognizer.clone();
        let screen = self.screen.clone();
        let spawned = thread::Builder::new().name("recording".to_owned()).spawn(move || {
            let partial_screen = screen.clone();
            let mut on_partial = |text: &str| {
                partial_screen.set_text(VOICE_TEXT, text);
            };
            let final_screen = screen.clone();
            let mut on_final = |text: &str| {
                let mut transcript = lock(&th_transcript);
                if !transcript.is_empty() && !text.is_empty() {
                    transcript.push(' ');
                }
                transcript.push_str(text);
                final_screen.set_text(VOICE_TEXT, &transcript);
            };
            if let Err(e) = recognizer.recognize_continuous(&th_stop, &mut on_partial, &mut on_final) {
                error!("Speech recognition failed: {}", e);
                screen.set_text(VOICE_TEXT, &format!("Speech recognition unavailable: {}", e));
            }
        });

        match spawned {
            Ok(task) => {
                info!("Recording started");
                *recording = RecordingSession {
                    active: true,
                    stop,
                    transcript,
                    task: Some(task),
                };
                true
            }
            Err(e) => {
                error!("Could not start recording thread: {}", e);
                false
            }
        }
    }

    /// Stop the recording and wait for the recogniser to finish, then hand
    /// a non-empty transcript to the speech pipeline. Returns `false` if
    /// nothing was being recorded.
    pub fn stop_recording(&self) -> bool {
        let Some(transcript) = self.end_recording() else {
            return false;
        };
        if transcript.is_empty() {
            info!("Recording stopped, nothing recognised");
            return true;
        }

        info!("Recording stopped: {:?}", transcript);
        let services = self.services.clone();
        let screen = self.screen.clone();
        let uid = self.hooks.current_user();
        let speak = self.config.speak_replies;
        let voice = self.config.voice.clone();
        self.spawn_task("speech-reply", move || {
            match services.process_speech(&transcript, uid.as_deref()) {
                Ok(reply) => {
                    info!("Reply: {}", reply);
                    screen.set_text(REPLY, &reply);
                    if speak && !reply.is_empty() {
                        spawn_detached("tts", move || {
                            if let Err(e) = services.text_to_speech(&reply, &voice) {
                                warn!("Text to speech failed: {}", e);
                            }
                        });
                    }
                }
                Err(e) => {
                    error!("Speech pipeline failed: {}", e);
                    screen.set_text(REPLY, &format!("Sorry, something went wrong ({})", e));
                }
            }
        });
        true
    }

    /// Raise the stop flag, join the recogniser and return the trimmed
    /// transcript, or `None` if nothing was being recorded.
    fn end_recording(&self) -> Option<String> {
        let (stop, task, transcript) = {
            let mut recording = lock(&self.recording);
            if !recording.active {
                return None;
            }
            recording.active = false;
            (
                recording.stop.clone(),
                recording.task.take(),
                recording.transcript.clone(),
            )
        };

        stop.raise();
        if let Some(task) = task {
            join_with_timeout(task, self.config.join_timeout(), "recording");
        }
        let text = lock(&transcript).trim().to_owned();
        Some(text)
    }

    /// Poll the card reader until a card shows up.
    pub fn enable_card_reader(&self) -> bool {
        let screen = self.screen.clone();
        let hooks = self.hooks.clone();
        let reader = Arc::downgrade(&self.card_reader);
        self.card_reader.start_reading(move |uid| {
            screen.show_page(Page::VoiceReco);
            screen.set_text(UID, &uid);
            hooks.card_presented(uid);
            // This runs on the reader's own thread, which cannot join itself.
            if let Some(reader) = reader.upgrade() {
                spawn_detached("card-reader-stop", move || reader.stop_reading());
            }
        })
    }

    fn capture_dishes(&self) {
        self.status.clear();
        self.status.append("Taking a photo of the counter...");

        let services = self.services.clone();
        let status = self.status.clone();
        self.spawn_task("capture-dishes", move || {
            match services.capture_image() {
                Ok(path) => status.append(&format!("Photo saved: {}", path.display())),
                Err(e) => {
                    error!("Capture failed: {}", e);
                    status.append(&format!("Capture failed: {}", e));
                    return;
                }
            }
            status.append("Recognising dishes...");
            match services.analyze_dishes() {
                Ok(report) => {
                    info!("{} dishes recognised", report.dishes.len());
                    for line in report.summary() {
                        status.append(&line);
                    }
                    status.append("Done");
                }
                Err(e) => {
                    error!("Dish analysis failed: {}", e);
                    status.append(&format!("Analysis failed: {}", e));
                }
            }
        });
    }

    fn analyze_plate(&self) {
        self.status.clear();
        self.status.append("Analysing your plate...");

        let services = self.services.clone();
        let status = self.status.clone();
        let uid = self.hooks.current_user();
        self.spawn_task("analyze-plate", move || {
            match services.identify_dishes_for_user(uid.as_deref()) {
                Ok(text) => {
                    status.append(&text);
                    status.append("Done");
                }
                Err(e) => {
                    error!("Plate analysis failed: {}", e);
                    status.append(&format!("Analysis failed: {}", e));
                }
            }
        });
    }

    fn spawn_task<F>(&self, name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        match thread::Builder::new().name(name.to_owned()).spawn(f) {
            Ok(task) => tasks.push(task),
            Err(e) => error!("Could not start {} task: {}", name, e),
        }
    }

    /// Stop recording (discarding the transcript) and the card reader, and
    /// wait a bounded time for running pipeline tasks.
    pub fn shutdown(&self) {
        if self.end_recording().is_some() {
            info!("Recording discarded");
        }
        self.card_reader.stop_reading();
        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            join_with_timeout(task, TASK_JOIN_TIMEOUT, "pipeline task");
        }
    }
}
