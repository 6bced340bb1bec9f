//! Continuous speech recognition through an external streaming recogniser.
//!
//! The recogniser program captures audio itself and prints one result per
//! line:
//!
//! ```text
//! PARTIAL what is on
//! PARTIAL what is on the menu
//! FINAL what is on the menu today
//! ```

use crate::{
    config::{CommandSpec, RecordingConfig},
    process::terminate,
    worker::StopFlag,
};

use log::{debug, info, warn};
use std::{
    borrow::Cow,
    fmt,
    io::{self, BufRead, BufReader},
    process::{Command, Stdio},
    sync::mpsc::{channel, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

/// How long one wait for output lasts before the stop flag and the time
/// limits are checked again.
const LINE_POLL: Duration = Duration::from_millis(50);

/// Errors from starting the recogniser.
#[derive(Debug)]
pub enum RecognizerError {
    /// The recogniser program is not installed.
    ToolMissing(String),
    /// Starting the recogniser failed.
    IoError(io::Error),
}

impl fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            RecognizerError::ToolMissing(program) => Cow::from(format!("{} not found", program)),
            RecognizerError::IoError(error) => Cow::from(format!("io error: {}", error)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for RecognizerError {}

impl From<io::Error> for RecognizerError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

/// Speech-to-text that runs until told to stop.
pub trait SpeechRecognizer: Send + Sync {
    /// Recognise until `stop` is raised (or the recogniser gives up on its
    /// own). Callbacks run on the calling thread.
    fn recognize_continuous(
        &self,
        stop: &StopFlag,
        on_partial: &mut dyn FnMut(&str),
        on_final: &mut dyn FnMut(&str),
    ) -> Result<(), RecognizerError>;
}

/// One line of recogniser output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// The hypothesis so far; replaces the previous partial.
    Partial(String),
    /// A finished utterance.
    Final(String),
}

impl RecognizerEvent {
    /// Parse a `PARTIAL <text>` or `FINAL <text>` line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        let (kind, text) = line.split_once(' ').unwrap_or((line, ""));
        let text = text.trim().to_owned();
        match kind {
            "PARTIAL" => Some(RecognizerEvent::Partial(text)),
            "FINAL" => Some(RecognizerEvent::Final(text)),
            _ => None,
        }
    }
}

/// Runs the configured recogniser program for each recording.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    command: CommandSpec,
    max_silence: Duration,
    max_duration: Duration,
}

impl CommandRecognizer {
    /// Runs the recogniser named in `config`.
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            command: CommandSpec {
                program: config.program.clone(),
                args: config.args.clone(),
            },
            max_silence: config.max_silence(),
            max_duration: config.max_duration(),
        }
    }
}

impl SpeechRecognizer for CommandRecognizer {
    fn recognize_continuous(
        &self,
        stop: &StopFlag,
        on_partial: &mut dyn FnMut(&str),
        on_final: &mut dyn FnMut(&str),
    ) -> Result<(), RecognizerError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RecognizerError::ToolMissing(self.command.program.clone()),
                _ => RecognizerError::IoError(e),
            })?;

        let (tx, rx) = channel();
        if let Some(stdout) = child.stdout.take() {
            // Ends by itself once the child is gone and the pipe closes.
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        let started = Instant::now();
        let mut last_result = started;
        let mut have_final = false;
        loop {
            if stop.is_raised() {
                debug!("Recognition stopped on request");
                break;
            }
            if started.elapsed() >= self.max_duration {
                info!("Recording reached its {:?} limit", self.max_duration);
                break;
            }
            if have_final && last_result.elapsed() >= self.max_silence {
                debug!("Silence after final result, ending recognition");
                break;
            }

            match rx.recv_timeout(LINE_POLL) {
                Ok(line) => match RecognizerEvent::parse(&line) {
                    Some(RecognizerEvent::Partial(text)) => {
                        last_result = Instant::now();
                        on_partial(&text);
                    }
                    Some(RecognizerEvent::Final(text)) => {
                        last_result = Instant::now();
                        have_final = true;
                        on_final(&text);
                    }
                    None => debug!("Ignoring recogniser output {:?}", line),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if !stop.is_raised() {
                        warn!("Recogniser exited on its own");
                    }
                    break;
                }
            }
        }

        terminate(&mut child, &self.command.program);
        Ok(())
    }
}
