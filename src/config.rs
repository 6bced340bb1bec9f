//! Runtime configuration for the kiosk controller.
//!
//! The configuration is a [ron] document. Every section and field has a
//! default, so a partial file (or no file at all) is valid:
//!
//! ```text
//! (
//!     serial: (port: Some("/dev/ttyUSB1"), baud_rate: 9600),
//!     proximity: (wake_distance_cm: 20.0, median_filter: true),
//!     telemetry: Some((host: "http://thingsboard.cloud", token: "abc")),
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs, path::Path, time::Duration};

/// Where the controller looks for its configuration by default.
pub const DEFAULT_CONFIG_PATH: &str = "kiosk.ron";

/// Upper bound on every duration setting, in seconds. Longer values would
/// overflow deadline arithmetic.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// The full controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KioskConfig {
    /// Serial link to the touch display.
    pub serial: SerialConfig,
    /// Ultrasonic ranger and presence debouncing.
    pub proximity: ProximityConfig,
    /// Card reader polling and the authentication handshake.
    pub card: CardConfig,
    /// Speech recognition.
    pub recording: RecordingConfig,
    /// Free-text rendering limits.
    pub display: DisplayConfig,
    /// External AI pipelines.
    pub services: ServicesConfig,
    /// Optional telemetry endpoint.
    pub telemetry: Option<TelemetryConfig>,
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path; when absent the controller asks interactively.
    pub port: Option<String>,
    /// Line speed in bits per second.
    pub baud_rate: u32,
    /// How long one read waits for bytes before the loop re-checks its
    /// stop flag.
    pub poll_interval_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            poll_interval_ms: 50,
        }
    }
}

impl SerialConfig {
    /// [`SerialConfig::poll_interval_ms`] as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Proximity detector settings. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// A reading at or below this distance counts as "close" while nobody
    /// is confirmed present.
    pub wake_distance_cm: f64,
    /// Once someone is confirmed present, they stay "close" up to this
    /// distance.
    pub sleep_distance_cm: f64,
    /// How long readings must stay close before presence is confirmed.
    pub wake_trigger_duration: f64,
    /// How long readings must stay far before absence is confirmed.
    pub sleep_trigger_duration: f64,
    /// Pause between two polls of the ranger.
    pub poll_interval_ms: u64,
    /// Feed the debouncer the median of several readings instead of one.
    pub median_filter: bool,
    /// Readings per median.
    pub median_samples: usize,
    /// Pause between the readings of one median.
    pub median_gap_ms: u64,
    /// Consecutive sensor errors before the sensor handle is recreated.
    pub error_threshold: u32,
    /// Readings below this are glitches.
    pub min_valid_cm: f64,
    /// Readings above this are glitches.
    pub max_valid_cm: f64,
    /// BCM numbering.
    pub trig_pin: u32,
    /// BCM numbering.
    pub echo_pin: u32,
    /// Longest wait for either edge of the echo pulse.
    pub echo_timeout_ms: u64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            wake_distance_cm: 15.0,
            sleep_distance_cm: 25.0,
            wake_trigger_duration: 1.0,
            sleep_trigger_duration: 5.0,
            poll_interval_ms: 150,
            median_filter: false,
            median_samples: 3,
            median_gap_ms: 30,
            error_threshold: 5,
            min_valid_cm: 2.0,
            max_valid_cm: 400.0,
            trig_pin: 17,
            echo_pin: 18,
            echo_timeout_ms: 40,
        }
    }
}

impl ProximityConfig {
    /// [`ProximityConfig::wake_trigger_duration`] as a [`Duration`].
    pub fn wake_trigger(&self) -> Duration {
        secs(self.wake_trigger_duration)
    }

    /// [`ProximityConfig::sleep_trigger_duration`] as a [`Duration`].
    pub fn sleep_trigger(&self) -> Duration {
        secs(self.sleep_trigger_duration)
    }

    /// [`ProximityConfig::poll_interval_ms`] as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// [`ProximityConfig::median_gap_ms`] as a [`Duration`].
    pub fn median_gap(&self) -> Duration {
        Duration::from_millis(self.median_gap_ms)
    }

    /// [`ProximityConfig::echo_timeout_ms`] as a [`Duration`].
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

/// Card reader settings. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CardConfig {
    /// The card-listing tool, `nfc-list` from libnfc.
    pub program: String,
    /// Extra arguments, e.g. `["-t", "1"]`.
    pub args: Vec<String>,
    /// How long the authentication handshake waits for a card.
    pub auth_timeout: f64,
    /// Timeout of one invocation of the tool.
    pub poll_timeout: f64,
    /// Pause after a successful read so a card left on the reader does not
    /// fire again immediately.
    pub cooldown: f64,
    /// How long the login-failed message stays up.
    pub failure_pause: f64,
    /// Bound on joining the polling thread.
    pub stop_timeout: f64,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            program: "nfc-list".to_owned(),
            args: Vec::new(),
            auth_timeout: 30.0,
            poll_timeout: 1.0,
            cooldown: 1.0,
            failure_pause: 2.0,
            stop_timeout: 1.0,
        }
    }
}

impl CardConfig {
    /// [`CardConfig::auth_timeout`] as a [`Duration`].
    pub fn auth_timeout(&self) -> Duration {
        secs(self.auth_timeout)
    }

    /// [`CardConfig::poll_timeout`] as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        secs(self.poll_timeout)
    }

    /// [`CardConfig::cooldown`] as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown)
    }

    /// [`CardConfig::failure_pause`] as a [`Duration`].
    pub fn failure_pause(&self) -> Duration {
        secs(self.failure_pause)
    }

    /// [`CardConfig::stop_timeout`] as a [`Duration`].
    pub fn stop_timeout(&self) -> Duration {
        secs(self.stop_timeout)
    }
}

/// Speech recognition settings. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// A streaming recogniser that prints `PARTIAL <text>` and
    /// `FINAL <text>` lines on stdout.
    pub program: String,
    /// Arguments to the recogniser, e.g. a model path.
    pub args: Vec<String>,
    /// Stop once an utterance was finalised and nothing new arrived for
    /// this long.
    pub max_silence: f64,
    /// Hard limit on one recording.
    pub max_duration: f64,
    /// Bound on joining the recording task after stop was requested.
    pub join_timeout: f64,
    /// Read the answer aloud.
    pub speak_replies: bool,
    /// Voice name handed to the speech synthesiser.
    pub voice: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            program: "kiosk-asr".to_owned(),
            args: Vec::new(),
            max_silence: 1.5,
            max_duration: 30.0,
            join_timeout: 2.0,
            speak_replies: true,
            voice: "en-US-AriaNeural".to_owned(),
        }
    }
}

impl RecordingConfig {
    /// [`RecordingConfig::max_silence`] as a [`Duration`].
    pub fn max_silence(&self) -> Duration {
        secs(self.max_silence)
    }

    /// [`RecordingConfig::max_duration`] as a [`Duration`].
    pub fn max_duration(&self) -> Duration {
        secs(self.max_duration)
    }

    /// [`RecordingConfig::join_timeout`] as a [`Duration`].
    pub fn join_timeout(&self) -> Duration {
        secs(self.join_timeout)
    }
}

/// Limits of the free-text status widget.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Lines kept in the log widget.
    pub max_lines: usize,
    /// Characters per line of the log widget.
    pub max_chars_per_line: usize,
    /// Line-break token understood by the display inside `.txt` strings.
    pub line_break: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_lines: 9,
            max_chars_per_line: 32,
            line_break: "\\r".to_owned(),
        }
    }
}

/// An external program and its fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSpec {
    /// Program name, looked up in `PATH`, or a path.
    pub program: String,
    /// Arguments placed before any per-call ones.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// A spec that runs `program` with no arguments.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
        }
    }
}

/// The programs implementing the AI pipelines. Each takes its input as
/// trailing arguments and writes its answer on stdout.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Prints the path of the captured image.
    pub capture_image: CommandSpec,
    /// Gets the prompt as last argument, prints the answer.
    pub ask_llm: CommandSpec,
    /// Prints `{"dishes": [...]}`.
    pub analyze_dishes: CommandSpec,
    /// Gets the user id as last argument, prints a summary.
    pub identify_dishes: CommandSpec,
    /// Gets the voice and the text as last two arguments.
    pub text_to_speech: CommandSpec,
    /// Upper bound on any single call, in seconds.
    pub timeout: f64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            capture_image: CommandSpec::new("kiosk-capture"),
            ask_llm: CommandSpec::new("kiosk-llm"),
            analyze_dishes: CommandSpec::new("kiosk-dishes"),
            identify_dishes: CommandSpec::new("kiosk-plate"),
            text_to_speech: CommandSpec::new("kiosk-tts"),
            timeout: 60.0,
        }
    }
}

impl ServicesConfig {
    /// [`ServicesConfig::timeout`] as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        secs(self.timeout)
    }
}

/// A ThingsBoard-style telemetry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Base URL, e.g. `http://thingsboard.cloud`.
    pub host: String,
    /// Device access token.
    pub token: String,
}

/// Things that can go wrong loading a [`KioskConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// Reading the file failed.
    IoError(std::io::Error),
    /// The file is not a valid configuration document.
    RonSpannedError(ron::de::SpannedError),
    /// The document parsed but a value makes no sense.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            CE::Invalid(reason) => Cow::from(format!("invalid configuration: {}", reason)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl KioskConfig {
    /// Parse a configuration document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(text).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the configuration at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_ron(&text)
    }

    /// Read the configuration at `path`, falling back to the defaults when
    /// the file does not exist.
    pub fn from_path_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::from_path(path) {
            Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Render the configuration as a ron document.
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.proximity;
        if p.sleep_distance_cm < p.wake_distance_cm {
            return Err(ConfigError::Invalid(
                "sleep_distance_cm must not be below wake_distance_cm".to_owned(),
            ));
        }
        if p.min_valid_cm >= p.max_valid_cm {
            return Err(ConfigError::Invalid(
                "min_valid_cm must be below max_valid_cm".to_owned(),
            ));
        }
        if p.median_filter && p.median_samples == 0 {
            return Err(ConfigError::Invalid(
                "median_samples must be at least 1".to_owned(),
            ));
        }
        let d = &self.display;
        if d.max_lines == 0 || d.max_chars_per_line == 0 {
            return Err(ConfigError::Invalid(
                "display limits must be positive".to_owned(),
            ));
        }
        let durations = [
            p.wake_trigger_duration,
            p.sleep_trigger_duration,
            self.card.auth_timeout,
            self.card.poll_timeout,
            self.card.cooldown,
            self.card.failure_pause,
            self.card.stop_timeout,
            self.recording.max_silence,
            self.recording.max_duration,
            self.recording.join_timeout,
            self.services.timeout,
        ];
        if durations.iter().any(|d| !(0.0..=MAX_DURATION_SECS).contains(d)) {
            return Err(ConfigError::Invalid(format!(
                "durations must be between 0 and {} seconds",
                MAX_DURATION_SECS
            )));
        }
        Ok(())
    }
}

/// `value` seconds, clamped to `0..=MAX_DURATION_SECS`. NaN becomes zero.
pub fn secs(value: f64) -> Duration {
    if value.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value.clamp(0.0, MAX_DURATION_SECS))
}
