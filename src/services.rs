//! The AI pipelines the kiosk delegates to.
//!
//! Camera capture, the language model, dish recognition and speech synthesis
//! all live outside this crate. [`KioskServices`] is the narrow contract the
//! controller uses; [`CommandServices`] fulfils it by running one helper
//! program per pipeline.

use crate::{
    config::{CommandSpec, ServicesConfig},
    process::run_with_timeout,
};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, io, path::PathBuf};

/// Appended to every speech prompt.
const REPLY_INSTRUCTION: &str = "Please provide appropriate responses or perform corresponding actions \
     based on the user's voice input.(DO NOT over 50 words)";

/// Errors from an external pipeline. The `Display` form is short enough to
/// put on the screen.
#[derive(Debug)]
pub enum ServiceError {
    /// The helper program is not installed.
    ToolMissing(String),
    /// The helper did not answer in time and was killed.
    Timeout(String),
    /// The helper exited unsuccessfully.
    Failed {
        /// The helper that failed.
        program: String,
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
        /// What it printed on stderr.
        stderr: String,
    },
    /// The helper answered with something unusable.
    BadOutput(String),
    /// The helper's JSON did not parse.
    JsonError(serde_json::Error),
    /// Starting or talking to the helper failed.
    IoError(io::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ServiceError::ToolMissing(program) => Cow::from(format!("{} not installed", program)),
            ServiceError::Timeout(program) => Cow::from(format!("{} timed out", program)),
            ServiceError::Failed { program, code, .. } => match code {
                Some(code) => Cow::from(format!("{} failed ({})", program, code)),
                None => Cow::from(format!("{} was killed", program)),
            },
            ServiceError::BadOutput(why) => Cow::from(format!("bad answer: {}", why)),
            ServiceError::JsonError(error) => Cow::from(format!("bad answer: {}", error)),
            ServiceError::IoError(error) => Cow::from(format!("io error: {}", error)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ServiceError {}

impl From<io::Error> for ServiceError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonError(value)
    }
}

/// One recognised dish.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Dish {
    /// Dish name as shown on the menu.
    pub name: String,
    /// Short note, e.g. ingredients.
    #[serde(default)]
    pub description: Option<String>,
}

/// What the dish analysis pipeline found on the counter.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DishReport {
    /// In the order they were found.
    #[serde(default)]
    pub dishes: Vec<Dish>,
}

impl DishReport {
    /// Numbered lines, one per dish, for the log widget.
    pub fn summary(&self) -> Vec<String> {
        if self.dishes.is_empty() {
            return vec!["No dishes recognised".to_owned()];
        }
        self.dishes
            .iter()
            .enumerate()
            .map(|(i, dish)| match &dish.description {
                Some(description) if !description.is_empty() => {
                    format!("{}. {} - {}", i + 1, dish.name, description)
                }
                _ => format!("{}. {}", i + 1, dish.name),
            })
            .collect()
    }
}

/// The prompt sent to the language model for one utterance.
pub fn speech_prompt(text: &str, uid: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(uid) = uid {
        prompt.push_str(&format!("User id:{}\n", uid));
    }
    prompt.push_str(&format!("User voice input:{}\n{}", text.trim(), REPLY_INSTRUCTION));
    prompt
}

/// Strip markdown emphasis and collapse whitespace so the answer fits the
/// display and reads well through speech synthesis.
pub fn clean_response(text: &str) -> String {
    text.replace('*', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The external collaborators of the controller.
pub trait KioskServices: Send + Sync {
    /// Take a photo of the counter and return where it was saved.
    fn capture_image(&self) -> Result<PathBuf, ServiceError>;

    /// Ask the language model.
    fn ask_llm(&self, prompt: &str) -> Result<String, ServiceError>;

    /// Turn a spoken request into a display-ready answer.
    fn process_speech(&self, text: &str, uid: Option<&str>) -> Result<String, ServiceError> {
        let answer = self.ask_llm(&speech_prompt(text, uid))?;
        Ok(clean_response(&answer))
    }

    /// Photograph the counter and recognise the dishes on it.
    fn analyze_dishes(&self) -> Result<DishReport, ServiceError>;

    /// Photograph the user's plate and describe it, recording the dishes
    /// against `uid` when known.
    fn identify_dishes_for_user(&self, uid: Option<&str>) -> Result<String, ServiceError>;

    /// Speak `text`. Blocks until playback is done.
    fn text_to_speech(&self, text: &str, voice: &str) -> Result<(), ServiceError>;
}

/// Runs the helper programs named in [`ServicesConfig`].
#[derive(Debug, Clone)]
pub struct CommandServices {
    config: ServicesConfig,
}

impl CommandServices {
    /// Runs the helpers named in `config`.
    pub fn new(config: &ServicesConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn run(&self, spec: &CommandSpec, extra: &[&str]) -> Result<String, ServiceError> {
        debug!("Running {}", spec.program);
        let output = run_with_timeout(spec, extra, self.config.timeout()).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ServiceError::ToolMissing(spec.program.clone()),
            _ => ServiceError::IoError(e),
        })?;
        let output = output.ok_or_else(|| ServiceError::Timeout(spec.program.clone()))?;
        if !output.success() {
            return Err(ServiceError::Failed {
                program: spec.program.clone(),
                code: output.status.code(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output.stdout.trim().to_owned())
    }
}

impl KioskServices for CommandServices {
    fn capture_image(&self) -> Result<PathBuf, ServiceError> {
        let path = self.run(&self.config.capture_image, &[])?;
        if path.is_empty() {
            return Err(ServiceError::BadOutput("no image path".to_owned()));
        }
        info!("Captured {}", path);
        Ok(PathBuf::from(path))
    }

    fn ask_llm(&self, prompt: &str) -> Result<String, ServiceError> {
        self.run(&self.config.ask_llm, &[prompt])
    }

    fn analyze_dishes(&self) -> Result<DishReport, ServiceError> {
        let json = self.run(&self.config.analyze_dishes, &[])?;
        Ok(serde_json::from_str(&json)?)
    }

    fn identify_dishes_for_user(&self, uid: Option<&str>) -> Result<String, ServiceError> {
        let extra: Vec<&str> = uid.into_iter().collect();
        let text = self.run(&self.config.identify_dishes, &extra)?;
        if text.is_empty() {
            return Err(ServiceError::BadOutput("empty description".to_owned()));
        }
        Ok(text)
    }

    fn text_to_speech(&self, text: &str, voice: &str) -> Result<(), ServiceError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.run(&self.config.text_to_speech, &[voice, text]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            program: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
        }
    }

    fn services(f: impl FnOnce(&mut ServicesConfig)) -> CommandServices {
        let mut config = ServicesConfig {
            timeout: 5.0,
            ..ServicesConfig::default()
        };
        f(&mut config);
        CommandServices::new(&config)
    }

    #[test]
    fn cleaning() {
        assert_eq!(clean_response("**Bold** answer**"), "Bold answer");
        assert_eq!(clean_response("* leading  star   and\nspaces  "), "leading star and spaces");
        assert_eq!(clean_response("plain"), "plain");
        assert_eq!(clean_response("   "), "");
    }

    #[test]
    fn prompt_carries_user_and_limit() {
        let prompt = speech_prompt(" what's for lunch ", Some("04a3b2c1"));
        assert!(prompt.starts_with("User id:04a3b2c1\nUser voice input:what's for lunch\n"));
        assert!(prompt.ends_with("(DO NOT over 50 words)"));
        assert!(speech_prompt("hi", None).starts_with("User voice input:hi\n"));
    }

    #[test]
    fn speech_goes_through_the_model_and_is_cleaned() {
        let services = services(|c| c.ask_llm = sh("echo \"**Noodles**  today\""));
        assert_eq!(services.process_speech("menu?", None).unwrap(), "Noodles today");
    }

    #[test]
    fn prompt_is_passed_as_argument() {
        let services = services(|c| c.ask_llm = sh("printf '%s' \"$0\""));
        let answer = services.ask_llm("hello model").unwrap();
        assert_eq!(answer, "hello model");
    }

    #[test]
    fn dish_report_is_parsed() {
        let services = services(|c| {
            c.analyze_dishes = sh(r#"echo '{"dishes":[{"name":"Mapo tofu","description":"spicy"},{"name":"Rice"}]}'"#)
        });
        let report = services.analyze_dishes().unwrap();
        assert_eq!(report.dishes.len(), 2);
        assert_eq!(report.summary(), vec!["1. Mapo tofu - spicy", "2. Rice"]);
    }

    #[test]
    fn garbage_report_is_an_error() {
        let services = services(|c| c.analyze_dishes = sh("echo not json"));
        assert!(matches!(services.analyze_dishes(), Err(ServiceError::JsonError(_))));
    }

    #[test]
    fn failing_helper() {
        let services = services(|c| c.capture_image = sh("echo 'no camera' >&2; exit 3"));
        match services.capture_image() {
            Err(ServiceError::Failed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "no camera");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn user_id_is_passed_to_plate_identification() {
        let services = services(|c| c.identify_dishes = sh("echo \"plate of $0\""));
        assert_eq!(services.identify_dishes_for_user(Some("abc")).unwrap(), "plate of abc");
    }

    #[test]
    fn missing_helper() {
        let services = services(|c| c.text_to_speech = CommandSpec::new("/nonexistent/kiosk-tts"));
        assert!(matches!(
            services.text_to_speech("hello", "en-US-AriaNeural"),
            Err(ServiceError::ToolMissing(_))
        ));
    }

    #[test]
    fn empty_report() {
        assert_eq!(DishReport::default().summary(), vec!["No dishes recognised"]);
    }
}
