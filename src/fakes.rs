//! In-memory stand-ins for the hardware and the external pipelines.

use crate::{
    card_reader::{CardError, CardQuery},
    display::Screen,
    handler::SessionHooks,
    proximity::{DistanceSensor, SensorError},
    recognizer::{RecognizerError, SpeechRecognizer},
    services::{DishReport, KioskServices, ServiceError},
    telemetry::TelemetrySink,
    transport::Link,
    worker::{lock, StopFlag},
};

use serde_json::Value;
use std::{
    collections::VecDeque,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

/// Poll `condition` for up to two seconds.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A serial link whose inbound bytes are pushed by the test and whose
/// outbound bytes are recorded.
#[derive(Default)]
pub struct FakeLink {
    inbound: Mutex<VecDeque<u8>>,
    outbound: Mutex<Vec<u8>>,
}

impl FakeLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        lock(&self.inbound).extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.outbound).clone()
    }
}

impl Link for FakeLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut inbound = lock(&self.inbound);
            if !inbound.is_empty() {
                let n = buf.len().min(inbound.len());
                for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        thread::sleep(Duration::from_millis(5));
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        lock(&self.outbound).extend_from_slice(data);
        Ok(())
    }
}

/// Records every display command.
#[derive(Default)]
pub struct FakeScreen {
    commands: Mutex<Vec<String>>,
}

impl FakeScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    pub fn contains(&self, command: &str) -> bool {
        lock(&self.commands).iter().any(|c| c == command)
    }
}

impl Screen for FakeScreen {
    fn send_command(&self, command: &str) -> bool {
        lock(&self.commands).push(command.to_owned());
        true
    }
}

/// Plays back a fixed list of readings, then fails. Clones share the list.
#[derive(Clone)]
pub struct ScriptedSensor {
    readings: Arc<Mutex<VecDeque<Result<f64, SensorError>>>>,
}

impl ScriptedSensor {
    pub fn new(readings: Vec<Result<f64, SensorError>>) -> Self {
        Self {
            readings: Arc::new(Mutex::new(readings.into())),
        }
    }
}

impl DistanceSensor for ScriptedSensor {
    fn measure_distance(&mut self) -> Result<f64, SensorError> {
        lock(&self.readings)
            .pop_front()
            .unwrap_or(Err(SensorError::EchoTimeout))
    }
}

/// Plays back card query results, then reports "no card".
#[derive(Default)]
pub struct ScriptedCards {
    responses: Mutex<VecDeque<Result<Option<String>, CardError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedCards {
    pub fn new(responses: Vec<Result<Option<String>, CardError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Every query takes `delay` before answering.
    pub fn with_delay(responses: Vec<Result<Option<String>, CardError>>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(responses)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CardQuery for ScriptedCards {
    fn query(&self, timeout: Duration) -> Result<Option<String>, CardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay.min(timeout));
        lock(&self.responses).pop_front().unwrap_or(Ok(None))
    }
}

/// Collects published payloads.
#[derive(Default)]
pub struct FakeTelemetry {
    payloads: Mutex<Vec<Value>>,
}

impl FakeTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<Value> {
        lock(&self.payloads).clone()
    }
}

impl TelemetrySink for FakeTelemetry {
    fn publish(&self, payload: Value) {
        lock(&self.payloads).push(payload);
    }
}

/// Emits scripted results, then listens until stopped.
#[derive(Default)]
pub struct FakeRecognizer {
    partials: Vec<String>,
    finals: Vec<String>,
    runs: AtomicUsize,
}

impl FakeRecognizer {
    pub fn new(partials: &[&str], finals: &[&str]) -> Self {
        Self {
            partials: partials.iter().map(|s| s.to_string()).collect(),
            finals: finals.iter().map(|s| s.to_string()).collect(),
            runs: AtomicUsize::new(0),
        }
    }

    /// Hears nothing.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn recognize_continuous(
        &self,
        stop: &StopFlag,
        on_partial: &mut dyn FnMut(&str),
        on_final: &mut dyn FnMut(&str),
    ) -> Result<(), RecognizerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for partial in &self.partials {
            on_partial(partial);
        }
        for utterance in &self.finals {
            on_final(utterance);
        }
        while !stop.sleep(Duration::from_millis(5)) {}
        Ok(())
    }
}

/// Records what the controller asked of the pipelines.
#[derive(Default)]
pub struct FakeServices {
    pub reply: String,
    pub fail_analysis: bool,
    /// Plate analysis answer, "Rice and greens" if unset.
    pub plate: Option<String>,
    pub(crate) speech: Mutex<Vec<(String, Option<String>)>>,
    pub(crate) spoken: Mutex<Vec<String>>,
    pub(crate) analyses: AtomicUsize,
    pub(crate) plates: Mutex<Vec<Option<String>>>,
}

impl FakeServices {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_owned(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_analysis: true,
            ..Self::default()
        }
    }

    /// `(text, uid)` of every speech request.
    pub fn speech_requests(&self) -> Vec<(String, Option<String>)> {
        lock(&self.speech).clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    pub fn analyses(&self) -> usize {
        self.analyses.load(Ordering::SeqCst)
    }

    pub fn plates(&self) -> Vec<Option<String>> {
        lock(&self.plates).clone()
    }
}

impl KioskServices for FakeServices {
    fn capture_image(&self) -> Result<PathBuf, ServiceError> {
        if self.fail_analysis {
            return Err(ServiceError::ToolMissing("camera".to_owned()));
        }
        Ok(PathBuf::from("/tmp/counter.jpg"))
    }

    fn ask_llm(&self, _prompt: &str) -> Result<String, ServiceError> {
        Ok(self.reply.clone())
    }

    fn process_speech(&self, text: &str, uid: Option<&str>) -> Result<String, ServiceError> {
        lock(&self.speech).push((text.to_owned(), uid.map(str::to_owned)));
        Ok(self.reply.clone())
    }

    fn analyze_dishes(&self) -> Result<DishReport, ServiceError> {
        self.analyses.fetch_add(1, Ordering::SeqCst);
        if self.fail_analysis {
            return Err(ServiceError::Timeout("kiosk-dishes".to_owned()));
        }
        Ok(serde_json::from_str(r#"{"dishes":[{"name":"Rice"}]}"#)?)
    }

    fn identify_dishes_for_user(&self, uid: Option<&str>) -> Result<String, ServiceError> {
        lock(&self.plates).push(uid.map(str::to_owned));
        if self.fail_analysis {
            return Err(ServiceError::Timeout("kiosk-plate".to_owned()));
        }
        Ok(self.plate.clone().unwrap_or_else(|| "Rice and greens".to_owned()))
    }

    fn text_to_speech(&self, text: &str, _voice: &str) -> Result<(), ServiceError> {
        lock(&self.spoken).push(text.to_owned());
        Ok(())
    }
}

/// Counts session events coming from the touchscreen.
#[derive(Default)]
pub struct FakeHooks {
    pub user: Mutex<Option<String>>,
    visitors: AtomicUsize,
    backs: AtomicUsize,
    cards: Mutex<Vec<String>>,
}

impl FakeHooks {
    pub fn signed_in(uid: &str) -> Self {
        Self {
            user: Mutex::new(Some(uid.to_owned())),
            ..Self::default()
        }
    }

    pub fn visitors(&self) -> usize {
        self.visitors.load(Ordering::SeqCst)
    }

    pub fn backs(&self) -> usize {
        self.backs.load(Ordering::SeqCst)
    }

    pub fn cards(&self) -> Vec<String> {
        lock(&self.cards).clone()
    }
}

impl SessionHooks for FakeHooks {
    fn visitor_requested(&self) {
        self.visitors.fetch_add(1, Ordering::SeqCst);
    }

    fn back_requested(&self) {
        self.backs.fetch_add(1, Ordering::SeqCst);
    }

    fn card_presented(&self, uid: String) {
        *lock(&self.user) = Some(uid.clone());
        lock(&self.cards).push(uid);
    }

    fn current_user(&self) -> Option<String> {
        lock(&self.user).clone()
    }
}
