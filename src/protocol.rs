//! The wire protocol spoken with the serial touch display.
//!
//! Two independent directions share the link:
//!
//! - Controller → display: an ASCII command such as `page menu` or
//!   `status.txt="hi"`, followed by the terminator `FF FF FF`.
//! - Display → controller: fixed four-byte frames `55 <CMD> 0D 0A`, where
//!   `CMD` is a single [`CommandCode`] byte.
//!
//! Inbound bytes arrive in arbitrary chunks, so [`FrameDecoder`] keeps the
//! unconsumed tail between reads and resynchronises on the next `0x55`
//! whenever a window does not look like a frame.

use std::{borrow::Cow, fmt};

/// Marks the end of every outbound display command.
pub const COMMAND_TERMINATOR: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// First byte of every inbound frame.
pub const FRAME_HEAD: u8 = 0x55;

/// Trailer of every inbound frame.
pub const FRAME_TAIL: [u8; 2] = [0x0D, 0x0A];

/// Length of an inbound frame in bytes.
pub const FRAME_LEN: usize = 4;

/// The buttons and page events the display can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// `0x01`: start a session without waiting for the proximity sensor.
    VisitorMode,
    /// `0x02`: leave the current page.
    Back,
    /// `0x03`: start polling the card reader.
    EnableCardReader,
    /// `0x04`: stop polling the card reader.
    DisableCardReader,
    /// `0x05`: start speech recognition.
    StartRecording,
    /// `0x06`: stop speech recognition and answer the user.
    StopRecording,
    /// `0x07`: take a photo of the serving counter and identify dishes.
    CaptureDishPhoto,
    /// `0x08`: take a photo of the user's plate and analyse it.
    AnalyzePlate,
    /// `0x09`: switch to the card page.
    ShowCardPage,
}

/// Returned for a command byte that is not part of [`CommandCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCommand(pub u8);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command byte 0x{:02X}", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl TryFrom<u8> for CommandCode {
    type Error = UnknownCommand;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use CommandCode as C;
        match byte {
            0x01 => Ok(C::VisitorMode),
            0x02 => Ok(C::Back),
            0x03 => Ok(C::EnableCardReader),
            0x04 => Ok(C::DisableCardReader),
            0x05 => Ok(C::StartRecording),
            0x06 => Ok(C::StopRecording),
            0x07 => Ok(C::CaptureDishPhoto),
            0x08 => Ok(C::AnalyzePlate),
            0x09 => Ok(C::ShowCardPage),
            other => Err(UnknownCommand(other)),
        }
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> u8 {
        use CommandCode as C;
        match code {
            C::VisitorMode => 0x01,
            C::Back => 0x02,
            C::EnableCardReader => 0x03,
            C::DisableCardReader => 0x04,
            C::StartRecording => 0x05,
            C::StopRecording => 0x06,
            C::CaptureDishPhoto => 0x07,
            C::AnalyzePlate => 0x08,
            C::ShowCardPage => 0x09,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CommandCode as C;
        let name = match self {
            C::VisitorMode => "visitor-mode",
            C::Back => "back",
            C::EnableCardReader => "enable-card-reader",
            C::DisableCardReader => "disable-card-reader",
            C::StartRecording => "start-recording",
            C::StopRecording => "stop-recording",
            C::CaptureDishPhoto => "capture-dish-photo",
            C::AnalyzePlate => "analyze-plate",
            C::ShowCardPage => "show-card-page",
        };
        write!(f, "{name}")
    }
}

/// The bytes the display sends for `code`. Used by tests and simulators.
pub fn encode_frame(code: u8) -> [u8; FRAME_LEN] {
    [FRAME_HEAD, code, FRAME_TAIL[0], FRAME_TAIL[1]]
}

/// Append the display terminator to an outbound command.
pub fn encode_display_command(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + COMMAND_TERMINATOR.len());
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(&COMMAND_TERMINATOR);
    bytes
}

/// Quote `text` for use inside a `component.txt="…"` assignment.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.contains(['"', '\\']) {
        return Cow::from(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::from(escaped)
}

/// Reassembles inbound frames from arbitrarily chunked reads.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// An empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append `data` and return the command byte of every complete frame
    /// found, in order. Bytes that cannot start a frame are dropped; a
    /// trailing partial frame is kept for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(data);

        let mut codes = Vec::new();
        let mut pos = 0;
        loop {
            let Some(offset) = self.buffer[pos..].iter().position(|&b| b == FRAME_HEAD) else {
                // Nothing left that could start a frame.
                pos = self.buffer.len();
                break;
            };
            let start = pos + offset;
            if self.buffer.len() - start < FRAME_LEN {
                pos = start;
                break;
            }

            let window = &self.buffer[start..start + FRAME_LEN];
            if window[2..] == FRAME_TAIL {
                codes.push(window[1]);
                pos = start + FRAME_LEN;
            } else {
                // A stray 0x55; resync on the next one.
                pos = start + 1;
            }
        }

        self.buffer.drain(..pos);
        codes
    }

    /// Forget any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
