//! Typed helpers over the display's text command language.

use crate::protocol::escape_text;
use std::fmt;

/// Widget showing the session status line.
pub const STATUS: &str = "status";
/// Widget showing the signed-in card id.
pub const UID: &str = "uid";
/// Widget showing live speech recognition.
pub const VOICE_TEXT: &str = "voice_text";
/// Widget showing the assistant's answer.
pub const REPLY: &str = "reply";
/// Multi-line widget fed by the log buffer.
pub const LOG: &str = "log";

/// The pages the controller switches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Welcome page shown while nobody is around.
    Start,
    /// Page zero, where the back button leads.
    Home,
    /// "Please present your card".
    ReadCard,
    /// Voice interaction page, shown once a card was accepted.
    VoiceReco,
    /// Dish menu and counter photo results.
    Menu,
    /// Plate analysis results.
    Analyze,
    /// Visitor sign-in.
    VisitorLogin,
}

impl Page {
    /// The page name used in `page <name>` commands.
    pub fn name(&self) -> &'static str {
        match self {
            Page::Start => "start",
            Page::Home => "0",
            Page::ReadCard => "read_card_page",
            Page::VoiceReco => "voice_reco",
            Page::Menu => "menu",
            Page::Analyze => "analyze",
            Page::VisitorLogin => "visitor_login",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}", self.name())
    }
}

/// Anything that accepts display commands.
///
/// Every method reports whether the command went out; callers log and move
/// on, a failed screen update is never fatal.
pub trait Screen: Send + Sync {
    /// Send one raw command, without terminator.
    fn send_command(&self, command: &str) -> bool;

    /// Switch to `page`.
    fn show_page(&self, page: Page) -> bool {
        self.send_command(&page.to_string())
    }

    /// Set the text of `component`.
    fn set_text(&self, component: &str, text: &str) -> bool {
        self.set_escaped_text(component, &escape_text(text))
    }

    /// Set the text of `component` to `quoted`, sent as is. The caller has
    /// already escaped it, which leaves line-break tokens such as `\r` intact.
    fn set_escaped_text(&self, component: &str, quoted: &str) -> bool {
        self.send_command(&format!("{}.txt=\"{}\"", component, quoted))
    }
}
