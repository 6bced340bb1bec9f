//! Errors of the terminal UI.

use std::{error::Error, fmt::Display, io};

/// Errors from driving the terminal.
#[derive(Debug)]
pub enum GuiError {
    /// Writing to or configuring the terminal failed.
    IoError(io::Error),
    /// There is nothing to choose from.
    NoDevices,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuiError::IoError(e) => write!(f, "terminal error: {}", e),
            GuiError::NoDevices => write!(f, "no serial devices found"),
        }
    }
}

impl Error for GuiError {}

impl From<io::Error> for GuiError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}
