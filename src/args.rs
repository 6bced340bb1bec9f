//! Command-line arguments shared by the `canteen` and `monitor` binaries.

use crate::config::{KioskConfig, DEFAULT_CONFIG_PATH, MAX_DURATION_SECS};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line of the `canteen` and `monitor` binaries.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct KioskArgs {
    #[command(subcommand)]
    /// What to do; runs the controller when omitted
    pub command: Option<KioskCommand>,

    /// Configuration file, in RON
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Serial device of the touch display, overrides the configuration
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<String>,

    /// Baud rate of the touch display, overrides the configuration
    #[arg(short = 'b', long = "baud", global = true)]
    pub baud_rate: Option<u32>,

    /// Use a simulated distance sensor instead of the HC-SR04
    #[arg(long, global = true)]
    pub simulate: bool,
}

/// The subcommands of `canteen`.
#[derive(Debug, Subcommand, Clone)]
pub enum KioskCommand {
    /// Run the kiosk controller
    #[command(about)]
    Run,

    /// Wait for one card and print its UID
    #[command(about)]
    ReadCard(ReadCardCommand),

    /// Send one raw command to the display
    #[command(about)]
    Send(SendCommand),
}

/// Arguments of `read-card`.
#[derive(Debug, Args, Clone)]
pub struct ReadCardCommand {
    /// How long to wait for a card, in seconds
    #[arg(short, long, default_value_t = 10.0, value_parser = parse_seconds)]
    pub timeout: f64,
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=MAX_DURATION_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(format!("must be between 0 and {} seconds", MAX_DURATION_SECS))
    }
}

/// Arguments of `send`.
#[derive(Debug, Args, Clone)]
pub struct SendCommand {
    /// The command text, without terminator, e.g. "page menu"
    pub command: String,
}

impl KioskArgs {
    /// Apply the command-line overrides to `config`.
    pub fn apply(&self, config: &mut KioskConfig) {
        if let Some(port) = &self.port {
            config.serial.port = Some(port.clone());
        }
        if let Some(baud_rate) = self.baud_rate {
            config.serial.baud_rate = baud_rate;
        }
    }
}
