//! The on-device controller of a smart canteen kiosk.
//!
//! The kiosk notices someone stepping up to it with an ultrasonic ranger,
//! signs them in with an RFID card, listens to spoken questions and takes
//! photos of the counter and of plates. The answers come from external AI
//! pipelines; this crate is the device side that ties the hardware
//! together:
//!
//! - [`transport`] owns the serial link to the touch display and decodes
//!   its [`protocol`] frames.
//! - [`proximity`] debounces the ranger into a presence signal.
//! - [`card_reader`] polls the RFID reader.
//! - [`handler`] reacts to the display's buttons.
//! - [`orchestrator`] owns the user session and the sign-in handshake.
//!
//! Everything runs on a handful of plain threads that coordinate through
//! small locks and [`worker::StopFlag`]s.

#![warn(missing_docs)]
pub mod args;
pub mod card_reader;
pub mod config;
pub mod display;
pub mod gui;
pub mod handler;
pub mod log_buffer;
pub mod orchestrator;
pub mod process;
pub mod protocol;
pub mod proximity;
pub mod recognizer;
pub mod services;
pub mod shutdown;
pub mod telemetry;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod fakes;
