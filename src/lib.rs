//! Core library for the spectra-opc server.
//!
//! Publishes spectrometer readings as typed variables in an OPC UA address space,
//! together with a heartbeat watchdog that tracks whether a consumer is alive.
//! The binary in `main.rs` wires these together; the library is also driven
//! directly by the integration tests.

pub mod app;
pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod polling;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod watchdog;

pub use app::SpectraServer;
pub use error::{AppResult, ServerError};
