//! Instrument access: capability traits plus the simulated spectrometer.

pub mod capabilities;
pub mod mock;

pub use capabilities::{DeviceInfo, InstrumentDriver, InstrumentSession};
pub use mock::{MockSpectrometer, MockSpectrometerBuilder};
