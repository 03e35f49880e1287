//! Capabilities the server needs from a spectrometer driver.
//!
//! Discovery and connection live on [`InstrumentDriver`]; a connected device is an
//! [`InstrumentSession`]. At most one session exists at a time and it is owned by
//! the polling loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppResult;

/// Identity of an attached device as reported by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial number (e.g., "USB2+F01234")
    pub serial: String,
    /// Model name (e.g., "USB2000PLUS")
    pub model: String,
}

impl DeviceInfo {
    /// Identity from serial number and model name.
    pub fn new(serial: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}>", self.model, self.serial)
    }
}

/// Device discovery and connection.
#[async_trait]
pub trait InstrumentDriver: Send + Sync {
    /// Enumerate attached devices and return the first one, if any.
    async fn discover(&self) -> Option<DeviceInfo>;

    /// Open `device` and apply the integration time.
    ///
    /// Fails with `ServerError::Connection` if the device cannot be opened.
    async fn connect(
        &self,
        device: &DeviceInfo,
        integration_time_micros: u32,
    ) -> AppResult<Box<dyn InstrumentSession>>;
}

/// A connected spectrometer.
#[async_trait]
pub trait InstrumentSession: Send + Sync {
    /// Identity of the connected device.
    fn device(&self) -> &DeviceInfo;

    /// Integration time applied when the session was opened.
    fn integration_time_micros(&self) -> u32;

    /// Static per-device calibration array (nm), one entry per pixel.
    async fn wavelengths(&self) -> AppResult<Vec<f64>>;

    /// One fresh sample. May block for up to the acquisition time.
    ///
    /// Fails with `ServerError::Acquisition` on a hardware fault.
    async fn intensities(&self) -> AppResult<Vec<f64>>;
}
