//! Mock spectrometer that generates synthetic spectra.
//!
//! Stands in for the vendor driver when no hardware is attached, and gives tests
//! control over what discovery returns and when connections or acquisitions fail.
//! The handle is cheap to clone; all clones share the same simulated bus.
//!
//! # Performance Characteristics
//!
//! - Acquisition takes the configured integration time (`tokio::time::sleep`)
//! - Spectrum: Gaussian peak at 532 nm over a flat baseline, amplitude scaled by
//!   integration time, plus uniform noise

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::capabilities::{DeviceInfo, InstrumentDriver, InstrumentSession};
use crate::error::{AppResult, ServerError};

const DEFAULT_PIXEL_COUNT: usize = 2048;
const WAVELENGTH_START_NM: f64 = 200.0;
const WAVELENGTH_END_NM: f64 = 1100.0;
const PEAK_NM: f64 = 532.0;
const PEAK_WIDTH_NM: f64 = 10.0;
const BASELINE_COUNTS: f64 = 50.0;
const NOISE_COUNTS: f64 = 5.0;

#[derive(Debug, Default)]
struct BusState {
    devices: Vec<DeviceInfo>,
    connect_failures: u32,
    acquisition_failures: u32,
}

#[derive(Debug)]
struct Inner {
    bus: Mutex<BusState>,
    pixel_count: usize,
    simulate_timing: bool,
    discover_calls: AtomicU64,
    connects: AtomicU64,
    acquisitions: AtomicU64,
}

/// Simulated spectrometer bus implementing [`InstrumentDriver`].
#[derive(Debug, Clone)]
pub struct MockSpectrometer {
    inner: Arc<Inner>,
}

impl MockSpectrometer {
    /// One attached device with the default pixel count.
    pub fn new() -> Self {
        Self::builder()
            .device(DeviceInfo::new("MOCK0001", "MockSpec2000"))
            .build()
    }

    /// No attached devices; discovery returns nothing until [`attach`](Self::attach).
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Start building a mock with custom devices and behaviour.
    pub fn builder() -> MockSpectrometerBuilder {
        MockSpectrometerBuilder::default()
    }

    /// Plug in a device.
    pub fn attach(&self, device: DeviceInfo) {
        self.inner.bus.lock().devices.push(device);
    }

    /// Unplug every device.
    pub fn detach_all(&self) {
        self.inner.bus.lock().devices.clear();
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.bus.lock().connect_failures = count;
    }

    /// Make the next `count` acquisitions fail.
    pub fn fail_next_acquisitions(&self, count: u32) {
        self.inner.bus.lock().acquisition_failures = count;
    }

    /// Number of `discover` calls so far.
    pub fn discover_calls(&self) -> u64 {
        self.inner.discover_calls.load(Ordering::SeqCst)
    }

    /// Successful connections so far.
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Successful acquisitions so far.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    /// Length of every spectrum.
    pub fn pixel_count(&self) -> usize {
        self.inner.pixel_count
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`MockSpectrometer`].
#[derive(Debug)]
pub struct MockSpectrometerBuilder {
    devices: Vec<DeviceInfo>,
    pixel_count: usize,
    simulate_timing: bool,
}

impl Default for MockSpectrometerBuilder {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            pixel_count: DEFAULT_PIXEL_COUNT,
            simulate_timing: true,
        }
    }
}

impl MockSpectrometerBuilder {
    /// Attach a device at construction.
    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.devices.push(device);
        self
    }

    /// Number of detector pixels (length of every spectrum).
    pub fn pixel_count(mut self, pixel_count: usize) -> Self {
        self.pixel_count = pixel_count.max(2);
        self
    }

    /// Whether acquisitions sleep for the integration time.
    pub fn simulate_timing(mut self, simulate: bool) -> Self {
        self.simulate_timing = simulate;
        self
    }

    /// Finish the mock.
    pub fn build(self) -> MockSpectrometer {
        MockSpectrometer {
            inner: Arc::new(Inner {
                bus: Mutex::new(BusState {
                    devices: self.devices,
                    ..BusState::default()
                }),
                pixel_count: self.pixel_count,
                simulate_timing: self.simulate_timing,
                discover_calls: AtomicU64::new(0),
                connects: AtomicU64::new(0),
                acquisitions: AtomicU64::new(0),
            }),
        }
    }
}

#[async_trait]
impl InstrumentDriver for MockSpectrometer {
    async fn discover(&self) -> Option<DeviceInfo> {
        self.inner.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.bus.lock().devices.first().cloned()
    }

    async fn connect(
        &self,
        device: &DeviceInfo,
        integration_time_micros: u32,
    ) -> AppResult<Box<dyn InstrumentSession>> {
        {
            let mut bus = self.inner.bus.lock();
            if bus.connect_failures > 0 {
                bus.connect_failures -= 1;
                return Err(ServerError::Connection(format!(
                    "failed to open {device}: device busy"
                )));
            }
            if !bus.devices.contains(device) {
                return Err(ServerError::Connection(format!("{device} is not attached")));
            }
        }

        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        debug!(%device, integration_time_micros, "Mock spectrometer opened");
        Ok(Box::new(MockSession {
            device: device.clone(),
            integration_time_micros,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockSession {
    device: DeviceInfo,
    integration_time_micros: u32,
    inner: Arc<Inner>,
}

impl MockSession {
    fn wavelength_at(&self, pixel: usize) -> f64 {
        let step = (WAVELENGTH_END_NM - WAVELENGTH_START_NM) / (self.inner.pixel_count - 1) as f64;
        WAVELENGTH_START_NM + step * pixel as f64
    }

    fn synthesize(&self) -> Vec<f64> {
        let amplitude = 1000.0 * f64::from(self.integration_time_micros) / 10_000.0;
        let mut rng = rand::thread_rng();
        (0..self.inner.pixel_count)
            .map(|pixel| {
                let offset = (self.wavelength_at(pixel) - PEAK_NM) / PEAK_WIDTH_NM;
                let peak = amplitude * (-0.5 * offset * offset).exp();
                BASELINE_COUNTS + peak + rng.gen_range(-NOISE_COUNTS..NOISE_COUNTS)
            })
            .collect()
    }
}

#[async_trait]
impl InstrumentSession for MockSession {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn integration_time_micros(&self) -> u32 {
        self.integration_time_micros
    }

    async fn wavelengths(&self) -> AppResult<Vec<f64>> {
        Ok((0..self.inner.pixel_count)
            .map(|pixel| self.wavelength_at(pixel))
            .collect())
    }

    async fn intensities(&self) -> AppResult<Vec<f64>> {
        {
            let mut bus = self.inner.bus.lock();
            if bus.acquisition_failures > 0 {
                bus.acquisition_failures -= 1;
                return Err(ServerError::Acquisition(format!(
                    "{}: USB transfer failed",
                    self.device
                )));
            }
        }

        if self.inner.simulate_timing {
            tokio::time::sleep(Duration::from_micros(u64::from(self.integration_time_micros))).await;
        }

        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(self.synthesize())
    }
}
