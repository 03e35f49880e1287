//! Polling loop
//!
//! Top-level control loop reconciling instrument availability with the registry.
//!
//! ```text
//!   DISCONNECTED ──discover+connect──▶ CONNECTED_IDLE ──trigger > 0──▶ CAPTURING
//!        ▲                                   ▲                            │
//!        │                                   └────────trigger <= 0────────┤
//!        └──────────────────acquisition failure───────────────────────────┘
//! ```
//!
//! While disconnected, every iteration probes for a device. The first capturing
//! iteration after each connection publishes the static device metadata
//! (`Wavelengths`, `DeviceModel`, `DeviceSerial`); every capturing iteration
//! publishes a fresh `Intensities` sample and bumps `SpectraCounter`. The counter is
//! monotonic for the process lifetime and holds at `u32::MAX` once reached.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, ServerError};
use crate::instrument::{InstrumentDriver, InstrumentSession};
use crate::registry::{names, NodeRegistry, VariableHandle, VariantType};
use crate::shutdown::ShutdownSignal;

/// Acquisition settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Applied to the device on every connect
    pub integration_time_micros: u32,
    /// Pause after each capturing iteration
    pub sampling_interval: Duration,
    /// Pause after each non-capturing iteration
    pub idle_poll_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            integration_time_micros: 10_000,
            sampling_interval: Duration::from_millis(100),
            idle_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Where the loop stands with respect to the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No instrument session
    Disconnected,
    /// Session open, trigger not set
    ConnectedIdle,
    /// Session open, trigger > 0
    Capturing,
}

struct PublishedNodes {
    trigger: VariableHandle,
    counter: VariableHandle,
    wavelengths: VariableHandle,
    intensities: VariableHandle,
    model: VariableHandle,
    serial: VariableHandle,
    connected: Option<VariableHandle>,
}

fn require(
    registry: &NodeRegistry,
    name: &str,
    allowed: &[VariantType],
) -> AppResult<VariableHandle> {
    let variable = registry.get(name)?;
    if !allowed.contains(&variable.value_type()) {
        return Err(ServerError::TypeMismatch {
            name: name.to_string(),
            expected: allowed[0],
            found: variable.value_type(),
        });
    }
    Ok(variable)
}

impl PublishedNodes {
    fn resolve(registry: &NodeRegistry) -> AppResult<Self> {
        let connected = if registry.contains(names::INSTRUMENT_CONNECTED) {
            Some(require(
                registry,
                names::INSTRUMENT_CONNECTED,
                &[VariantType::Boolean],
            )?)
        } else {
            None
        };

        Ok(Self {
            trigger: require(
                registry,
                names::SPECTRA_TRIGGER,
                &[VariantType::Float, VariantType::UInt32],
            )?,
            counter: require(registry, names::SPECTRA_COUNTER, &[VariantType::UInt32])?,
            wavelengths: require(registry, names::WAVELENGTHS, &[VariantType::FloatArray])?,
            intensities: require(registry, names::INTENSITIES, &[VariantType::FloatArray])?,
            model: require(registry, names::DEVICE_MODEL, &[VariantType::String])?,
            serial: require(registry, names::DEVICE_SERIAL, &[VariantType::String])?,
            connected,
        })
    }
}

/// Instrument polling state machine.
pub struct PollingLoop {
    driver: Arc<dyn InstrumentDriver>,
    session: Option<Box<dyn InstrumentSession>>,
    nodes: PublishedNodes,
    config: PollingConfig,
    state: LoopState,
    /// One-shot per connection
    parameters_captured: bool,
    sample_counter: u32,
    probe_failures: u32,
}

impl PollingLoop {
    /// Resolve every variable the loop writes; fails if any is missing or mistyped.
    pub fn new(
        registry: &NodeRegistry,
        driver: Arc<dyn InstrumentDriver>,
        config: PollingConfig,
    ) -> AppResult<Self> {
        Ok(Self {
            driver,
            session: None,
            nodes: PublishedNodes::resolve(registry)?,
            config,
            state: LoopState::Disconnected,
            parameters_captured: false,
            sample_counter: 0,
            probe_failures: 0,
        })
    }

    /// Current state of the loop.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Last value published to `SpectraCounter`.
    pub fn sample_counter(&self) -> u32 {
        self.sample_counter
    }

    /// Whether device metadata was published for the current connection.
    pub fn parameters_captured(&self) -> bool {
        self.parameters_captured
    }

    fn trigger_level(&self) -> f64 {
        self.nodes.trigger.get_value().as_f64().unwrap_or(0.0)
    }

    fn publish_connected(&self, connected: bool) -> AppResult<()> {
        if let Some(node) = &self.nodes.connected {
            node.set_value(connected)?;
        }
        Ok(())
    }

    /// One iteration of the loop.
    ///
    /// Connection and acquisition failures come back as recoverable errors with the
    /// loop already demoted to [`LoopState::Disconnected`].
    pub async fn step(&mut self) -> AppResult<LoopState> {
        if self.session.is_none() {
            self.probe().await?;
        }

        if self.trigger_level() > 0.0 {
            if self.state != LoopState::Capturing {
                info!(sample = self.sample_counter, "Spectra capture started");
                self.state = LoopState::Capturing;
            }
            if let Err(e) = self.capture().await {
                if e.is_recoverable() {
                    self.demote()?;
                }
                return Err(e);
            }
        } else if self.state == LoopState::Capturing {
            info!(sample = self.sample_counter, "Spectra capture halted");
            self.state = LoopState::ConnectedIdle;
        }

        Ok(self.state)
    }

    async fn probe(&mut self) -> AppResult<()> {
        let Some(device) = self.driver.discover().await else {
            self.probe_failures = self.probe_failures.saturating_add(1);
            if self.probe_failures == 1 {
                warn!("No instrument connected");
            } else {
                debug!(attempts = self.probe_failures, "Still no instrument connected");
            }
            return Err(ServerError::Connection("no instrument discovered".to_string()));
        };

        let session = match self
            .driver
            .connect(&device, self.config.integration_time_micros)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.probe_failures = self.probe_failures.saturating_add(1);
                warn!(%device, error = %e, "Failed to open instrument");
                return Err(e);
            }
        };

        info!(
            serial = %device.serial,
            model = %device.model,
            integration_time_micros = session.integration_time_micros(),
            "Instrument connected"
        );
        self.session = Some(session);
        self.state = LoopState::ConnectedIdle;
        self.parameters_captured = false;
        self.probe_failures = 0;
        self.publish_connected(true)
    }

    async fn capture(&mut self) -> AppResult<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ServerError::Connection("no instrument session".to_string()))?;

        if !self.parameters_captured {
            let wavelengths = session.wavelengths().await?;
            let device = session.device();
            let pixels = wavelengths.len();
            self.nodes.wavelengths.set_value(wavelengths)?;
            self.nodes.model.set_value(device.model.as_str())?;
            self.nodes.serial.set_value(device.serial.as_str())?;
            self.parameters_captured = true;
            info!(%device, pixels, "Device parameters published");
        }

        let spectrum = session.intensities().await?;
        self.nodes.intensities.set_value(spectrum)?;
        self.sample_counter = self.sample_counter.saturating_add(1);
        self.nodes.counter.set_value(self.sample_counter)?;
        Ok(())
    }

    fn demote(&mut self) -> AppResult<()> {
        if let Some(session) = self.session.take() {
            warn!(device = %session.device(), "Dropping instrument session");
        }
        self.state = LoopState::Disconnected;
        self.publish_connected(false)
    }

    /// Pause before the next iteration.
    pub fn pause_after(&self) -> Duration {
        match self.state {
            LoopState::Capturing => self.config.sampling_interval,
            LoopState::Disconnected | LoopState::ConnectedIdle => self.config.idle_poll_interval,
        }
    }

    /// Iterate until shutdown is requested or a fatal error occurs.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> AppResult<()> {
        info!(
            integration_time_micros = self.config.integration_time_micros,
            sampling_interval_ms = self.config.sampling_interval.as_millis() as u64,
            "Polling loop started"
        );

        while !shutdown.is_requested() {
            match self.step().await {
                Ok(_) => {}
                Err(e @ ServerError::Acquisition(_)) => {
                    warn!(error = %e, "Acquisition failed, re-probing instrument");
                }
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "Instrument unavailable");
                }
                Err(e) => {
                    error!(error = %e, "Polling loop failed");
                    return Err(e);
                }
            }

            if !shutdown.sleep(self.pause_after()).await {
                break;
            }
        }

        info!(samples = self.sample_counter, "Polling loop stopped");
        Ok(())
    }
}
