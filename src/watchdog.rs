//! Heartbeat watchdog
//!
//! Infers whether a consumer is actively talking to the server, without the protocol
//! layer reporting session state. Every tick the watchdog reads the consumer's bit
//! (`Heartbit_c`), writes its negation into the server's bit (`Heartbit_s`) and, one
//! tick later, reads the consumer's bit again. A live consumer mirrors the server's
//! bit back in between, so the second read differs from the first.
//!
//! # States
//!
//! ```text
//! ACTIVE     stale_count == 0                 Comms = true
//! DEGRADING  0 < stale_count < threshold      Comms = true
//! DOWN       stale_count >= threshold         Comms = false
//! ```
//!
//! Any observed mirror returns to ACTIVE; a stuck bit moves monotonically towards
//! DOWN. A stale tick is followed by one extra tick of sleep, so a silent channel is
//! polled at half the rate of a live one.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppResult, ServerError};
use crate::registry::{names, NodeRegistry, VariableHandle, VariantType};
use crate::shutdown::{ShutdownController, ShutdownSignal};

/// Watchdog timing and threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogConfig {
    /// Consecutive stale ticks before the channel is declared down
    pub timeout_ticks: u32,
    /// Length of one tick
    pub tick_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ticks: 5,
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Liveness of the consumer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsState {
    /// Consumer mirrored the last tick
    Active,
    /// Stale, but below the threshold
    Degrading,
    /// Stale for at least the threshold
    Down,
}

impl CommsState {
    /// Value published into `Comms`.
    pub fn is_up(self) -> bool {
        self != CommsState::Down
    }
}

/// Result of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// The consumer reflected the bit written this tick
    pub mirrored: bool,
    /// Consecutive stale ticks
    pub stale_count: u32,
    /// Classification after this tick
    pub state: CommsState,
}

/// Counter and threshold of the heartbeat state machine.
#[derive(Debug, Clone)]
pub struct WatchdogState {
    last_written: bool,
    stale_count: u32,
    threshold: u32,
}

impl WatchdogState {
    /// Fresh state allowing `threshold` stale ticks.
    pub fn new(threshold: u32) -> Self {
        Self {
            last_written: false,
            stale_count: 0,
            threshold,
        }
    }

    /// Fold one pair of reads of the consumer's bit into the state.
    pub fn observe(&mut self, prev: bool, curr: bool) -> TickOutcome {
        let mirrored = curr != prev;
        if mirrored {
            self.stale_count = 0;
        } else {
            self.stale_count = self.stale_count.saturating_add(1);
        }
        TickOutcome {
            mirrored,
            stale_count: self.stale_count,
            state: self.comms_state(),
        }
    }

    /// Classification of the current stale count.
    pub fn comms_state(&self) -> CommsState {
        if self.stale_count == 0 {
            CommsState::Active
        } else if self.stale_count < self.threshold {
            CommsState::Degrading
        } else {
            CommsState::Down
        }
    }

    /// Consecutive stale ticks so far.
    pub fn stale_count(&self) -> u32 {
        self.stale_count
    }

    /// Bit most recently written to `Heartbit_s`.
    pub fn last_written(&self) -> bool {
        self.last_written
    }

    /// Stale ticks before the channel is down.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Heartbeat watchdog over the three reserved registry entries.
pub struct Watchdog {
    heartbeat_server: VariableHandle,
    heartbeat_client: VariableHandle,
    comms: VariableHandle,
    state: WatchdogState,
    tick_interval: Duration,
    reported: Option<CommsState>,
}

fn require_boolean(registry: &NodeRegistry, name: &str) -> AppResult<VariableHandle> {
    let variable = registry.get(name)?;
    if variable.value_type() != VariantType::Boolean {
        return Err(ServerError::TypeMismatch {
            name: name.to_string(),
            expected: VariantType::Boolean,
            found: variable.value_type(),
        });
    }
    Ok(variable)
}

fn read_bool(variable: &VariableHandle) -> AppResult<bool> {
    let value = variable.get_value();
    value.as_bool().ok_or_else(|| ServerError::TypeMismatch {
        name: variable.name().to_string(),
        expected: VariantType::Boolean,
        found: value.variant_type(),
    })
}

impl Watchdog {
    /// Resolve the heartbeat pair and `Comms` in `registry`.
    ///
    /// The channel starts ACTIVE, so `Comms` is published as `true` until the
    /// first tick says otherwise.
    pub fn new(registry: &NodeRegistry, config: &WatchdogConfig) -> AppResult<Self> {
        let watchdog = Self {
            heartbeat_server: require_boolean(registry, names::HEARTBEAT_SERVER)?,
            heartbeat_client: require_boolean(registry, names::HEARTBEAT_CLIENT)?,
            comms: require_boolean(registry, names::COMMS)?,
            state: WatchdogState::new(config.timeout_ticks),
            tick_interval: config.tick_interval,
            reported: None,
        };
        watchdog.comms.set_value(watchdog.state.comms_state().is_up())?;
        Ok(watchdog)
    }

    /// Heartbeat state machine.
    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    /// First half of a tick: read the consumer's bit and write its negation.
    ///
    /// Returns the value read, to be passed to [`finish_tick`](Self::finish_tick).
    pub fn begin_tick(&mut self) -> AppResult<bool> {
        let prev = read_bool(&self.heartbeat_client)?;
        self.heartbeat_server.set_value(!prev)?;
        self.state.last_written = !prev;
        Ok(prev)
    }

    /// Second half of a tick: re-read the consumer's bit and publish `Comms`.
    pub fn finish_tick(&mut self, prev: bool) -> AppResult<TickOutcome> {
        let curr = read_bool(&self.heartbeat_client)?;
        let outcome = self.state.observe(prev, curr);
        self.comms.set_value(outcome.state.is_up())?;
        self.report(outcome);
        Ok(outcome)
    }

    fn report(&mut self, outcome: TickOutcome) {
        if self.reported == Some(outcome.state) {
            return;
        }
        match outcome.state {
            CommsState::Active => info!("Consumer heartbeat active"),
            CommsState::Degrading => debug!(
                stale_ticks = outcome.stale_count,
                threshold = self.state.threshold,
                "Consumer heartbeat stale"
            ),
            CommsState::Down => warn!(
                stale_ticks = outcome.stale_count,
                "Consumer heartbeat lost, comms down"
            ),
        }
        self.reported = Some(outcome.state);
    }

    /// One full tick, waiting one tick interval for the consumer to mirror.
    ///
    /// Returns `None` if shutdown was requested during the wait.
    pub async fn tick(&mut self, shutdown: &mut ShutdownSignal) -> AppResult<Option<TickOutcome>> {
        let prev = self.begin_tick()?;
        if !shutdown.sleep(self.tick_interval).await {
            return Ok(None);
        }
        self.finish_tick(prev).map(Some)
    }

    /// Tick until shutdown is requested.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> AppResult<()> {
        info!(
            threshold = self.state.threshold,
            tick_ms = self.tick_interval.as_millis() as u64,
            "Heartbeat watchdog started"
        );

        while !shutdown.is_requested() {
            let Some(outcome) = self.tick(&mut shutdown).await? else {
                break;
            };
            if !outcome.mirrored && !shutdown.sleep(self.tick_interval).await {
                break;
            }
        }

        info!("Heartbeat watchdog stopped");
        Ok(())
    }

    /// Run on its own task with a private stop signal.
    pub fn spawn(self) -> WatchdogHandle {
        let controller = ShutdownController::new();
        let task = tokio::spawn(self.run(controller.signal()));
        WatchdogHandle { controller, task }
    }
}

/// Handle to a spawned watchdog task.
#[derive(Debug)]
pub struct WatchdogHandle {
    controller: ShutdownController,
    task: JoinHandle<AppResult<()>>,
}

impl WatchdogHandle {
    /// Ask the watchdog to stop; observed at its next check, not preemptive.
    pub fn stop(&self) {
        self.controller.request();
    }

    /// Wait for the task to finish.
    pub async fn join(self) -> AppResult<()> {
        self.task
            .await
            .map_err(|e| ServerError::Server(format!("watchdog task failed: {e}")))?
    }
}
