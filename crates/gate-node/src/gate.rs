//! Physical gate controller: drives a relay with timed auto-close.
//!
//! The relay is consumed through the narrow [`RelayLine`] trait; a GPIO
//! backend drives real hardware and a simulated backend logs, so the node
//! runs unchanged on machines without a gate attached.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::Decision;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate hardware error: {0}")]
    Hardware(String),
}

/// The two-method contract the controller needs from the actuator.
pub trait RelayLine: Send {
    /// Energise (true) or release (false) the relay.
    fn set_active(&mut self, active: bool) -> Result<(), GateError>;
    /// Return the line to its inactive level and free the pin.
    fn release(&mut self);
}

/// Relay on a GPIO pin, honouring active-low wiring.
pub struct GpioRelay {
    pin: rppal::gpio::OutputPin,
    active_low: bool,
}

impl GpioRelay {
    pub fn open(pin: u8, active_low: bool) -> Result<Self, GateError> {
        let gpio = rppal::gpio::Gpio::new()
            .map_err(|e| GateError::Hardware(format!("GPIO unavailable: {e}")))?;
        let mut pin = gpio
            .get(pin)
            .map_err(|e| GateError::Hardware(format!("pin unavailable: {e}")))?
            .into_output();
        // Start at the inactive level.
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        tracing::info!(pin = pin.pin(), active_low, "gate relay initialized");
        Ok(Self { pin, active_low })
    }
}

impl RelayLine for GpioRelay {
    fn set_active(&mut self, active: bool) -> Result<(), GateError> {
        // Active-low wiring: a low level energises the relay.
        if active != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        // The pin itself resets to its original mode when dropped.
    }
}

/// Logging stand-in for hosts without a gate attached.
#[derive(Debug, Default)]
pub struct SimulatedRelay;

impl RelayLine for SimulatedRelay {
    fn set_active(&mut self, active: bool) -> Result<(), GateError> {
        tracing::info!(active, "simulated relay");
        Ok(())
    }

    fn release(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Open => write!(f, "OPEN"),
            GateState::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GateStats {
    pub total_opens: u64,
    pub authorized_opens: u64,
    pub wanted_opens: u64,
    pub rejected_unknown: u64,
}

struct GateInner {
    relay: Box<dyn RelayLine>,
    is_open: bool,
    /// Bumped on every open/extend/close; a stale auto-close timer whose
    /// generation no longer matches does nothing.
    generation: u64,
    last_open_at: Option<Instant>,
    stats: GateStats,
}

/// Gate state machine: CLOSED -> OPEN on request, back to CLOSED when the
/// auto-close timer fires. Re-opening while open extends the countdown.
#[derive(Clone)]
pub struct GateController {
    inner: Arc<Mutex<GateInner>>,
    open_duration: Duration,
    cooldown: Duration,
}

impl GateController {
    pub fn new(relay: Box<dyn RelayLine>, open_duration: Duration, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                relay,
                is_open: false,
                generation: 0,
                last_open_at: None,
                stats: GateStats::default(),
            })),
            open_duration,
            cooldown,
        }
    }

    /// Open the gate (or extend the countdown when already open).
    ///
    /// Returns true when the relay state or timer changed; false when the
    /// request was suppressed by the open-state cooldown or the hardware
    /// refused.
    pub fn open(&self, decision: Decision, person_id: Option<&str>, track_id: u64, confidence: f32) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.is_open {
            if let Some(last) = inner.last_open_at {
                if now.duration_since(last) < self.cooldown {
                    tracing::debug!(track_id, "gate open suppressed by cooldown");
                    return false;
                }
            }
        }

        if !inner.is_open {
            if let Err(e) = inner.relay.set_active(true) {
                tracing::error!(error = %e, track_id, "failed to drive relay, forcing closed");
                let _ = inner.relay.set_active(false);
                inner.is_open = false;
                return false;
            }
            inner.is_open = true;
            tracing::info!(
                %decision,
                person_id = person_id.unwrap_or("-"),
                track_id,
                confidence,
                open_secs = self.open_duration.as_secs_f64(),
                "gate OPENED"
            );
        } else {
            tracing::info!(
                %decision,
                track_id,
                open_secs = self.open_duration.as_secs_f64(),
                "gate open EXTENDED"
            );
        }

        inner.last_open_at = Some(now);
        inner.generation += 1;
        inner.stats.total_opens += 1;
        match decision {
            Decision::Authorized => inner.stats.authorized_opens += 1,
            Decision::Wanted => inner.stats.wanted_opens += 1,
            Decision::Unknown => {}
        }

        self.schedule_auto_close(inner.generation);
        true
    }

    fn schedule_auto_close(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let duration = self.open_duration;
        thread::Builder::new()
            .name("gate-autoclose".into())
            .spawn(move || {
                thread::sleep(duration);
                let mut inner = inner.lock();
                if inner.generation == generation && inner.is_open {
                    if let Err(e) = inner.relay.set_active(false) {
                        tracing::error!(error = %e, "auto-close failed to release relay");
                    }
                    inner.is_open = false;
                    tracing::info!("gate auto-closed");
                }
            })
            .ok();
    }

    /// Close immediately, cancelling any pending auto-close. A no-op when
    /// already closed (the relay is still driven to its inactive level).
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Err(e) = inner.relay.set_active(false) {
            tracing::error!(error = %e, "failed to release relay on close");
        }
        if inner.is_open {
            inner.is_open = false;
            tracing::info!("gate CLOSED");
        }
    }

    /// Record an unknown-person rejection. Never touches the relay.
    pub fn reject(&self, track_id: u64) {
        let mut inner = self.inner.lock();
        inner.stats.rejected_unknown += 1;
        tracing::info!(track_id, "access rejected, gate stays closed");
    }

    pub fn state(&self) -> GateState {
        if self.inner.lock().is_open {
            GateState::Open
        } else {
            GateState::Closed
        }
    }

    pub fn stats(&self) -> GateStats {
        self.inner.lock().stats
    }

    /// Force closed and free the actuator. Called on every shutdown path.
    pub fn shutdown(&self) {
        self.close();
        self.inner.lock().relay.release();
        tracing::info!("gate controller shut down");
    }
}
