//! Audible alarms for security events.
//!
//! Two kinds: WANTED (loud, repeated) and UNKNOWN (single soft beep).
//! Sequences play on a short-lived background thread so the caller never
//! blocks, and a per-kind cooldown keeps a lingering person from turning
//! the gate into a metronome.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    Wanted,
    Unknown,
}

impl std::fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmKind::Wanted => write!(f, "WANTED"),
            AlarmKind::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One-method beeper contract: emit a tone of the given frequency and
/// duration, blocking for the duration.
pub trait Beeper: Send + Sync {
    fn beep(&self, frequency_hz: u32, duration_ms: u64);
}

/// Buzzer on a GPIO pin via software PWM.
pub struct PwmBeeper {
    pin: Mutex<rppal::gpio::OutputPin>,
}

impl PwmBeeper {
    pub fn open(pin: u8) -> anyhow::Result<Self> {
        let gpio = rppal::gpio::Gpio::new()?;
        let pin = gpio.get(pin)?.into_output();
        Ok(Self { pin: Mutex::new(pin) })
    }
}

impl Beeper for PwmBeeper {
    fn beep(&self, frequency_hz: u32, duration_ms: u64) {
        let mut pin = self.pin.lock();
        if pin.set_pwm_frequency(frequency_hz as f64, 0.5).is_ok() {
            thread::sleep(Duration::from_millis(duration_ms));
            let _ = pin.clear_pwm();
        }
    }
}

/// Terminal bell fallback for development hosts.
pub struct ConsoleBeeper;

impl Beeper for ConsoleBeeper {
    fn beep(&self, frequency_hz: u32, duration_ms: u64) {
        use std::io::Write;
        print!("\x07");
        let _ = std::io::stdout().flush();
        tracing::debug!(frequency_hz, duration_ms, "console beep");
        thread::sleep(Duration::from_millis(duration_ms));
    }
}

pub struct NoopBeeper;

impl Beeper for NoopBeeper {
    fn beep(&self, _frequency_hz: u32, _duration_ms: u64) {}
}

#[derive(Debug, Clone, Copy)]
pub struct BeepSequence {
    pub frequency_hz: u32,
    pub duration_ms: u64,
    pub beeps: u32,
    pub gap_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AlarmConfig {
    pub enabled: bool,
    /// Minimum spacing between two alarms of the same kind.
    pub cooldown: Duration,
    pub wanted: BeepSequence,
    pub unknown: BeepSequence,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::from_secs(5),
            wanted: BeepSequence {
                frequency_hz: 2500,
                duration_ms: 500,
                beeps: 5,
                gap_ms: 100,
            },
            unknown: BeepSequence {
                frequency_hz: 1500,
                duration_ms: 300,
                beeps: 1,
                gap_ms: 150,
            },
        }
    }
}

#[derive(Clone)]
pub struct AlarmSystem {
    config: AlarmConfig,
    beeper: Arc<dyn Beeper>,
    last_fired: Arc<Mutex<HashMap<AlarmKind, Instant>>>,
}

impl AlarmSystem {
    pub fn new(config: AlarmConfig, beeper: Arc<dyn Beeper>) -> Self {
        Self {
            config,
            beeper,
            last_fired: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fire an alarm. Returns false when disabled or still cooling down.
    /// The sequence plays on its own transient thread.
    pub fn trigger(&self, kind: AlarmKind, person_name: Option<&str>) -> bool {
        self.fire(kind, person_name, false)
    }

    fn fire(&self, kind: AlarmKind, person_name: Option<&str>, force: bool) -> bool {
        if !self.config.enabled {
            return false;
        }

        {
            let mut last = self.last_fired.lock();
            let now = Instant::now();
            if !force {
                if let Some(t) = last.get(&kind) {
                    if now.duration_since(*t) < self.config.cooldown {
                        tracing::debug!(kind = %kind, "alarm suppressed by cooldown");
                        return false;
                    }
                }
            }
            last.insert(kind, now);
        }

        tracing::warn!(kind = %kind, person = person_name.unwrap_or("-"), "ALARM triggered");

        let sequence = match kind {
            AlarmKind::Wanted => self.config.wanted,
            AlarmKind::Unknown => self.config.unknown,
        };
        let beeper = Arc::clone(&self.beeper);
        thread::Builder::new()
            .name(format!("alarm-{kind}").to_lowercase())
            .spawn(move || {
                for i in 0..sequence.beeps {
                    beeper.beep(sequence.frequency_hz, sequence.duration_ms);
                    if i + 1 < sequence.beeps {
                        thread::sleep(Duration::from_millis(sequence.gap_ms));
                    }
                }
            })
            .ok();
        true
    }

    /// Play each enabled kind once, bypassing cooldowns. Used at startup
    /// when an operator wants to verify the hardware.
    pub fn test_sequence(&self) {
        self.fire(AlarmKind::Wanted, Some("test"), true);
        thread::sleep(Duration::from_millis(200));
        self.fire(AlarmKind::Unknown, None, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingBeeper(Mutex<Vec<u32>>);

    impl Beeper for CountingBeeper {
        fn beep(&self, frequency_hz: u32, _duration_ms: u64) {
            self.0.lock().push(frequency_hz);
        }
    }

    fn fast_config() -> AlarmConfig {
        AlarmConfig {
            cooldown: Duration::from_millis(200),
            wanted: BeepSequence {
                frequency_hz: 2500,
                duration_ms: 1,
                beeps: 5,
                gap_ms: 1,
            },
            unknown: BeepSequence {
                frequency_hz: 1500,
                duration_ms: 1,
                beeps: 1,
                gap_ms: 1,
            },
            ..AlarmConfig::default()
        }
    }

    fn wait_for_playback() {
        thread::sleep(Duration::from_millis(80));
    }

    #[test]
    fn wanted_plays_full_sequence() {
        let beeper = Arc::new(CountingBeeper(Mutex::new(Vec::new())));
        let alarm = AlarmSystem::new(fast_config(), Arc::clone(&beeper) as Arc<dyn Beeper>);

        assert!(alarm.trigger(AlarmKind::Wanted, Some("Kai Novak")));
        wait_for_playback();
        assert_eq!(*beeper.0.lock(), vec![2500; 5]);
    }

    #[test]
    fn unknown_is_a_single_soft_beep() {
        let beeper = Arc::new(CountingBeeper(Mutex::new(Vec::new())));
        let alarm = AlarmSystem::new(fast_config(), Arc::clone(&beeper) as Arc<dyn Beeper>);

        assert!(alarm.trigger(AlarmKind::Unknown, None));
        wait_for_playback();
        assert_eq!(*beeper.0.lock(), vec![1500]);
    }

    #[test]
    fn cooldown_suppresses_repeats_per_kind() {
        let beeper = Arc::new(CountingBeeper(Mutex::new(Vec::new())));
        let alarm = AlarmSystem::new(fast_config(), Arc::clone(&beeper) as Arc<dyn Beeper>);

        assert!(alarm.trigger(AlarmKind::Unknown, None));
        assert!(!alarm.trigger(AlarmKind::Unknown, None));
        // A different kind has its own cooldown.
        assert!(alarm.trigger(AlarmKind::Wanted, None));

        thread::sleep(Duration::from_millis(250));
        assert!(alarm.trigger(AlarmKind::Unknown, None));
    }

    #[test]
    fn disabled_alarm_never_fires() {
        let beeper = Arc::new(CountingBeeper(Mutex::new(Vec::new())));
        let alarm = AlarmSystem::new(
            AlarmConfig {
                enabled: false,
                ..fast_config()
            },
            Arc::clone(&beeper) as Arc<dyn Beeper>,
        );
        assert!(!alarm.trigger(AlarmKind::Wanted, None));
        wait_for_playback();
        assert!(beeper.0.lock().is_empty());
    }
}
