//! Concrete output and sensor for a host running the agent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use bigiot_core::{Actuator, DataSource};
use tracing::{debug, info, warn};

/// A two-level output, the host stand-in for the device's LED pin.
#[derive(Debug, Default)]
pub struct LevelActuator {
    high: AtomicBool,
}

impl LevelActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.high.load(Ordering::SeqCst)
    }
}

impl Actuator for LevelActuator {
    fn activate(&self) {
        if !self.high.swap(true, Ordering::SeqCst) {
            info!("output level -> 1");
        }
    }

    fn deactivate(&self) {
        if self.high.swap(false, Ordering::SeqCst) {
            info!("output level -> 0");
        }
    }
}

/// Reads one integer from a file on every sample.
///
/// The value is divided by `divisor` and clamped into `0..=u16::MAX`.
/// An unreadable or unparsable file skips the sample.
#[derive(Debug, Clone)]
pub struct SysfsSource {
    path: PathBuf,
    divisor: u32,
}

impl SysfsSource {
    pub fn new(path: impl Into<PathBuf>, divisor: u32) -> Self {
        Self {
            path: path.into(),
            divisor: divisor.max(1),
        }
    }

    fn scale(&self, raw: i64) -> u16 {
        let scaled = raw / i64::from(self.divisor);
        scaled.clamp(0, i64::from(u16::MAX)) as u16
    }
}

impl DataSource for SysfsSource {
    fn sample(&mut self) -> Option<u16> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.path.display(), "sensor unreadable: {e}");
                return None;
            }
        };
        match text.trim().parse::<i64>() {
            Ok(raw) => {
                let value = self.scale(raw);
                debug!(raw, value, "sensor sampled");
                Some(value)
            }
            Err(e) => {
                warn!(path = %self.path.display(), "sensor value {:?} not an integer: {e}", text.trim());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("bigiot-agent-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn actuator_tracks_level() {
        let led = LevelActuator::new();
        assert!(!led.is_high());
        led.activate();
        led.activate();
        assert!(led.is_high());
        led.deactivate();
        assert!(!led.is_high());
    }

    #[test]
    fn reads_and_scales() {
        let path = scratch("temp", "48250\n");
        let mut source = SysfsSource::new(&path, 1000);
        assert_eq!(source.sample(), Some(48));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn clamps_to_sixteen_bits() {
        let path = scratch("range", "-5");
        let mut source = SysfsSource::new(&path, 1);
        assert_eq!(source.sample(), Some(0));
        std::fs::write(&path, "700000").unwrap();
        assert_eq!(source.sample(), Some(u16::MAX));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn bad_input_skips_the_sample() {
        let path = scratch("garbage", "warm");
        let mut source = SysfsSource::new(&path, 1);
        assert_eq!(source.sample(), None);
        let _ = std::fs::remove_file(&path);

        let mut missing = SysfsSource::new(path, 1);
        assert_eq!(missing.sample(), None);
    }

    #[test]
    fn zero_divisor_is_treated_as_one() {
        let path = scratch("zero", "42");
        let mut source = SysfsSource::new(&path, 0);
        assert_eq!(source.sample(), Some(42));
        let _ = std::fs::remove_file(path);
    }
}
