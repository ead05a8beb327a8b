//! Device-wide configuration: the out-of-policy override flags and their
//! penalty durations (spec §3 "Global state", §4.5, §6).

use std::time::Duration;

/// Penalties above this many microseconds are rejected by
/// `SET_DEVRCONFIG_DELAY`/`SET_DEVWCONFIG_DELAY` (spec §6).
pub const MAX_PENALTY_US: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// If true, an out-of-policy read is forwarded (after a penalty) instead
    /// of failing with `READ_POINTER`.
    pub out_of_policy_read_override: bool,
    /// If true, an out-of-policy write is forwarded (after a penalty)
    /// instead of failing.
    pub out_of_policy_write_override: bool,
    pub read_penalty: Duration,
    pub write_penalty: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            out_of_policy_read_override: false,
            out_of_policy_write_override: false,
            read_penalty: Duration::ZERO,
            write_penalty: Duration::ZERO,
        }
    }
}

impl DeviceConfig {
    pub fn reset(&mut self) {
        *self = DeviceConfig::default();
    }

    pub fn set_read_penalty_us(&mut self, us: u32) -> Result<(), crate::error::ImrError> {
        if us >= MAX_PENALTY_US {
            return Err(crate::error::ImrError::OutOfPolicy);
        }
        self.read_penalty = Duration::from_micros(us as u64);
        Ok(())
    }

    pub fn set_write_penalty_us(&mut self, us: u32) -> Result<(), crate::error::ImrError> {
        if us >= MAX_PENALTY_US {
            return Err(crate::error::ImrError::OutOfPolicy);
        }
        self.write_penalty = Duration::from_micros(us as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_overrides_or_penalties() {
        let cfg = DeviceConfig::default();
        assert!(!cfg.out_of_policy_read_override);
        assert!(!cfg.out_of_policy_write_override);
        assert_eq!(cfg.read_penalty, Duration::ZERO);
    }

    #[test]
    fn penalty_at_or_above_threshold_is_rejected() {
        let mut cfg = DeviceConfig::default();
        assert!(cfg.set_read_penalty_us(MAX_PENALTY_US).is_err());
        assert!(cfg.set_read_penalty_us(MAX_PENALTY_US - 1).is_ok());
    }
}
