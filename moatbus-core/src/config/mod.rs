//! Bus configuration
//!
//! [`BusConfig`] is what a firmware persists per bus attachment: the wire
//! count, the timer multiples and the jitter seed. Every wait is expressed
//! in units of the transport's Timer A; Timer B is fixed by the transport.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use moatbus_protocol::BusParams;

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Wire count outside 2..=6
    InvalidWires(u8),
    /// A timer multiple is zero or the backoff ceiling is below its floor
    InvalidTiming,
}

/// Timer multiples, in units of Timer A
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timing {
    /// Wait after the last wire change before the value counts as settled
    pub settle: u8,
    /// Initial and minimum idle backoff
    pub backoff: u8,
    /// Quiet time after which the bus counts as idle
    pub zero: u8,
    /// Cooldown after a recoverable fault
    pub error: u8,
    /// Backoff ceiling
    pub max_backoff: u8,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: 1,
            backoff: 2,
            zero: 5,
            error: 10,
            max_backoff: 64,
        }
    }
}

impl Timing {
    /// Check that every multiple is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settle == 0
            || self.backoff == 0
            || self.zero == 0
            || self.error == 0
            || self.max_backoff < self.backoff
        {
            return Err(ConfigError::InvalidTiming);
        }
        Ok(())
    }
}

/// Per-attachment bus configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BusConfig {
    /// Number of wires (2..=6)
    pub wires: u8,
    /// Timer multiples
    pub timing: Timing,
    /// Seed for backoff jitter; use something node-specific
    pub seed: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

impl BusConfig {
    /// Default timing for a bus with `wires` wires
    pub fn new(wires: u8) -> Self {
        Self {
            wires,
            timing: Timing::default(),
            seed: 1,
        }
    }

    /// Same configuration with a different jitter seed
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// Validate and derive the chunk geometry
    pub fn validate(&self) -> Result<BusParams, ConfigError> {
        self.timing.validate()?;
        BusParams::new(self.wires).ok_or(ConfigError::InvalidWires(self.wires))
    }
}
