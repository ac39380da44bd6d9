//! Idle backoff with jitter
//!
//! The backoff is the number of Timer A periods a node with queued data
//! waits on an idle bus before asserting its priority bit. Collisions and
//! aborting errors push it up, successful transmissions pull it back down.

use crate::config::Timing;

/// Backoff tracker
#[derive(Debug, Clone)]
pub struct Backoff {
    value: u8,
    floor: u8,
    ceiling: u8,
    rng: u32,
}

impl Backoff {
    /// Start at the configured floor
    pub fn new(timing: &Timing, seed: u32) -> Self {
        Self {
            value: timing.backoff,
            floor: timing.backoff,
            ceiling: timing.max_backoff.max(timing.backoff),
            // xorshift must not start at zero
            rng: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    /// Current backoff in Timer A periods
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Upper bound of [`value`](Self::value)
    pub fn ceiling(&self) -> u8 {
        self.ceiling
    }

    /// Grow after a collision or fault
    ///
    /// Below three times the floor the value is multiplied by 1.5 plus a
    /// random fraction up to 1; above that by 1.2. It always grows by at
    /// least one until it hits the ceiling.
    pub fn escalate(&mut self) {
        let b = self.value as u32;
        let next = if b < 3 * self.floor as u32 {
            b + b / 2 + self.jitter(b)
        } else {
            b + b / 5
        };
        self.value = next.max(b + 1).min(self.ceiling as u32) as u8;
    }

    /// Halve after a success, not below the floor
    pub fn relax(&mut self) {
        self.value = (self.value / 2).max(self.floor);
    }

    /// Force a value, clamped to floor and ceiling
    pub fn set(&mut self, value: u8) {
        self.value = value.clamp(self.floor, self.ceiling);
    }

    /// Uniform-ish value in `0..=max`
    fn jitter(&mut self, max: u32) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x % (max + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_floor() {
        let b = Backoff::new(&Timing::default(), 7);
        assert_eq!(b.value(), 2);
        assert_eq!(b.ceiling(), 64);
    }

    #[test]
    fn test_relax_floor() {
        let mut b = Backoff::new(&Timing::default(), 7);
        b.set(20);
        b.relax();
        assert_eq!(b.value(), 10);
        for _ in 0..10 {
            b.relax();
        }
        assert_eq!(b.value(), 2);
    }

    #[test]
    fn test_zero_seed_still_jitters() {
        let mut b = Backoff::new(&Timing::default(), 0);
        b.escalate();
        assert!(b.value() > 2);
    }

    proptest! {
        #[test]
        fn prop_escalation_bounded(seed in any::<u32>(), steps in 1usize..200) {
            let timing = Timing::default();
            let mut b = Backoff::new(&timing, seed);
            for _ in 0..steps {
                let before = b.value() as u32;
                b.escalate();
                let after = b.value() as u32;
                prop_assert!(after <= timing.max_backoff as u32);
                if before < 3 * timing.backoff as u32 {
                    // fast regime: at most x2.5
                    prop_assert!(after * 2 <= before * 5);
                } else {
                    prop_assert!(after <= (before + before / 5).max(before + 1));
                }
                prop_assert!(after > before || after == timing.max_backoff as u32);
            }
        }
    }
}
