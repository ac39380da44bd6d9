//! Per-wire-count protocol constants
//!
//! A bus with `w` wires carries one base-`MAX` digit per transition, where
//! `MAX = 2^w - 1` (the all-released pattern is not a transition). Data is
//! cut into `BITS`-wide chunks, each sent as `LEN` digits:
//!
//! | w | MAX | LEN | BITS | N_END |
//! |---|-----|-----|------|-------|
//! | 2 | 3   | 7   | 11   | 3     |
//! | 3 | 7   | 5   | 14   | 2     |
//! | 4 | 15  | 3   | 11   | 1     |
//! | 5 | 31  | 3   | 14   | 1     |
//! | 6 | 63  | 2   | 11   | 1     |

/// Fewest wires a bus may have
pub const MIN_WIRES: u8 = 2;
/// Most wires a bus may have
pub const MAX_WIRES: u8 = 6;

/// Digits per data chunk, indexed by wire count
pub const LEN: [u8; 7] = [0, 0, 7, 5, 3, 3, 2];
/// Bits per data chunk, indexed by wire count
pub const BITS: [u8; 7] = [0, 0, 11, 14, 11, 14, 11];
/// Digits in the end-of-data marker, indexed by wire count
pub const N_END: [u8; 7] = [0, 0, 3, 2, 1, 1, 1];

/// Width of the wire-level CRC
pub const CRC_BITS: u8 = 11;

/// Longest digit group: a data chunk on two wires
pub const MAX_DIGITS: usize = 7;

/// Derived constants for one wire count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusParams {
    /// Number of wires
    pub wires: u8,
    /// Largest digit value, also the all-wires mask
    pub max: u8,
    /// Digits per data chunk
    pub len: u8,
    /// Bits per data chunk
    pub bits: u8,
    /// Digits in the end-of-data marker
    pub n_end: u8,
    /// Digits used for the wire CRC
    pub len_crc: u8,
    /// Value of the end-of-data marker, `MAX^N_END - 1`
    pub val_end: u32,
    /// First value that is not plain chunk data, `2^BITS`
    pub val_max: u32,
}

impl BusParams {
    /// Look up the constants for `wires`, or `None` if unsupported
    pub const fn new(wires: u8) -> Option<Self> {
        if wires < MIN_WIRES || wires > MAX_WIRES {
            return None;
        }
        let w = wires as usize;
        let max = (1u8 << wires) - 1;
        let n_end = N_END[w];
        let len = LEN[w];
        Some(Self {
            wires,
            max,
            len,
            bits: BITS[w],
            n_end,
            // 7^4 already covers the 11-bit CRC
            len_crc: if wires == 3 { len - 1 } else { len },
            val_end: (max as u32).pow(n_end as u32) - 1,
            val_max: 1 << BITS[w],
        })
    }

    /// Upper bound (exclusive) of residual chunk values
    ///
    /// Values in `val_max..val_overflow` carry a final chunk that is at
    /// least eight bits short.
    pub const fn val_overflow(&self) -> u32 {
        self.val_max + (1 << (self.bits - 8))
    }
}
