//! Table-driven CRC over symbols of arbitrary width
//!
//! MoatBus never feeds bytes straight off a UART into its checksum: the
//! wire-level CRC consumes one symbol per bus transition, and a symbol is as
//! wide as the bus (2..6 bits). The engine therefore takes a configurable
//! *depth* (the number of bits folded per table lookup) independent of the
//! polynomial width.
//!
//! The reversed (right-shifting) algorithm is used, so input is never
//! bit-reversed. Polynomials are given in reversed form without the
//! `2^width` term.
//!
//! Standard instances:
//! - [`Crc::crc6`]: `0x2C`, width 6
//! - [`Crc::crc8`]: `0xA6`, width 8, byte-wide
//! - [`Crc::crc11`]: `0x583`, width 11, used per bus transition
//! - [`Crc::crc16`]: `0xAC9A`, width 16, byte-wide

/// Polynomial for the 6-bit CRC
pub const POLY_CRC6: u16 = 0x2C;
/// Polynomial for the 8-bit message CRC
pub const POLY_CRC8: u16 = 0xA6;
/// Polynomial for the 11-bit wire CRC
pub const POLY_CRC11: u16 = 0x583;
/// Polynomial for the 16-bit message CRC
pub const POLY_CRC16: u16 = 0xAC9A;

/// Largest supported lookup depth in bits
pub const MAX_DEPTH: u8 = 8;

/// Errors that can occur when setting up a CRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcError {
    /// Width is zero or larger than 16 bits
    InvalidWidth,
    /// Lookup depth is zero or larger than [`MAX_DEPTH`]
    InvalidDepth,
    /// Polynomial has bits set above its width
    PolyTooWide,
}

/// A CRC accumulator with its lookup table
#[derive(Debug, Clone)]
pub struct Crc {
    poly: u16,
    width: u8,
    depth: u8,
    table: [u16; 1 << MAX_DEPTH],
    crc: u16,
}

const fn reflect_step(mut crc: u16, poly: u16, depth: u8) -> u16 {
    let mut i = 0;
    while i < depth {
        crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
        i += 1;
    }
    crc
}

const fn build_table(poly: u16, depth: u8) -> [u16; 1 << MAX_DEPTH] {
    let mut table = [0u16; 1 << MAX_DEPTH];
    let mut b = 0usize;
    while b < (1 << depth) {
        table[b] = reflect_step(b as u16, poly, depth);
        b += 1;
    }
    table
}

impl Crc {
    /// Create a CRC for a reversed polynomial
    ///
    /// # Arguments
    /// - `poly`: reversed polynomial without the `2^width` term
    /// - `width`: polynomial degree (1..=16)
    /// - `depth`: symbol width folded per [`update`](Self::update) (1..=8)
    pub fn new(poly: u16, width: u8, depth: u8) -> Result<Self, CrcError> {
        if width == 0 || width > 16 {
            return Err(CrcError::InvalidWidth);
        }
        if depth == 0 || depth > MAX_DEPTH {
            return Err(CrcError::InvalidDepth);
        }
        if width < 16 && poly >> width != 0 {
            return Err(CrcError::PolyTooWide);
        }
        Ok(Self::build(poly, width, depth))
    }

    const fn build(poly: u16, width: u8, depth: u8) -> Self {
        Self {
            poly,
            width,
            depth,
            table: build_table(poly, depth),
            crc: 0,
        }
    }

    /// 6-bit CRC with the given symbol depth
    ///
    /// A depth above [`MAX_DEPTH`] is clamped.
    pub const fn crc6(depth: u8) -> Self {
        Self::build(POLY_CRC6, 6, clamp_depth(depth))
    }

    /// 8-bit byte-wide CRC, used for short messages
    pub const fn crc8() -> Self {
        Self::build(POLY_CRC8, 8, 8)
    }

    /// 11-bit CRC, one `depth`-bit symbol per bus transition
    ///
    /// A depth above [`MAX_DEPTH`] is clamped.
    pub const fn crc11(depth: u8) -> Self {
        Self::build(POLY_CRC11, 11, clamp_depth(depth))
    }

    /// 16-bit byte-wide CRC, used for messages of eight bytes or more
    pub const fn crc16() -> Self {
        Self::build(POLY_CRC16, 16, 8)
    }

    /// Clear the accumulator
    pub fn reset(&mut self) {
        self.crc = 0;
    }

    /// Fold one `depth`-bit symbol into the accumulator
    ///
    /// Bits above the depth are ignored.
    pub fn update(&mut self, symbol: u16) {
        let mask = (1u16 << self.depth) - 1;
        self.crc = self.table[((symbol ^ self.crc) & mask) as usize] ^ (self.crc >> self.depth);
    }

    /// Fold an `n_bits`-wide value, least significant bits first
    ///
    /// Full `depth`-bit slices go through the table; the remaining bits are
    /// shifted in one at a time.
    pub fn update_n(&mut self, mut value: u32, mut n_bits: u8) {
        if n_bits < 32 {
            value &= (1u32 << n_bits) - 1;
        }
        let d = self.depth;
        let mask = (1u32 << d) - 1;
        while n_bits >= d {
            self.update((value & mask) as u16);
            value >>= d;
            n_bits -= d;
        }
        if n_bits > 0 {
            self.crc = reflect_step(self.crc ^ value as u16, self.poly, n_bits);
        }
    }

    /// Current accumulator value
    pub fn finish(&self) -> u16 {
        self.crc
    }

    /// Polynomial degree in bits
    pub fn width(&self) -> u8 {
        self.width
    }

    /// Symbol width per table lookup
    pub fn depth(&self) -> u8 {
        self.depth
    }
}

const fn clamp_depth(depth: u8) -> u8 {
    if depth == 0 {
        1
    } else if depth > MAX_DEPTH {
        MAX_DEPTH
    } else {
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Plain bit-serial reference, one bit at a time, LSB first
    fn bitwise(poly: u16, width: u8, data: &[u8]) -> u16 {
        let mut crc = 0u16;
        for byte in data {
            for i in 0..8 {
                let bit = ((byte >> i) & 1) as u16;
                crc ^= bit;
                crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            }
        }
        crc & if width == 16 { 0xFFFF } else { (1 << width) - 1 }
    }

    #[test]
    fn test_new_rejects_bad_parameters() {
        assert_eq!(Crc::new(0x583, 0, 4).unwrap_err(), CrcError::InvalidWidth);
        assert_eq!(Crc::new(0x583, 17, 4).unwrap_err(), CrcError::InvalidWidth);
        assert_eq!(Crc::new(0x583, 11, 0).unwrap_err(), CrcError::InvalidDepth);
        assert_eq!(Crc::new(0x583, 11, 9).unwrap_err(), CrcError::InvalidDepth);
        assert_eq!(Crc::new(0x583, 8, 4).unwrap_err(), CrcError::PolyTooWide);
        assert!(Crc::new(POLY_CRC16, 16, 8).is_ok());
    }

    #[test]
    fn test_zero_input_keeps_zero() {
        let mut crc = Crc::crc11(3);
        for _ in 0..10 {
            crc.update(0);
        }
        assert_eq!(crc.finish(), 0);
    }

    #[test]
    fn test_table_matches_bitwise_crc8() {
        let data = b"MoatBus";
        let mut crc = Crc::crc8();
        for &b in data {
            crc.update(b as u16);
        }
        assert_eq!(crc.finish(), bitwise(POLY_CRC8, 8, data));
    }

    #[test]
    fn test_table_matches_bitwise_crc16() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x00, 0xFF];
        let mut crc = Crc::crc16();
        for &b in &data {
            crc.update(b as u16);
        }
        assert_eq!(crc.finish(), bitwise(POLY_CRC16, 16, &data));
    }

    #[test]
    fn test_reset_clears() {
        let mut crc = Crc::crc16();
        crc.update(0x5A);
        assert_ne!(crc.finish(), 0);
        crc.reset();
        assert_eq!(crc.finish(), 0);
    }

    #[test]
    fn test_crc11_fits_width() {
        let mut crc = Crc::crc11(2);
        for s in 0..200u16 {
            crc.update(s & 3);
            assert!(crc.finish() < 1 << 11);
        }
    }

    #[test]
    fn test_update_ignores_high_bits() {
        let mut a = Crc::crc11(4);
        let mut b = Crc::crc11(4);
        a.update(0x5);
        b.update(0xF5);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_depth_clamped() {
        assert_eq!(Crc::crc11(12).depth(), MAX_DEPTH);
        assert_eq!(Crc::crc6(0).depth(), 1);
    }

    proptest! {
        #[test]
        fn prop_update_n_equals_bit_serial(value in any::<u32>(), n in 0u8..=32, depth in 1u8..=8) {
            let mut sliced = Crc::crc11(depth);
            sliced.update_n(value, n);

            let mut serial = Crc::crc11(depth);
            for i in 0..n {
                serial.update_n(value >> i, 1);
            }
            prop_assert_eq!(sliced.finish(), serial.finish());
        }

        #[test]
        fn prop_update_equals_update_n(symbols in proptest::collection::vec(0u16..16, 0..40)) {
            let mut a = Crc::crc11(4);
            let mut b = Crc::crc11(4);
            for &s in &symbols {
                a.update(s);
                b.update_n(s as u32, 4);
            }
            prop_assert_eq!(a.finish(), b.finish());
        }
    }
}
