//! Fixed-capacity bit buffer
//!
//! Bus chunks are 11 or 14 bits wide, so frames are built and taken apart
//! at arbitrary bit offsets. [`BitBuf`] stores bits MSB-first in a
//! `heapless::Vec<u8, _>`; bits past [`BitBuf::len`] in the last byte are
//! always zero.

use heapless::Vec;

/// Maximum payload bytes per message
pub const MAX_DATA_LEN: usize = 128;

/// Buffer size in bytes: header (max 3) + payload + CRC16 + slack for
/// one partially filled chunk
pub const MAX_FRAME_BYTES: usize = 3 + MAX_DATA_LEN + 2 + 2;

/// Errors from bit buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitError {
    /// Buffer capacity exhausted
    Overflow,
    /// Read past the end of the buffer
    OutOfRange,
}

/// Growable bit vector with fixed capacity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuf {
    bytes: Vec<u8, MAX_FRAME_BYTES>,
    len: usize,
}

impl BitBuf {
    /// Capacity in bits
    pub const CAPACITY: usize = MAX_FRAME_BYTES * 8;

    /// Create an empty buffer
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            len: 0,
        }
    }

    /// Build a buffer from whole bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, BitError> {
        let mut buf = Self::new();
        buf.extend_bytes(data)?;
        Ok(buf)
    }

    /// Number of bits stored
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no bits are stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if the length is a multiple of eight
    pub fn is_byte_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    /// Underlying bytes; a trailing partial byte is zero-filled
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop all bits
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.len = 0;
    }

    /// Append one bit
    pub fn push_bit(&mut self, bit: bool) -> Result<(), BitError> {
        let shift = 7 - (self.len % 8);
        if shift == 7 {
            self.bytes.push(0).map_err(|_| BitError::Overflow)?;
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << shift;
            }
        }
        self.len += 1;
        Ok(())
    }

    /// Append the low `n` bits of `value`, most significant first
    pub fn push_bits(&mut self, value: u32, n: u8) -> Result<(), BitError> {
        if n > 32 || self.len + n as usize > Self::CAPACITY {
            return Err(BitError::Overflow);
        }
        for i in (0..n).rev() {
            self.push_bit((value >> i) & 1 != 0)?;
        }
        Ok(())
    }

    /// Append whole bytes at the current (possibly unaligned) position
    pub fn extend_bytes(&mut self, data: &[u8]) -> Result<(), BitError> {
        if self.len + data.len() * 8 > Self::CAPACITY {
            return Err(BitError::Overflow);
        }
        if self.is_byte_aligned() {
            self.bytes
                .extend_from_slice(data)
                .map_err(|_| BitError::Overflow)?;
            self.len += data.len() * 8;
            return Ok(());
        }
        for &b in data {
            self.push_bits(b as u32, 8)?;
        }
        Ok(())
    }

    /// Append all bits of another buffer
    pub fn extend(&mut self, other: &BitBuf) -> Result<(), BitError> {
        if self.len + other.len > Self::CAPACITY {
            return Err(BitError::Overflow);
        }
        for i in 0..other.len {
            self.push_bit(other.bit(i))?;
        }
        Ok(())
    }

    /// Read one bit; out-of-range reads yield `false`
    pub fn bit(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Read `n` bits starting at `offset` as an MSB-first integer
    pub fn get_bits(&self, offset: usize, n: u8) -> Result<u32, BitError> {
        if n > 32 || offset + n as usize > self.len {
            return Err(BitError::OutOfRange);
        }
        let mut value = 0u32;
        for i in 0..n as usize {
            value = (value << 1) | self.bit(offset + i) as u32;
        }
        Ok(value)
    }

    /// Copy of the first `n` bits (all of them if `n` exceeds the length)
    pub fn prefix(&self, n: usize) -> BitBuf {
        let mut out = self.clone();
        out.truncate(n);
        out
    }

    /// Shorten to `n` bits, clearing the dropped bits
    pub fn truncate(&mut self, n: usize) {
        if n >= self.len {
            return;
        }
        self.bytes.truncate(n.div_ceil(8));
        let rem = n % 8;
        if rem != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xFF << (8 - rem);
            }
        }
        self.len = n;
    }

    /// Pad with `bit` up to the next byte boundary
    pub fn pad_to_byte(&mut self, bit: bool) -> Result<(), BitError> {
        while !self.is_byte_aligned() {
            self.push_bit(bit)?;
        }
        Ok(())
    }
}
