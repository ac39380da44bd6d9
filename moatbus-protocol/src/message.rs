//! Bus message framing
//!
//! Frame layout on the wire (MSB first):
//! ```text
//! ┌─────────┬─────────┬─────┬──────┬─────────┬──────────┬───────────┐
//! │ DST     │ SRC     │ pad │ CODE │ PAYLOAD │ 1-stuff  │ CRC8/16   │
//! │ 3 or 8b │ 3 or 8b │ 0s  │ 8b   │ bytes   │ to byte  │ 8b or 16b │
//! └─────────┴─────────┴─────┴──────┴─────────┴──────────┴───────────┘
//! ```
//!
//! An address below 4 is sent as `1` + 2 bits, addresses 4..=131 as `0` +
//! 7 bits holding `address - 4`. CRC8 covers frames whose header+payload is
//! shorter than eight bytes, CRC16 everything longer.
//!
//! A message follows one of two lifecycles:
//! - outbound: [`start_send`](BusMessage::start_send) →
//!   [`send_data`](BusMessage::send_data) / [`send_bits`](BusMessage::send_bits) →
//!   [`start_extract`](BusMessage::start_extract) →
//!   [`extract_chunk`](BusMessage::extract_chunk) until `None`
//! - inbound: [`start_add`](BusMessage::start_add) →
//!   [`add_chunk`](BusMessage::add_chunk) / [`add_written`](BusMessage::add_written) →
//!   [`check_crc`](BusMessage::check_crc)

use core::fmt;

use crate::bits::{BitBuf, BitError, MAX_DATA_LEN};
use crate::crc::Crc;

/// Highest encodable node address
pub const MAX_ADDRESS: u8 = 131;

/// Addresses below this use the 3-bit short form
pub const SHORT_ADDRESS_LIMIT: u8 = 4;

/// Header+payload length at which CRC16 replaces CRC8
pub const CRC16_THRESHOLD: usize = 8;

/// Errors from building or decoding a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// Source or destination above [`MAX_ADDRESS`]
    InvalidAddress,
    /// Payload or received frame exceeds the buffer
    TooLong,
    /// Operation does not belong to the message's current lifecycle step
    WrongPhase,
    /// Chunk value does not fit its declared width
    InvalidChunk,
}

impl From<BitError> for MessageError {
    fn from(_: BitError) -> Self {
        MessageError::TooLong
    }
}

/// Where a message stands with respect to its CRC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcState {
    /// Fresh message
    #[default]
    Unset,
    /// Payload being built, or received and CRC stripped
    Building,
    /// CRC attached (outbound) or still included (inbound)
    Complete,
}

/// One message on the bus
#[derive(Debug, Clone, Default)]
pub struct BusMessage {
    /// Source node address
    pub src: u8,
    /// Destination node address
    pub dst: u8,
    /// Command code
    pub code: u8,
    prio: u8,
    crc_state: CrcState,
    inbound: bool,
    /// Outbound: payload. Inbound: every received bit, header included.
    data: BitBuf,
    /// Inbound header length in bytes, 0 until decoded
    header_bytes: u8,
    frame: BitBuf,
    offset: usize,
}

impl BusMessage {
    /// Create an outbound message
    pub fn new(src: u8, dst: u8, code: u8) -> Result<Self, MessageError> {
        let msg = Self {
            src,
            dst,
            code,
            prio: 1,
            ..Self::default()
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Create an outbound message carrying `data`
    pub fn with_data(src: u8, dst: u8, code: u8, data: &[u8]) -> Result<Self, MessageError> {
        let mut msg = Self::new(src, dst, code)?;
        msg.start_send();
        msg.send_data(data)?;
        Ok(msg)
    }

    /// Check that both addresses are encodable
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.src > MAX_ADDRESS || self.dst > MAX_ADDRESS {
            return Err(MessageError::InvalidAddress);
        }
        Ok(())
    }

    /// Priority class assigned when queued
    pub fn prio(&self) -> u8 {
        self.prio
    }

    /// Set the priority class
    pub fn set_prio(&mut self, prio: u8) {
        self.prio = prio;
    }

    /// CRC lifecycle state
    pub fn crc_state(&self) -> CrcState {
        self.crc_state
    }

    /// Header length in bytes for the current addresses
    pub fn header_len(&self) -> usize {
        let addr_bits = addr_width(self.dst) + addr_width(self.src);
        addr_bits.div_ceil(8) + 1
    }

    /// Payload bytes
    ///
    /// For a received message this is only meaningful after a successful
    /// [`check_crc`](Self::check_crc).
    pub fn data(&self) -> &[u8] {
        let bytes = self.data.as_bytes();
        if self.inbound {
            bytes.get(self.header_bytes as usize..).unwrap_or(&[])
        } else {
            bytes
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    // sender

    /// Start building the payload
    pub fn start_send(&mut self) {
        self.inbound = false;
        self.crc_state = CrcState::Building;
    }

    /// Append bytes, zero-padding the payload to a byte boundary first
    pub fn send_data(&mut self, data: &[u8]) -> Result<(), MessageError> {
        self.check_building()?;
        if self.data.len().div_ceil(8) + data.len() > MAX_DATA_LEN {
            return Err(MessageError::TooLong);
        }
        self.data.pad_to_byte(false)?;
        self.data.extend_bytes(data)?;
        Ok(())
    }

    /// Append the low `n` bits of `value`
    pub fn send_bits(&mut self, value: u32, n: u8) -> Result<(), MessageError> {
        self.check_building()?;
        if (self.data.len() + n as usize).div_ceil(8) > MAX_DATA_LEN {
            return Err(MessageError::TooLong);
        }
        self.data.push_bits(value, n)?;
        Ok(())
    }

    fn check_building(&mut self) -> Result<(), MessageError> {
        match (self.inbound, self.crc_state) {
            (false, CrcState::Unset) => {
                self.crc_state = CrcState::Building;
                Ok(())
            }
            (false, CrcState::Building) => Ok(()),
            _ => Err(MessageError::WrongPhase),
        }
    }

    /// Assemble the frame and rewind extraction
    ///
    /// May be called again to restart a transmission.
    pub fn start_extract(&mut self) -> Result<(), MessageError> {
        if self.inbound {
            return Err(MessageError::WrongPhase);
        }
        self.validate()?;

        let mut frame = BitBuf::new();
        push_addr(&mut frame, self.dst)?;
        push_addr(&mut frame, self.src)?;
        frame.pad_to_byte(false)?;
        frame.push_bits(self.code as u32, 8)?;
        frame.extend(&self.data)?;
        frame.pad_to_byte(true)?;

        let body = frame.as_bytes();
        if body.len() < CRC16_THRESHOLD {
            let crc = crc_over(Crc::crc8(), body);
            frame.push_bits(crc as u32, 8)?;
        } else {
            let crc = crc_over(Crc::crc16(), body);
            frame.push_bits(crc as u32, 16)?;
        }

        self.frame = frame;
        self.offset = 0;
        self.crc_state = CrcState::Complete;
        Ok(())
    }

    /// Next `bits`-wide chunk, or `None` once the frame is exhausted
    ///
    /// A final chunk missing fewer than eight bits is padded with ones. One
    /// missing eight or more is sent as a residual: the remaining bits,
    /// one-padded to `bits - 8`, with bit `bits` set as a marker.
    pub fn extract_chunk(&mut self, bits: u8) -> Option<u32> {
        let len = self.frame.len();
        if self.offset >= len || bits == 0 || bits > 24 {
            return None;
        }
        let avail = (len - self.offset).min(bits as usize) as u8;
        let value = self.frame.get_bits(self.offset, avail).ok()?;

        let missing = bits - avail;
        let chunk = if missing == 0 {
            value
        } else if missing >= 8 {
            let pad = missing - 8;
            self.offset -= 8;
            (value << pad) | ones(pad) | (1 << bits)
        } else {
            (value << missing) | ones(missing)
        };
        self.offset += bits as usize;
        Some(chunk)
    }

    /// Bits handed out by [`extract_chunk`](Self::extract_chunk) so far,
    /// padding included
    ///
    /// A residual chunk counts `bits - 8`, the width a receiver decodes.
    pub fn chunk_offset(&self) -> usize {
        self.offset
    }

    /// The first `n` bits as a receiver holds them: frame bits, then the
    /// one-padding of the final chunk
    pub fn sent_bits(&self, n: usize) -> BitBuf {
        let mut out = self.frame.prefix(n);
        for _ in out.len()..n {
            if out.push_bit(true).is_err() {
                break;
            }
        }
        out
    }

    /// The first `n` frame bits, without padding
    pub fn first_bits(&self, n: usize) -> BitBuf {
        self.frame.prefix(n)
    }

    // receiver

    /// Prepare for incoming chunks
    pub fn start_add(&mut self) {
        self.inbound = true;
        self.crc_state = CrcState::Unset;
        self.data.clear();
        self.header_bytes = 0;
    }

    /// Append a received `bits`-wide chunk
    ///
    /// Values with bit `bits` set are residual chunks of `bits - 8` bits.
    pub fn add_chunk(&mut self, bits: u8, value: u32) -> Result<(), MessageError> {
        if !self.inbound || bits <= 8 || bits > 24 {
            return Err(MessageError::WrongPhase);
        }
        let (width, value) = if value >> bits != 0 {
            let width = bits - 8;
            let residual = value - (1 << bits);
            if residual >> width != 0 {
                return Err(MessageError::InvalidChunk);
            }
            (width, residual)
        } else {
            (bits, value)
        };
        self.data.push_bits(value, width)?;
        self.crc_state = CrcState::Complete;
        self.parse_header();
        Ok(())
    }

    /// Append bits that were already on the wire, e.g. replayed after a
    /// collision
    pub fn add_written(&mut self, bits: &BitBuf) -> Result<(), MessageError> {
        if !self.inbound {
            return Err(MessageError::WrongPhase);
        }
        self.data.extend(bits)?;
        if !self.data.is_empty() {
            self.crc_state = CrcState::Complete;
        }
        self.parse_header();
        Ok(())
    }

    fn parse_header(&mut self) {
        if self.header_bytes != 0 {
            return;
        }
        let buf = &self.data;
        if buf.is_empty() {
            return;
        }
        let dst_bits = if buf.bit(0) { 3 } else { 8 };
        if buf.len() <= dst_bits {
            return;
        }
        let src_bits = if buf.bit(dst_bits) { 3 } else { 8 };
        let code_at = (dst_bits + src_bits).div_ceil(8) * 8;
        if buf.len() < code_at + 8 {
            return;
        }
        let (Ok(dst), Ok(src), Ok(code)) = (
            buf.get_bits(0, dst_bits as u8),
            buf.get_bits(dst_bits, src_bits as u8),
            buf.get_bits(code_at, 8),
        ) else {
            return;
        };
        self.dst = decode_addr(dst, dst_bits);
        self.src = decode_addr(src, src_bits);
        self.code = code as u8;
        self.header_bytes = (code_at / 8 + 1) as u8;
    }

    /// Verify and strip the CRC of a received message
    ///
    /// Trailing stuffing bits are discarded. On success the payload is
    /// available through [`data`](Self::data).
    pub fn check_crc(&mut self) -> bool {
        if !self.inbound || self.crc_state != CrcState::Complete || self.header_bytes == 0 {
            return false;
        }
        let raw = self.data.as_bytes();
        let mut n = self.data.len() / 8;
        // nine bytes cannot be a frame; the last one is a stuffing byte
        if n == CRC16_THRESHOLD + 1 && raw[CRC16_THRESHOLD] == 0xFF {
            n = CRC16_THRESHOLD;
        }
        let crc_len = if n <= CRC16_THRESHOLD { 1 } else { 2 };
        if n < self.header_bytes as usize + crc_len {
            return false;
        }
        let body = n - crc_len;
        if (body < CRC16_THRESHOLD) != (crc_len == 1) {
            return false;
        }
        let ok = if crc_len == 1 {
            crc_over(Crc::crc8(), &raw[..body]) == raw[body] as u16
        } else {
            crc_over(Crc::crc16(), &raw[..body]) == u16::from_be_bytes([raw[body], raw[body + 1]])
        };
        if ok {
            self.data.truncate(body * 8);
            self.crc_state = CrcState::Building;
        }
        ok
    }
}

impl PartialEq for BusMessage {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src
            && self.dst == other.dst
            && self.code == other.code
            && self.data() == other.data()
    }
}

impl Eq for BusMessage {}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{} c{}", self.src, self.dst, self.code)?;
        for b in self.data() {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}

fn addr_width(addr: u8) -> usize {
    if addr < SHORT_ADDRESS_LIMIT {
        3
    } else {
        8
    }
}

fn push_addr(buf: &mut BitBuf, addr: u8) -> Result<(), BitError> {
    if addr < SHORT_ADDRESS_LIMIT {
        buf.push_bits(0b100 | addr as u32, 3)
    } else {
        buf.push_bits((addr - SHORT_ADDRESS_LIMIT) as u32, 8)
    }
}

fn decode_addr(value: u32, width: usize) -> u8 {
    if width == 3 {
        (value & 0b11) as u8
    } else {
        (value as u8 & 0x7F) + SHORT_ADDRESS_LIMIT
    }
}

fn ones(n: u8) -> u32 {
    (1u32 << n) - 1
}

fn crc_over(mut crc: Crc, bytes: &[u8]) -> u16 {
    for &b in bytes {
        crc.update(b as u16);
    }
    crc.finish()
}
