//! MoatBus wire protocol
//!
//! MoatBus shares a few open-collector lines (2 to 6 "wires") between many
//! nodes. Every transition of the wire pattern carries one digit; a node
//! that wants the bus asserts a priority bit, and contention is resolved
//! bit-wise like CAN arbitration, only wider.
//!
//! This crate holds the timing-free parts:
//! - [`crc`]: CRC engine over symbols of any width
//! - [`bits`]: the bit buffer frames are built in
//! - [`params`]: per-wire-count chunk geometry
//! - [`message`]: header encoding, chunk extraction and reassembly
//!
//! # Frame overview
//!
//! ```text
//! ┌──────────┬──────┬─────────┬──────────┐
//! │ DST+SRC  │ CODE │ PAYLOAD │ CRC8/16  │
//! │ 6..16b   │ 8b   │ 0–128B  │ 1B/2B    │
//! └──────────┴──────┴─────────┴──────────┘
//! ```
//!
//! The frame is cut into 11- or 14-bit chunks, each sent as a group of
//! base-`MAX` digits, followed by an end marker and a wire-level CRC11.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod bits;
pub mod crc;
pub mod message;
pub mod params;

pub use bits::{BitBuf, BitError, MAX_DATA_LEN, MAX_FRAME_BYTES};
pub use crc::{Crc, CrcError};
pub use message::{BusMessage, CrcState, MessageError, MAX_ADDRESS};
pub use params::{BusParams, MAX_DIGITS, MAX_WIRES, MIN_WIRES};
