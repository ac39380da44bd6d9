//! MoatBus handler
//!
//! A sans-IO state machine for one node on a MoatBus. The firmware (or a
//! test harness) implements [`BusTransport`]: it reports wire changes via
//! [`BusHandler::wire`], timer expiry via [`BusHandler::timeout`], and gets
//! told which wires to pull, which timer to run and what was received or
//! sent.
//!
//! ```text
//!            wire(bits) / timeout()
//!  transport ──────────────────────▶ BusHandler
//!      ▲                                 │
//!      └── set_wire / set_timeout / process / transmitted / report_error
//! ```
//!
//! The handler is not re-entrant: transport callbacks must not call back
//! into it. Messages themselves are encoded by `moatbus-protocol`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod config;
pub mod handler;
pub mod state;
pub mod traits;

#[cfg(test)]
mod sim;

pub use config::{BusConfig, ConfigError, Timing};
pub use handler::{Backoff, BusHandler, SendError, QUEUE_DEPTH};
pub use state::{CollisionInfo, ErrorKind, ErrorReport, Outcome, State, WriteState};
pub use traits::{BusTransport, Timeout};

pub use moatbus_protocol::{BusMessage, BusParams};
