//! Transport trait and timer requests

use core::fmt;

use moatbus_protocol::BusMessage;

use crate::state::{ErrorReport, Outcome};

/// Timer request from the handler
///
/// Every request replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Disarm the timer
    Off,
    /// Fire after the short Timer B
    Break,
    /// Fire after this many Timer A periods
    Ticks(u8),
}

impl Timeout {
    /// Signed form: negative disarms, zero is Timer B, positive counts Timer A
    pub fn as_raw(self) -> i16 {
        match self {
            Timeout::Off => -1,
            Timeout::Break => 0,
            Timeout::Ticks(n) => n as i16,
        }
    }

    /// Parse the signed form; values above 255 saturate
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            r if r < 0 => Timeout::Off,
            0 => Timeout::Break,
            r => Timeout::Ticks(r.min(u8::MAX as i16) as u8),
        }
    }
}

/// Services a bus handler needs from its environment
///
/// Implementations must deliver every change of the wire pattern as one
/// [`wire`](crate::BusHandler::wire) call and every expired timer as one
/// [`timeout`](crate::BusHandler::timeout) call, in chronological order.
///
/// Callbacks run synchronously inside those calls. The handler owns its
/// transport, so a callback cannot re-enter it; anything that should lead
/// to a new `send` is queued by the transport and done afterwards.
pub trait BusTransport {
    /// Current wire pattern, bit `n` set while wire `n` is pulled
    fn get_wire(&mut self) -> u8;

    /// Pull exactly the wires set in `bits`, release the rest
    fn set_wire(&mut self, bits: u8);

    /// Arm, re-arm or disarm the timer
    fn set_timeout(&mut self, timeout: Timeout);

    /// A message arrived with a valid CRC
    ///
    /// Returns true if it is addressed to this node and should be acked.
    fn process(&mut self, msg: BusMessage) -> bool;

    /// A queued message is done, successfully or not
    fn transmitted(&mut self, msg: BusMessage, result: Outcome);

    /// A protocol error occurred; purely informational
    fn report_error(&mut self, report: ErrorReport);

    /// Diagnostic text about state changes
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}
}
