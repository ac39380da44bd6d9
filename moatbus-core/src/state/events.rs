//! Protocol errors and transmit outcomes

use super::machine::State;

/// Error codes at or below this value abort the message being sent
pub const FATAL_THRESHOLD: i8 = -20;

/// Protocol-level error kinds
///
/// Positive codes are soft; negative codes abort the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i8)]
pub enum ErrorKind {
    /// A frame started or continued with no visible change
    Nothing = 1,
    /// Lost arbitration mid-frame; recovered by replay
    Collision = -2,
    /// The bus stayed in one state past its deadline
    HoldTime = -11,
    /// Checksum mismatch or undecodable chunk
    Crc = -13,
    /// Inconsistent ack/nack pattern
    BadCollision = -14,
    /// Incoming frame larger than the receive buffer
    Overflow = -15,
    /// A settle arrived in a state that cannot settle
    NoChange = -16,
    /// Too many wire changes between two settles
    Flap = -21,
    /// Impossible arbitration result
    AcquireFatal = -22,
}

impl ErrorKind {
    /// Signed error code
    pub fn code(self) -> i8 {
        self as i8
    }

    /// Aborts the frame in progress
    pub fn aborts(self) -> bool {
        self.code() < 0
    }

    /// Also aborts the message being sent
    pub fn is_fatal(self) -> bool {
        self.code() <= FATAL_THRESHOLD
    }
}

/// Final result of sending a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Acknowledged
    Success = 0,
    /// Nobody acknowledged
    Missing = 1,
    /// Receiver reported a CRC error
    Error = 2,
    /// Aborted by a protocol fault
    Fatal = 3,
}

impl Outcome {
    /// Total attempts allowed before the outcome becomes final
    pub fn attempts(self) -> u8 {
        match self {
            Outcome::Missing => 2,
            Outcome::Error => 4,
            _ => 6,
        }
    }
}

/// Context of a write collision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CollisionInfo {
    /// Source of the message we were sending
    pub src: u8,
    /// Its destination
    pub dst: u8,
    /// Priority bit we fall back to
    pub prio: u8,
    /// Frame bits extracted when the collision hit
    pub offset: usize,
    /// Digits of the current chunk still unsent
    pub pos: u8,
    /// Backoff at the time
    pub backoff: u8,
    /// Seen on a settled value rather than a transition
    pub settled: bool,
}

/// One reported protocol error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorReport {
    /// What went wrong
    pub kind: ErrorKind,
    /// State the handler was in
    pub state: State,
    /// Collision details, for [`ErrorKind::Collision`]
    pub collision: Option<CollisionInfo>,
}

impl ErrorReport {
    /// Report without extra context
    pub fn new(kind: ErrorKind, state: State) -> Self {
        Self {
            kind,
            state,
            collision: None,
        }
    }
}
