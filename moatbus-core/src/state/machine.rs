//! Bus handler states
//!
//! States are ordered: everything below [`State::Idle`] waits for a quiet
//! bus, everything above it takes part in a frame, and everything from
//! [`State::Write`] up drives the wires.
//!
//! The ack states are named for the node's role in the frame, not for the
//! wire direction: the sender waits in [`State::WriteAck`] without driving,
//! the receiver drives its ack in [`State::ReadAck`].

/// Handler states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    /// Cooldown after a recoverable fault
    Error = 0,
    /// Waiting for the bus to go quiet
    WaitIdle = 1,
    /// Bus quiet; write if something is queued, else read what comes
    Idle = 2,
    /// Receiving payload digits
    Read = 3,
    /// Frame sent; waiting for the receivers' ack/nack
    WriteAck = 4,
    /// Waiting for the first pattern of a frame to settle
    ReadAcquire = 5,
    /// Receiving the wire CRC
    ReadCrc = 6,
    /// Sending payload digits
    Write = 10,
    /// Priority bit asserted, contending for the bus
    WriteAcquire = 11,
    /// Frame received; asserting ack/nack
    ReadAck = 12,
    /// Ack visible; about to release the bus
    WriteEnd = 13,
    /// Sending the wire CRC
    WriteCrc = 14,
}

impl State {
    /// Waiting for a quiet bus (`Error` or `WaitIdle`)
    pub fn is_waiting(&self) -> bool {
        *self < State::Idle
    }

    /// Taking part in a frame
    pub fn is_active(&self) -> bool {
        *self > State::Idle
    }

    /// Driving the wires
    pub fn is_writing(&self) -> bool {
        *self >= State::Write
    }
}

/// Progress of the writer through the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteState {
    /// More data chunks to come
    #[default]
    More,
    /// Data done (end marker or residual sent); CRC next
    Final,
    /// CRC sent
    Crc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classes() {
        assert!(State::Error.is_waiting());
        assert!(State::WaitIdle.is_waiting());
        assert!(!State::Idle.is_waiting());
        assert!(!State::Idle.is_active());

        for s in [State::Read, State::WriteAck, State::ReadAcquire, State::ReadCrc] {
            assert!(s.is_active());
            assert!(!s.is_writing());
        }
        for s in [
            State::Write,
            State::WriteAcquire,
            State::ReadAck,
            State::WriteEnd,
            State::WriteCrc,
        ] {
            assert!(s.is_active());
            assert!(s.is_writing());
        }
    }

    #[test]
    fn test_ack_states_by_role() {
        // the receiver drives its ack, the sender listens for it
        assert!(State::ReadAck.is_writing());
        assert!(!State::WriteAck.is_writing());
        assert!(State::WriteAck.is_active());
    }
}
