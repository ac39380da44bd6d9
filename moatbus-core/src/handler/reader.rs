//! Receiving side: digit accumulation, frame completion and acks

use moatbus_protocol::BusMessage;

use super::BusHandler;
use crate::state::{ErrorKind, ErrorReport, State};
use crate::traits::BusTransport;

impl<T: BusTransport> BusHandler<T> {
    /// Somebody else is arbitrating
    pub(super) fn start_reader(&mut self) {
        self.set_state(State::ReadAcquire);
        self.msg_in = BusMessage::default();
        self.msg_in.start_add();
        self.val = 0;
        self.nval = 0;
    }

    /// Consume the settled pattern `bits` as one digit
    pub(super) fn read_next(&mut self, bits: u8) {
        let digit = bits ^ self.last;
        if digit == 0 {
            // every writer dropped off at once
            self.error(ErrorKind::Nothing);
            return;
        }
        self.no_backoff = false;

        let p = self.params;
        self.val = self.val * p.max as u32 + (digit - 1) as u32;
        self.nval += 1;

        if self.state == State::ReadCrc {
            if self.nval == p.len_crc {
                let ok = self.val == self.crc.finish() as u32;
                if !ok {
                    debug!(
                        "wire crc mismatch: {:#x} vs {:#x}",
                        self.val,
                        self.crc.finish()
                    );
                }
                self.read_done(ok);
            }
        } else if self.nval == p.n_end && self.val == p.val_end {
            self.read_crc();
        } else if self.nval == p.len {
            let val = self.val;
            if val >= p.val_overflow() {
                self.error(ErrorKind::Crc);
                return;
            }
            if self.msg_in.add_chunk(p.bits, val).is_err() {
                self.error(ErrorKind::Overflow);
                return;
            }
            if val >= p.val_max {
                self.read_crc();
            } else {
                self.val = 0;
                self.nval = 0;
            }
        }
    }

    fn read_crc(&mut self) {
        self.set_state(State::ReadCrc);
        self.val = 0;
        self.nval = 0;
    }

    /// The wire CRC is in; check the message and decide whether to ack
    fn read_done(&mut self, crc_ok: bool) {
        self.no_backoff = false;
        self.set_ack_mask();
        let mut msg = core::mem::take(&mut self.msg_in);

        if !(crc_ok && msg.check_crc()) {
            warn!("dropping corrupted frame");
            self.transport
                .report_error(ErrorReport::new(ErrorKind::Crc, self.state));
            if self.nack_mask == 0 {
                self.set_state(State::WaitIdle);
            } else {
                self.ack_mask = self.nack_mask;
                self.set_state(State::ReadAck);
            }
            return;
        }

        trace!("received {}>{} code {}", msg.src, msg.dst, msg.code);
        if self.transport.process(msg) {
            self.set_state(State::ReadAck);
        } else {
            self.set_state(State::WaitIdle);
        }
    }

    /// Choose ack and nack patterns that differ from the last data pattern
    pub(super) fn set_ack_mask(&mut self) {
        let bits = if self.settle { self.last } else { self.current };
        self.ack_mask = if bits == 1 { 2 } else { 1 };
        self.nack_mask = if self.params.wires == 2 {
            if bits != 0 {
                0
            } else {
                2
            }
        } else if bits == 1 || bits == 3 {
            4
        } else {
            2
        };
        self.ack_masks = self.ack_mask | self.nack_mask;
    }
}
