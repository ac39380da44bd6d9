//! Sending side: queueing, digit generation, collisions and retries

use moatbus_protocol::BusMessage;

use super::{BusHandler, Pending};
use crate::state::{CollisionInfo, ErrorKind, ErrorReport, Outcome, State, WriteState};
use crate::traits::BusTransport;

impl<T: BusTransport> BusHandler<T> {
    /// Pick the next message and start sending if the bus allows it
    pub(super) fn send_next(&mut self) {
        if self.sending.is_none() {
            self.sending = match self.prio_queue.pop_front() {
                Some(p) => Some(p),
                None => self.queue.pop_front(),
            };
        }
        let Some(pending) = self.sending.as_ref() else {
            return;
        };

        if self.want_prio.is_none() {
            let wires = self.params.wires;
            let mut prio = pending.msg.prio();
            if prio >= wires {
                prio -= wires;
                if self.no_backoff {
                    self.no_backoff = false;
                    let floor = self.config.timing.backoff;
                    self.backoff
                        .set(self.backoff.value().max(floor.saturating_add(2)));
                }
            }
            self.want_prio = Some(1 << prio.min(wires - 1));
        }

        if self.state == State::Idle && !self.settle {
            self.start_writer();
        }
    }

    /// Assert our priority bit and enter arbitration
    pub(super) fn start_writer(&mut self) {
        let Some(want) = self.want_prio else {
            return;
        };
        let Some(pending) = self.sending.as_mut() else {
            return;
        };
        self.cur_pos = 0;
        self.cur_len = 0;
        self.replay_bits = 0;

        if let Err(e) = pending.msg.start_extract() {
            warn!("cannot frame outgoing message: {:?}", e);
            if let Some(pending) = self.clear_sending() {
                self.finish_message(pending.msg, Outcome::Fatal);
            }
            self.settle = false;
            self.send_next();
            return;
        }

        self.settle = true;
        self.write_state = WriteState::More;
        self.transport.set_wire(want);
        self.set_state(State::WriteAcquire);
    }

    /// Load the next group of digits; false when the frame is done
    fn gen_chunk(&mut self) -> bool {
        let p = self.params;
        match self.write_state {
            WriteState::More => {
                let Some(pending) = self.sending.as_mut() else {
                    return false;
                };
                self.replay_bits = pending.msg.chunk_offset();
                match pending.msg.extract_chunk(p.bits) {
                    None => {
                        self.write_state = WriteState::Final;
                        let n = p.n_end as usize;
                        self.chunk[..n].fill(p.max);
                        self.cur_len = p.n_end;
                        self.cur_pos = p.n_end;
                    }
                    Some(value) => {
                        if value >= p.val_max {
                            // residual chunk doubles as end marker
                            self.write_state = WriteState::Final;
                        }
                        self.load_digits(value, p.len);
                    }
                }
                true
            }
            WriteState::Final => {
                // a collision from here on replays the whole frame
                if let Some(pending) = self.sending.as_ref() {
                    self.replay_bits = pending.msg.chunk_offset();
                }
                self.write_state = WriteState::Crc;
                self.set_state(State::WriteCrc);
                self.load_digits(self.crc.finish() as u32, p.len_crc);
                true
            }
            WriteState::Crc => false,
        }
    }

    /// Split `value` into `n` digits of `1..=MAX`
    fn load_digits(&mut self, mut value: u32, n: u8) {
        let max = self.params.max as u32;
        for digit in self.chunk.iter_mut().take(n as usize) {
            *digit = (value % max) as u8 + 1;
            value /= max;
        }
        self.cur_len = n;
        self.cur_pos = n;
    }

    /// Compute `intended` for the next digit
    ///
    /// Returns false once the CRC is out; the handler is then in
    /// [`State::WriteAck`].
    pub(super) fn write_next(&mut self) -> bool {
        if self.cur_pos == 0 && !self.gen_chunk() {
            self.set_ack_mask();
            self.set_state(State::WriteAck);
            return false;
        }
        self.cur_pos -= 1;
        self.intended = self.last ^ self.chunk[self.cur_pos as usize];
        true
    }

    /// We saw `bits` that are not ours: turn into a reader
    pub(super) fn write_collision(&mut self, bits: u8, settled: bool) {
        // lowest foreign bit: the winner's priority for our next attempt
        let prio = bits & bits.wrapping_neg();
        let Some(pending) = self.sending.as_ref() else {
            self.error(ErrorKind::BadCollision);
            return;
        };
        if prio == 0 {
            self.error(ErrorKind::BadCollision);
            return;
        }

        let info = CollisionInfo {
            src: pending.msg.src,
            dst: pending.msg.dst,
            prio,
            offset: pending.msg.chunk_offset(),
            pos: self.cur_pos,
            backoff: self.backoff.value(),
            settled,
        };
        debug!(
            "collision {:#x} at bit {} digit {}",
            bits, info.offset, info.pos
        );
        let replay = pending.msg.sent_bits(self.replay_bits);
        self.want_prio = Some(prio);
        self.transport.report_error(ErrorReport {
            kind: ErrorKind::Collision,
            state: self.state,
            collision: Some(info),
        });
        self.backoff.escalate();

        let mut msg = BusMessage::default();
        msg.start_add();
        if msg.add_written(&replay).is_err() {
            self.error(ErrorKind::Overflow);
            return;
        }
        self.msg_in = msg;

        // digits of the current chunk everybody has already seen
        let max = self.params.max as u32;
        self.val = 0;
        self.nval = 0;
        let mut n = self.cur_len;
        while n > self.cur_pos + 1 {
            n -= 1;
            self.val = self.val * max + (self.chunk[n as usize] - 1) as u32;
            self.nval += 1;
        }

        let next = if self.state == State::WriteCrc {
            State::ReadCrc
        } else {
            State::Read
        };
        let current = self.current;
        self.set_state(next);
        // With no visible change every writer lost; keep waiting like the
        // other readers until somebody's release shows up.
        if settled && current != self.last {
            if next == State::Read {
                self.crc.update((current ^ self.current_prio) as u16);
            }
            self.read_next(current);
        }
        self.no_backoff = true;
    }

    /// Evaluate the ack round
    pub(super) fn ack_received(&mut self, bits: u8) {
        if let Some(pending) = self.clear_sending() {
            if bits == self.ack_mask {
                self.finish_message(pending.msg, Outcome::Success);
            } else if bits == 0 {
                self.retry(pending, Outcome::Missing);
            } else if bits == self.nack_mask {
                self.retry(pending, Outcome::Error);
            } else if bits & !self.ack_masks != 0 {
                self.error(ErrorKind::BadCollision);
                self.retry(pending, Outcome::Fatal);
            } else {
                // ack and nack together: somebody got it, somebody did not
                self.transport
                    .report_error(ErrorReport::new(ErrorKind::BadCollision, self.state));
                self.finish_message(pending.msg, Outcome::Missing);
            }
        }
        if self.state.is_active() {
            self.set_state(State::WaitIdle);
        }
    }

    /// Requeue at the front, or give up once the retry budget is spent
    fn retry(&mut self, mut pending: Pending, res: Outcome) {
        let tries = *pending.tries.get_or_insert(res.attempts() - 1);
        if tries == 0 {
            self.finish_message(pending.msg, res);
            return;
        }
        pending.tries = Some(tries - 1);
        debug!("retrying after {:?}, {} left", res, tries);

        let queue = if pending.msg.prio() == 0 {
            &mut self.prio_queue
        } else {
            &mut self.queue
        };
        if let Err(pending) = queue.push_front(pending) {
            self.finish_message(pending.msg, res);
            return;
        }
        self.send_next();
    }

    /// Report a final outcome to the transport
    pub(super) fn finish_message(&mut self, msg: BusMessage, res: Outcome) {
        if res == Outcome::Success {
            self.backoff.relax();
        }
        trace!("sent {}>{}: {:?}", msg.src, msg.dst, res);
        self.transport.transmitted(msg, res);
    }

    pub(super) fn clear_sending(&mut self) -> Option<Pending> {
        self.want_prio = None;
        self.sending.take()
    }
}
