//! Bus handler state machine
//!
//! [`BusHandler`] arbitrates for the bus, sends queued messages digit by
//! digit, receives everybody else's frames and runs the ack round. It is
//! driven by exactly two events from its transport:
//!
//! - [`BusHandler::wire`]: the observed wire pattern changed
//! - [`BusHandler::timeout`]: the last requested timer expired
//!
//! # Settling
//!
//! After any change the handler waits one Timer A period (`settle`) and only
//! then acts on the pattern; `settle == true` means such a wait is pending.
//! A writer then waits Timer B before asserting its next digit, so every
//! digit costs roughly A + B.
//!
//! # Frame
//!
//! 1. The writer asserts `1 << prio`. The lowest bit wins; losers read.
//! 2. Each data chunk goes out as `LEN` digits, MSB digit first. A digit `d`
//!    is sent by flipping the wires in `d` relative to the previous pattern.
//! 3. `N_END` digits of value `MAX` end the data (unless a residual chunk
//!    already did), then `LEN_CRC` digits carry the wire CRC11.
//! 4. The writer releases the wires and each addressed receiver pulls the
//!    ack (or nack) pattern.
//!
//! A writer that sees foreign bits during its frame drops out, replays what
//! it already sent into its receive buffer and carries on as a reader.

use heapless::Deque;
use moatbus_protocol::{BusMessage, BusParams, Crc, MessageError, MAX_DIGITS};

use crate::config::{BusConfig, ConfigError};
use crate::state::{ErrorKind, ErrorReport, Outcome, State, WriteState};
use crate::traits::{BusTransport, Timeout};

mod backoff;
mod reader;
mod writer;


pub use backoff::Backoff;

/// Capacity of each outbound queue
pub const QUEUE_DEPTH: usize = 8;

/// Why [`BusHandler::send`] refused a message
#[derive(Debug)]
pub enum SendError {
    /// The queue for this priority is full
    QueueFull(BusMessage),
    /// The message cannot be framed
    Invalid(BusMessage, MessageError),
}

impl SendError {
    /// Take the rejected message back
    pub fn into_message(self) -> BusMessage {
        match self {
            SendError::QueueFull(msg) | SendError::Invalid(msg, _) => msg,
        }
    }
}

/// A queued message and its remaining retries
#[derive(Debug, Clone)]
struct Pending {
    msg: BusMessage,
    tries: Option<u8>,
}

/// The bus handler for one attachment
pub struct BusHandler<T: BusTransport> {
    transport: T,
    config: BusConfig,
    params: BusParams,
    /// Wire CRC, one `wires`-bit symbol per digit
    crc: Crc,
    state: State,
    write_state: WriteState,
    settle: bool,
    /// Latest observed pattern
    current: u8,
    /// Pattern at the last settle
    last: u8,
    /// Pattern we are trying to put on the bus
    intended: u8,
    want_prio: Option<u8>,
    current_prio: u8,
    no_backoff: bool,
    backoff: Backoff,
    /// Timer A periods the bus has been quiet, if it is
    last_zero: Option<u8>,
    flapping: u8,
    ack_mask: u8,
    nack_mask: u8,
    ack_masks: u8,
    prio_queue: Deque<Pending, QUEUE_DEPTH>,
    queue: Deque<Pending, QUEUE_DEPTH>,
    sending: Option<Pending>,
    msg_in: BusMessage,
    /// Digits of the chunk being read, accumulated
    val: u32,
    nval: u8,
    /// Digits of the chunk being written, least significant first
    chunk: [u8; MAX_DIGITS],
    cur_len: u8,
    /// Index of the digit in flight
    cur_pos: u8,
    /// Frame bits every reader holds before the chunk in flight
    replay_bits: usize,
}

impl<T: BusTransport> BusHandler<T> {
    /// Attach to a bus
    ///
    /// Starts in [`State::WaitIdle`]; the transport's wire pattern is read
    /// once and a timer is requested.
    pub fn new(transport: T, config: BusConfig) -> Result<Self, ConfigError> {
        let params = config.validate()?;
        let mut handler = Self {
            transport,
            crc: Crc::crc11(params.wires),
            backoff: Backoff::new(&config.timing, config.seed),
            config,
            params,
            state: State::WaitIdle,
            write_state: WriteState::More,
            settle: false,
            current: 0,
            last: 0,
            intended: 0,
            want_prio: None,
            current_prio: 0,
            no_backoff: false,
            last_zero: None,
            flapping: 0,
            ack_mask: 0,
            nack_mask: 0,
            ack_masks: 0,
            prio_queue: Deque::new(),
            queue: Deque::new(),
            sending: None,
            msg_in: BusMessage::default(),
            val: 0,
            nval: 0,
            chunk: [0; MAX_DIGITS],
            cur_len: 0,
            cur_pos: 0,
            replay_bits: 0,
        };

        let bits = handler.transport.get_wire() & params.max;
        handler.current = bits;
        handler.last = bits;
        handler.reset();
        if bits == 0 {
            handler.last_zero = Some(0);
            handler.arm_zero();
        } else {
            handler.arm(Timeout::Off);
        }
        Ok(handler)
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Current backoff in Timer A periods
    pub fn backoff(&self) -> u8 {
        self.backoff.value()
    }

    /// True while a message is being sent or waiting for its retry
    pub fn is_sending(&self) -> bool {
        self.sending.is_some()
    }

    /// Messages waiting in both queues
    pub fn queued(&self) -> usize {
        self.prio_queue.len() + self.queue.len()
    }

    /// Configuration in use
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Chunk geometry in use
    pub fn params(&self) -> &BusParams {
        &self.params
    }

    /// Queue a message
    ///
    /// Priority class 0 goes into the priority queue. Classes at or above
    /// the wire count mean "class `prio - wires`, keep the backoff".
    pub fn send(&mut self, mut msg: BusMessage, prio: u8) -> Result<(), SendError> {
        if let Err(e) = msg.validate() {
            return Err(SendError::Invalid(msg, e));
        }
        msg.set_prio(prio);
        let queue = if prio == 0 {
            &mut self.prio_queue
        } else {
            &mut self.queue
        };
        queue
            .push_back(Pending { msg, tries: None })
            .map_err(|p| SendError::QueueFull(p.msg))?;
        self.send_next();
        Ok(())
    }

    /// The wire pattern changed to `bits`
    pub fn wire(&mut self, bits: u8) {
        let mut bits = bits & self.params.max;
        loop {
            self.last_zero = if bits == 0 { Some(0) } else { None };
            self.current = bits;
            if self.state.is_active() {
                self.flapping += 1;
                if self.flapping > 2 * self.params.wires {
                    self.error(ErrorKind::Flap);
                    return;
                }
            }

            if self.settle {
                self.wire_settle(bits);
            } else {
                self.next_step(false);
            }

            bits = self.transport.get_wire() & self.params.max;
            if bits == self.current {
                break;
            }
        }

        if self.state.is_active() {
            self.settle = true;
            self.arm(Timeout::Ticks(self.config.timing.settle));
        }
    }

    /// The requested timer expired
    pub fn timeout(&mut self) {
        if self.settle {
            self.settle = false;
            self.timeout_settle();
            self.last = self.current;
            if self.state == State::ReadAck {
                // an all-zero pattern hides the writer's release
                if self.current == 0 {
                    self.arm(Timeout::Break);
                } else {
                    self.arm_zero();
                }
            } else if self.state.is_writing() {
                self.arm(Timeout::Break);
            } else if self.state.is_active() {
                self.arm_zero();
            }
        } else {
            self.next_step(true);
            if self.state.is_active() {
                self.settle = true;
                self.arm(Timeout::Ticks(self.config.timing.settle));
            }
        }
    }

    /// A change arrived while waiting for the bus to settle
    fn wire_settle(&mut self, bits: u8) {
        match self.state {
            State::Idle => {
                if bits == 0 {
                    return;
                }
                if self.no_backoff && self.sending.is_some() {
                    self.start_writer();
                } else {
                    self.start_reader();
                }
            }
            State::WriteAcquire => {
                let want = self.want_prio.unwrap_or(0);
                if bits & want.wrapping_sub(1) != 0 {
                    debug!("lost arbitration: {:#x} over {:#x}", bits, want);
                    self.start_reader();
                }
            }
            State::ReadAck => {
                if bits & !(self.ack_masks | self.last) != 0 {
                    self.error(ErrorKind::BadCollision);
                }
            }
            State::WriteEnd => {}
            s if s.is_writing() => {
                let extra = bits & !(self.intended | self.last);
                if extra != 0 {
                    self.write_collision(extra, false);
                }
            }
            _ => {}
        }
    }

    /// The bus has settled on `current`
    fn timeout_settle(&mut self) {
        let bits = self.current;
        self.flapping = 0;

        match self.state {
            State::Idle => {
                if self.sending.is_some() {
                    // in Idle, settle marks the backoff wait
                    self.settle = true;
                    self.start_writer();
                }
            }
            State::WriteAcquire => {
                if Some(bits) == self.want_prio {
                    self.acquired(bits);
                    self.set_state(State::Write);
                } else {
                    // somebody else holds the bus; judge the pattern as reader
                    self.start_reader();
                    self.timeout_settle();
                }
            }
            State::ReadAcquire => {
                if bits != 0 && bits & (bits - 1) == 0 {
                    self.acquired(bits);
                    self.set_state(State::Read);
                } else if bits == 0 {
                    self.error(ErrorKind::Nothing);
                } else {
                    self.error(ErrorKind::AcquireFatal);
                }
            }
            State::Read => {
                self.crc.update((bits ^ self.current_prio) as u16);
                self.read_next(bits);
            }
            State::ReadCrc => self.read_next(bits),
            State::WriteAck => self.ack_received(bits),
            State::Write => {
                if bits != self.intended {
                    self.write_collision(bits & !self.intended, true);
                } else {
                    self.crc.update((bits ^ self.current_prio) as u16);
                }
            }
            State::WriteCrc => {
                if bits != self.intended {
                    self.write_collision(bits & !self.intended, true);
                }
            }
            State::ReadAck => {
                if bits != self.ack_mask {
                    self.error(ErrorKind::BadCollision);
                } else {
                    self.set_state(State::WriteEnd);
                }
            }
            State::WriteEnd => self.error(ErrorKind::NoChange),
            State::Error | State::WaitIdle => {}
        }
    }

    /// Something should happen: a wire changed (`timeout == false`) or an
    /// unsettled wait ran out
    fn next_step(&mut self, timeout: bool) {
        let bits = self.current;

        match self.state {
            s if s.is_waiting() => {
                if timeout {
                    self.error(ErrorKind::HoldTime);
                } else if bits != 0 {
                    self.arm(Timeout::Off);
                } else {
                    self.arm_zero();
                }
            }
            State::Idle => {
                if self.sending.is_some() {
                    self.start_writer();
                } else if bits != 0 {
                    self.start_reader();
                } else {
                    self.arm(Timeout::Off);
                }
            }
            s if !s.is_writing() => {
                // readers expect changes; silence is a hold-time violation
                if timeout {
                    self.error(ErrorKind::HoldTime);
                }
            }
            State::WriteAcquire => {
                if Some(bits) == self.want_prio {
                    self.acquired(bits);
                    self.set_state(State::Write);
                } else {
                    self.start_reader();
                }
            }
            State::Write | State::WriteCrc => {
                if self.write_next() {
                    if bits & !(self.last | self.intended) != 0 {
                        self.write_collision(bits & !self.intended, false);
                    } else {
                        self.transport.set_wire(self.intended);
                    }
                }
            }
            State::ReadAck => {
                if bits & !(self.last | self.ack_masks) != 0 {
                    self.error(ErrorKind::BadCollision);
                } else {
                    self.transport.set_wire(self.ack_mask);
                }
            }
            State::WriteEnd => self.set_state(State::WaitIdle),
            _ => {}
        }
    }

    /// Arbitration is over; a frame with priority bit `prio` starts
    fn acquired(&mut self, prio: u8) {
        self.current_prio = prio;
        self.crc.reset();
        trace!("frame start, prio {:#x}", prio);
    }

    fn set_state(&mut self, state: State) {
        if state == self.state {
            return;
        }
        let prev = self.state;
        trace!("state {:?} -> {:?}", prev, state);
        self.transport
            .debug(format_args!("state {:?} -> {:?}", prev, state));

        if !state.is_writing() && prev.is_writing() {
            self.transport.set_wire(0);
        }
        if matches!(state, State::ReadAcquire | State::WriteAcquire) {
            self.no_backoff = false;
        }
        self.state = state;

        if state == State::Idle {
            self.settle = true;
            let wait = if self.no_backoff && self.sending.is_some() {
                1
            } else {
                self.backoff.value()
            };
            self.arm(Timeout::Ticks(wait));
        } else if state.is_waiting() {
            if prev.is_active() {
                self.reset();
                self.send_next();
            }
            if self.current != 0 {
                self.arm(Timeout::Off);
            } else if state == State::Error {
                self.arm(Timeout::Ticks(self.config.timing.error));
            } else {
                self.arm_zero();
            }
        }
    }

    /// Handle a protocol error
    fn error(&mut self, kind: ErrorKind) {
        if kind == ErrorKind::HoldTime && self.current == 0 {
            // quiet bus: resynchronise without touching anything in flight
            if self.state.is_waiting() {
                self.set_state(State::Idle);
            } else {
                self.set_state(State::WaitIdle);
            }
            return;
        }
        if self.state == State::Error {
            return;
        }

        if kind.aborts() {
            self.backoff.escalate();
        }
        warn!("bus error {:?} in {:?}", kind, self.state);
        self.transport
            .report_error(ErrorReport::new(kind, self.state));
        self.reset();

        if kind.is_fatal() {
            if let Some(pending) = self.clear_sending() {
                self.finish_message(pending.msg, Outcome::Fatal);
            }
            self.set_state(State::WaitIdle);
        } else if kind.aborts() {
            self.set_state(State::Error);
        } else {
            self.set_state(State::WaitIdle);
        }
    }

    /// Drop all per-frame state
    fn reset(&mut self) {
        self.intended = 0;
        self.cur_len = 0;
        self.cur_pos = 0;
        self.ack_mask = 0;
        self.nack_mask = 0;
        self.ack_masks = 0;
        self.val = 0;
        self.nval = 0;
        self.msg_in = BusMessage::default();
        self.msg_in.start_add();
        self.settle = false;
        self.flapping = 0;
    }

    fn arm(&mut self, timeout: Timeout) {
        if let Timeout::Ticks(n) = timeout {
            if let Some(spent) = self.last_zero {
                if spent < self.config.timing.zero {
                    self.last_zero = Some(spent.saturating_add(n));
                }
            }
        }
        self.transport.set_timeout(timeout);
    }

    /// Wait for the rest of the quiet-bus period
    fn arm_zero(&mut self) {
        let zero = self.config.timing.zero;
        let n = match self.last_zero {
            Some(spent) => zero.saturating_sub(spent).max(1),
            None => zero,
        };
        self.arm(Timeout::Ticks(n));
    }
}
