//! In-process bus simulator for tests
//!
//! Every node gets a [`SimPort`]. The bus delivers the wired-OR of all
//! outputs `delay` ticks after it changes. This models propagation delay:
//! outputs that change inside that window reach the receivers as one
//! pattern, like on a real bus, and every pattern that does reach them is
//! passed to [`BusHandler::wire`] on its own. Timer A and Timer B are
//! fixed tick counts per port.

use moatbus_protocol::BusMessage;

use crate::config::BusConfig;
use crate::handler::BusHandler;
use crate::state::{ErrorKind, ErrorReport, Outcome};
use crate::traits::{BusTransport, Timeout};

pub const TIMER_A: u64 = 10;
pub const TIMER_B: u64 = 4;

/// Transport of one simulated node
#[derive(Debug, Default)]
pub struct SimPort {
    pub addr: u8,
    /// Ack every frame, not just those addressed to us
    pub promiscuous: bool,
    pub now: u64,
    pub wire_in: u8,
    pub wire_out: u8,
    pub deadline: Option<u64>,
    pub timeouts: Vec<Timeout>,
    pub received: Vec<BusMessage>,
    pub sent: Vec<(BusMessage, Outcome)>,
    pub errors: Vec<ErrorReport>,
}

impl SimPort {
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }
}

impl BusTransport for SimPort {
    fn get_wire(&mut self) -> u8 {
        self.wire_in
    }

    fn set_wire(&mut self, bits: u8) {
        self.wire_out = bits;
    }

    fn set_timeout(&mut self, timeout: Timeout) {
        self.timeouts.push(timeout);
        self.deadline = match timeout {
            Timeout::Off => None,
            Timeout::Break => Some(self.now + TIMER_B),
            Timeout::Ticks(n) => Some(self.now + n as u64 * TIMER_A),
        };
    }

    fn process(&mut self, msg: BusMessage) -> bool {
        let ours = self.promiscuous || msg.dst == self.addr;
        self.received.push(msg);
        ours
    }

    fn transmitted(&mut self, msg: BusMessage, res: Outcome) {
        self.sent.push((msg, res));
    }

    fn report_error(&mut self, report: ErrorReport) {
        self.errors.push(report);
    }
}

/// A set of handlers sharing one simulated bus
pub struct SimBus {
    pub nodes: Vec<BusHandler<SimPort>>,
    pub now: u64,
    delay: u64,
    wire: u8,
    pending: Option<u64>,
}

impl SimBus {
    pub fn new(wires: u8, addrs: &[u8]) -> Self {
        let nodes = addrs
            .iter()
            .map(|&addr| {
                let config = BusConfig::new(wires).with_seed(addr as u32 * 7919 + 1);
                BusHandler::new(SimPort::new(addr), config).unwrap()
            })
            .collect();
        Self {
            nodes,
            now: 0,
            delay: 1,
            wire: 0,
            pending: None,
        }
    }

    pub fn port(&self, i: usize) -> &SimPort {
        self.nodes[i].transport()
    }

    pub fn send(&mut self, i: usize, msg: BusMessage, prio: u8) {
        self.nodes[i].send(msg, prio).unwrap();
        self.check_wires();
    }

    fn outputs(&self) -> u8 {
        self.nodes
            .iter()
            .fold(0, |acc, n| acc | n.transport().wire_out)
    }

    fn check_wires(&mut self) {
        if self.pending.is_none() && self.outputs() != self.wire {
            self.pending = Some(self.now + self.delay);
        }
    }

    /// Process everything due at the next event time; false if idle
    pub fn step(&mut self) -> bool {
        let timer = self
            .nodes
            .iter()
            .filter_map(|n| n.transport().deadline)
            .min();
        let next = match (self.pending, timer) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return false,
        };
        self.now = next;
        for node in &mut self.nodes {
            node.transport_mut().now = next;
        }

        if self.pending == Some(next) {
            self.pending = None;
            let bits = self.outputs();
            if bits != self.wire {
                self.wire = bits;
                for node in &mut self.nodes {
                    node.transport_mut().wire_in = bits;
                }
                for i in 0..self.nodes.len() {
                    self.nodes[i].wire(bits);
                    self.check_wires();
                }
            }
            self.check_wires();
        }

        for i in 0..self.nodes.len() {
            if self.nodes[i].transport().deadline == Some(next) {
                self.nodes[i].transport_mut().deadline = None;
                self.nodes[i].timeout();
                self.check_wires();
            }
        }
        true
    }

    /// Run until nothing is scheduled; false if `limit` ticks pass first
    pub fn run(&mut self, limit: u64) -> bool {
        while self.now <= limit {
            if !self.step() {
                return true;
            }
        }
        false
    }

    /// Run until `done` holds; false on quiescence or timeout
    pub fn run_until(&mut self, limit: u64, mut done: impl FnMut(&SimBus) -> bool) -> bool {
        while self.now <= limit {
            if done(self) {
                return true;
            }
            if !self.step() {
                return done(self);
            }
        }
        false
    }
}

/// Transport for driving a single handler by hand
#[derive(Debug, Default)]
pub struct MockPort {
    pub wire: u8,
    pub out: u8,
    pub ack: bool,
    pub timeouts: Vec<Timeout>,
    pub received: Vec<BusMessage>,
    pub sent: Vec<(BusMessage, Outcome)>,
    pub errors: Vec<ErrorReport>,
}

impl MockPort {
    pub fn last_timeout(&self) -> Option<Timeout> {
        self.timeouts.last().copied()
    }
}

impl BusTransport for MockPort {
    fn get_wire(&mut self) -> u8 {
        self.wire
    }

    fn set_wire(&mut self, bits: u8) {
        self.out = bits;
    }

    fn set_timeout(&mut self, timeout: Timeout) {
        self.timeouts.push(timeout);
    }

    fn process(&mut self, msg: BusMessage) -> bool {
        self.received.push(msg);
        self.ack
    }

    fn transmitted(&mut self, msg: BusMessage, res: Outcome) {
        self.sent.push((msg, res));
    }

    fn report_error(&mut self, report: ErrorReport) {
        self.errors.push(report);
    }
}

/// Feed a wire change to a hand-driven handler
pub fn feed(h: &mut BusHandler<MockPort>, bits: u8) {
    h.transport_mut().wire = bits;
    h.wire(bits);
}
