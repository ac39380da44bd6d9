//! Transport abstraction
//!
//! The handler never touches hardware. A transport observes the wires,
//! drives them, runs the timer and receives the results; see
//! [`BusTransport`].

pub mod transport;

pub use transport::{BusTransport, Timeout};
