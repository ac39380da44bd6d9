//! Handler states and the events they report

pub mod events;
pub mod machine;

pub use events::{CollisionInfo, ErrorKind, ErrorReport, Outcome, FATAL_THRESHOLD};
pub use machine::{State, WriteState};
