//! In-process domain events: a bounded, sequence-numbered log that the
//! operational status endpoints poll.

mod buffer;
mod types;

pub use buffer::{EventBuffer, EventSeq};
pub use types::{AlertEvent, DomainEvent, JobEvent};
