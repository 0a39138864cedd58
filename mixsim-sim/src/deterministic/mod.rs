//! Deterministic discrete-event core: logical clock, seeded randomness and
//! the ordered event queue every simulation run is driven by.

mod clock;
mod events;
mod scheduler;

pub use clock::{DeterministicClock, DeterministicRng};
pub use events::{Attachment, Event, EventId, EventKey, EventKind, EventTarget};
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests;
