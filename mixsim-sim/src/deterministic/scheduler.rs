//! Ordered event queue with cancellation.

use std::collections::{BinaryHeap, HashSet};

use mixsim_core::SimTime;

use super::clock::DeterministicClock;
use super::events::{Attachment, Event, EventId, EventKey, EventKind, EventTarget};
use crate::SimulationError;

/// Discrete-event scheduler of one simulation run.
///
/// Events execute in `(time, sequence)` order. Sequence numbers grow with
/// every `schedule` call, so events scheduled for the same time run in the
/// order they were scheduled. Canceled events stay in the heap as
/// tombstones and are skipped when they reach the top.
#[derive(Debug)]
pub struct Scheduler {
    clock: DeterministicClock,
    queue: BinaryHeap<Event>,
    pending: HashSet<EventId>,
    canceled: HashSet<EventId>,
    next_id: u64,
    next_sequence: u64,
    sequence_limit: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_sequence_limit(u64::MAX)
    }

    /// Scheduler whose sequence counter re-bases once it reaches `limit`.
    pub fn with_sequence_limit(limit: u64) -> Self {
        Self {
            clock: DeterministicClock::new(),
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            canceled: HashSet::new(),
            next_id: 0,
            next_sequence: 0,
            sequence_limit: limit,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Number of scheduled, not canceled, not yet executed events.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Schedules an event at absolute time `at`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::EventInPast` - `at` lies before the current time
    /// - `SimulationError::SequenceExhausted` - Re-basing cannot free a sequence number
    pub fn schedule(
        &mut self,
        at: SimTime,
        target: EventTarget,
        kind: EventKind,
        attachment: Option<Attachment>,
    ) -> Result<EventId, SimulationError> {
        let now = self.now();
        if at < now {
            return Err(SimulationError::EventInPast { at, now });
        }
        if self.next_sequence >= self.sequence_limit {
            self.rebase_sequences()?;
        }

        let id = EventId(self.next_id);
        self.next_id += 1;
        let key = EventKey {
            time: at,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        self.queue.push(Event {
            id,
            key,
            target,
            kind,
            attachment,
        });
        self.pending.insert(id);
        Ok(id)
    }

    /// Schedules an event `delay` ms after the current time.
    ///
    /// # Errors
    ///
    /// - `SimulationError::SequenceExhausted` - Re-basing cannot free a sequence number
    pub fn schedule_in(
        &mut self,
        delay: SimTime,
        target: EventTarget,
        kind: EventKind,
        attachment: Option<Attachment>,
    ) -> Result<EventId, SimulationError> {
        self.schedule(self.now() + delay, target, kind, attachment)
    }

    /// Cancels a pending event.
    ///
    /// Returns whether a pending event was canceled; executed, unknown and
    /// already canceled events are left alone.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if !self.pending.remove(&id) {
            return false;
        }
        self.canceled.insert(id);
        true
    }

    /// Pops the next event due at or before `limit`, advancing the clock.
    ///
    /// Returns `None` when the queue holds no live event or the next one
    /// lies beyond `limit`; such an event stays queued.
    ///
    /// # Errors
    ///
    /// - `SimulationError::EventInPast` - Queue order was violated
    pub fn pop_due(&mut self, limit: Option<SimTime>) -> Result<Option<Event>, SimulationError> {
        while let Some(next) = self.queue.peek() {
            if self.canceled.remove(&next.id) {
                self.queue.pop();
                continue;
            }
            if limit.is_some_and(|limit| next.key.time > limit) {
                return Ok(None);
            }

            let Some(event) = self.queue.pop() else {
                break;
            };
            self.pending.remove(&event.id);
            self.clock.advance_to(event.key.time)?;
            return Ok(Some(event));
        }
        Ok(None)
    }

    /// Renumbers pending sequence numbers to `0..n`, preserving their order.
    fn rebase_sequences(&mut self) -> Result<(), SimulationError> {
        let mut events = std::mem::take(&mut self.queue).into_sorted_vec();
        // Sorted ascending by the reversed ordering: latest first.
        events.reverse();
        events.retain(|event| !self.canceled.contains(&event.id));
        self.canceled.clear();

        let count = events.len() as u64;
        if count >= self.sequence_limit {
            self.queue = events.into_iter().collect();
            return Err(SimulationError::SequenceExhausted { pending: count });
        }

        for (sequence, event) in events.iter_mut().enumerate() {
            event.key.sequence = sequence as u64;
        }
        tracing::debug!("Re-based {} pending event sequences at {}", count, self.now());

        self.queue = events.into_iter().collect();
        self.next_sequence = count;
        Ok(())
    }
}
