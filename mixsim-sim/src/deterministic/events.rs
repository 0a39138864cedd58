//! Event types and ordering for the discrete-event scheduler.

use std::cmp::Ordering;
use std::fmt;

use mixsim_core::SimTime;
use mixsim_core::message::{Message, ParticipantId, TransportMessage};
use mixsim_core::strategy::{TimerHandle, TimerKind};

/// Stable identity of a scheduled event.
///
/// Survives sequence re-basing and is handed to strategies as their
/// [`TimerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl From<EventId> for TimerHandle {
    fn from(id: EventId) -> Self {
        TimerHandle(id.0)
    }
}

impl From<TimerHandle> for EventId {
    fn from(handle: TimerHandle) -> Self {
        EventId(handle.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Execution order of an event: time first, then scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: SimTime,
    pub sequence: u64,
}

/// Receiver of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Client(ParticipantId),
    Mix(ParticipantId),
    Destination,
    /// Traffic generator of the given client
    Traffic(ParticipantId),
    /// The run itself
    Run,
}

/// What happens when an event executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Strategy timer
    Timer(TimerKind),
    /// Message reaches the target over a link
    MessageArrival,
    /// Lower-layer notice that the client's request was delivered
    DeliveryAck,
    /// Application data handed to a client
    ApplicationData,
    /// Traffic generator produces the next application message
    TrafficTick,
    /// Terminate the run
    Stop,
}

/// Payload carried by an event.
#[derive(Debug, Clone)]
pub enum Attachment {
    Message(Message),
    Data(TransportMessage),
}

/// Scheduled unit of work.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub key: EventKey,
    pub target: EventTarget,
    pub kind: EventKind,
    pub attachment: Option<Attachment>,
}

impl Event {
    /// Execution time of the event.
    pub fn time(&self) -> SimTime {
        self.key.time
    }

    /// Takes the attached message, if the event carries one.
    pub fn take_message(&mut self) -> Option<Message> {
        match self.attachment.take() {
            Some(Attachment::Message(message)) => Some(message),
            other => {
                self.attachment = other;
                None
            }
        }
    }

    /// Takes the attached application data, if the event carries some.
    pub fn take_data(&mut self) -> Option<TransportMessage> {
        match self.attachment.take() {
            Some(Attachment::Data(data)) => Some(data),
            other => {
                self.attachment = other;
                None
            }
        }
    }
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn event(id: u64, time: SimTime, sequence: u64) -> Event {
        Event {
            id: EventId(id),
            key: EventKey { time, sequence },
            target: EventTarget::Run,
            kind: EventKind::Stop,
            attachment: None,
        }
    }

    #[test]
    fn test_key_orders_by_time_then_sequence() {
        let early = EventKey {
            time: 5,
            sequence: 9,
        };
        let late = EventKey {
            time: 6,
            sequence: 0,
        };
        let tie = EventKey {
            time: 5,
            sequence: 10,
        };
        assert!(early < late);
        assert!(early < tie);
    }

    #[test]
    fn test_heap_pops_minimum_key_first() {
        let mut heap = BinaryHeap::new();
        heap.push(event(1, 20, 0));
        heap.push(event(2, 10, 2));
        heap.push(event(3, 10, 1));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.id.0).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_attachment_accessors_leave_other_kinds_alone() {
        let mut data_event = event(1, 0, 0);
        data_event.attachment = Some(Attachment::Data(TransportMessage::new(
            mixsim_core::message::TransportMessageId(1),
            ParticipantId(0),
            0,
            bytes::Bytes::from_static(b"abc"),
        )));

        assert!(data_event.take_message().is_none());
        assert!(data_event.attachment.is_some());
        assert_eq!(data_event.take_data().map(|d| d.len()), Some(3));
        assert!(data_event.attachment.is_none());
    }
}
