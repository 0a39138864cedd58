//! Fixed-capacity message model shared by every strategy.
//!
//! A [`Message`] is the unit that travels between participants. Application
//! data arrives as [`TransportMessage`]s which are packed into messages,
//! split into [`Fragment`]s whenever they do not fit the remaining space.

mod mix_message;
mod transport;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use mix_message::{FRAME_HEADER_LEN, Message, MessageError, fill_from_queue};
pub use transport::{Fragment, PayloadObject, TransportMessage};

use crate::SimTime;

/// Identity of a simulated client, mix or destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Identity of a mix-level message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Identity of an application-level message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportMessageId(pub u64);

impl fmt::Display for TransportMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Per-run source of participant, message and transport message ids.
///
/// Every simulation run owns one, so ids restart from the same values in
/// each run and never leak across runs.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    participants: u32,
    messages: u64,
    transports: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_participant(&mut self) -> ParticipantId {
        let id = ParticipantId(self.participants);
        self.participants += 1;
        id
    }

    pub fn next_message(&mut self) -> MessageId {
        let id = MessageId(self.messages);
        self.messages += 1;
        id
    }

    pub fn next_transport(&mut self) -> TransportMessageId {
        let id = TransportMessageId(self.transports);
        self.transports += 1;
        id
    }

    /// Number of participants handed out so far.
    pub fn participants_allocated(&self) -> u32 {
        self.participants
    }
}

/// Whether a message travels towards the destination or back to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client to destination
    Request,
    /// Destination to client
    Reply,
}

impl Direction {
    /// Single byte tag used in the wire frame.
    pub fn tag(self) -> u8 {
        match self {
            Direction::Request => 0,
            Direction::Reply => 1,
        }
    }
}

/// Ordered list of hops a message visits, with the index of the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    hops: Vec<ParticipantId>,
    position: usize,
}

impl Route {
    /// Creates a route starting before its first hop.
    pub fn new(hops: Vec<ParticipantId>) -> Self {
        Self { hops, position: 0 }
    }

    /// Hop the message will be delivered to next.
    pub fn next_hop(&self) -> Option<ParticipantId> {
        self.hops.get(self.position).copied()
    }

    /// Index of the hop currently holding the message.
    ///
    /// Returns `None` while the message has not reached its first hop.
    pub fn current_hop_index(&self) -> Option<usize> {
        self.position.checked_sub(1)
    }

    /// Moves past the next hop. Returns the hop that was passed.
    pub fn advance(&mut self) -> Option<ParticipantId> {
        let hop = self.next_hop()?;
        self.position += 1;
        Some(hop)
    }

    /// Same hops in the opposite order, starting before the first one.
    pub fn reversed(&self) -> Route {
        Route::new(self.hops.iter().rev().copied().collect())
    }

    /// Total number of hops on the route.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the route has no hops.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// All hops in order.
    pub fn hops(&self) -> &[ParticipantId] {
        &self.hops
    }

    /// Number of hops already passed.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Earliest and latest acceptable arrival time at a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalWindow {
    pub earliest: SimTime,
    pub latest: SimTime,
}

impl ArrivalWindow {
    /// Whether `now` lies inside the window (inclusive on both ends).
    pub fn contains(&self, now: SimTime) -> bool {
        (self.earliest..=self.latest).contains(&now)
    }
}

/// Per-hop header carried by Stop-and-Go messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopHeader {
    /// Holding time at this hop in milliseconds
    pub delay_ms: u64,
    /// Acceptable arrival window, when timestamp checking is enabled
    pub window: Option<ArrivalWindow>,
}
