//! Mix-level message container with a fixed byte budget.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use super::{
    Direction, HopHeader, MessageId, ParticipantId, PayloadObject, Route, TransportMessage,
};
use crate::SimTime;

/// Size of the fixed frame header preceding the padded payload area.
///
/// Layout: message id (8), direction (1), route position (2), payload length (4).
pub const FRAME_HEADER_LEN: usize = 15;

/// Violations of the message capacity rules.
///
/// These indicate a strategy bug and abort the run that hits them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Message {message} overflow: {requested} bytes requested, {free} bytes free")]
    Overflow {
        message: MessageId,
        requested: usize,
        free: usize,
    },

    #[error("Message {message} is a dummy and cannot carry payload")]
    DummyPayload { message: MessageId },
}

/// Network-level message of fixed capacity.
///
/// Free space is only ever consumed. Once handed to the transport the
/// message is moved out of the sending strategy and never touched by it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    owner: ParticipantId,
    source: ParticipantId,
    destination: ParticipantId,
    created_at: SimTime,
    capacity: usize,
    free_space: usize,
    payload: Vec<PayloadObject>,
    is_dummy: bool,
    direction: Direction,
    route: Route,
    hop_headers: Vec<HopHeader>,
}

impl Message {
    /// Creates an empty message owned and sent by `owner`.
    pub fn new(
        id: MessageId,
        owner: ParticipantId,
        destination: ParticipantId,
        direction: Direction,
        capacity: usize,
        created_at: SimTime,
    ) -> Self {
        Self {
            id,
            owner,
            source: owner,
            destination,
            created_at,
            capacity,
            free_space: capacity,
            payload: Vec::new(),
            is_dummy: false,
            direction,
            route: Route::default(),
            hop_headers: Vec::new(),
        }
    }

    /// Creates cover traffic of the same shape as a real message.
    pub fn dummy(
        id: MessageId,
        owner: ParticipantId,
        destination: ParticipantId,
        direction: Direction,
        capacity: usize,
        created_at: SimTime,
    ) -> Self {
        Self {
            is_dummy: true,
            ..Self::new(id, owner, destination, direction, capacity, created_at)
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn source(&self) -> ParticipantId {
        self.source
    }

    pub fn destination(&self) -> ParticipantId {
        self.destination
    }

    pub fn created_at(&self) -> SimTime {
        self.created_at
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_space(&self) -> usize {
        self.free_space
    }

    /// Bytes of payload carried so far.
    pub fn used_space(&self) -> usize {
        self.capacity - self.free_space
    }

    pub fn is_dummy(&self) -> bool {
        self.is_dummy
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn payload(&self) -> &[PayloadObject] {
        &self.payload
    }

    /// Whether no payload has been added.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether the byte budget is exhausted.
    pub fn is_full(&self) -> bool {
        self.free_space == 0
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn route_mut(&mut self) -> &mut Route {
        &mut self.route
    }

    /// Replaces the route, typically right before first transmission.
    pub fn assign_route(&mut self, route: Route) {
        self.route = route;
    }

    pub fn hop_headers(&self) -> &[HopHeader] {
        &self.hop_headers
    }

    /// Header for hop `index` on the route, if one was stamped.
    pub fn hop_header(&self, index: usize) -> Option<&HopHeader> {
        self.hop_headers.get(index)
    }

    /// Attaches per-hop headers computed by the sender.
    pub fn stamp_hop_headers(&mut self, headers: Vec<HopHeader>) {
        self.hop_headers = headers;
    }

    /// Appends a payload object, consuming free space.
    ///
    /// # Errors
    ///
    /// - `MessageError::DummyPayload` - The message is cover traffic
    /// - `MessageError::Overflow` - The object does not fit the free space
    pub fn add_payload_object(&mut self, object: PayloadObject) -> Result<(), MessageError> {
        if self.is_dummy {
            return Err(MessageError::DummyPayload { message: self.id });
        }
        if object.len() > self.free_space {
            return Err(MessageError::Overflow {
                message: self.id,
                requested: object.len(),
                free: self.free_space,
            });
        }

        self.free_space -= object.len();
        self.payload.push(object);
        Ok(())
    }

    /// Length of the encoded frame. Independent of the payload carried.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.capacity
    }

    /// Encodes the message as a fixed-size frame, zero-padding the payload area.
    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.wire_len());
        frame.put_u64(self.id.0);
        frame.put_u8(self.direction.tag());
        frame.put_u16(self.route.position() as u16);
        frame.put_u32(self.used_space() as u32);

        for object in &self.payload {
            frame.put_slice(object.data());
        }
        frame.put_bytes(0, self.free_space);

        frame.freeze()
    }

    /// Deterministic ordering key derived from the encoded frame.
    pub fn canonical_key(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(self.encode());
        let result = hasher.finalize();

        let mut key = [0u8; 20];
        key.copy_from_slice(&result);
        key
    }
}

/// Moves as much pending application data as fits into `message`.
///
/// The last transport message is fragmented if it does not fit entirely;
/// fully consumed transport messages are removed from the queue. Returns the
/// number of payload bytes added.
///
/// # Errors
///
/// - `MessageError::DummyPayload` - `message` is a dummy
pub fn fill_from_queue(
    message: &mut Message,
    pending: &mut VecDeque<TransportMessage>,
) -> Result<usize, MessageError> {
    let mut added = 0;

    while message.free_space() > 0 {
        let Some(front) = pending.front_mut() else {
            break;
        };
        let Some(fragment) = front.next_fragment(message.free_space()) else {
            pending.pop_front();
            continue;
        };

        added += fragment.len();
        message.add_payload_object(fragment.into())?;

        if front.is_fully_consumed() {
            pending.pop_front();
        }
    }

    Ok(added)
}
