//! Application-level messages and the fragments they are split into.

use bytes::Bytes;

use super::{ParticipantId, TransportMessageId};
use crate::SimTime;

/// Application data handed to a client's send strategy.
///
/// Consumed front to back through [`TransportMessage::next_fragment`]; the
/// cursor only moves forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    id: TransportMessageId,
    owner: ParticipantId,
    created_at: SimTime,
    data: Bytes,
    cursor: usize,
}

impl TransportMessage {
    /// Creates an unconsumed application message.
    pub fn new(
        id: TransportMessageId,
        owner: ParticipantId,
        created_at: SimTime,
        data: Bytes,
    ) -> Self {
        Self {
            id,
            owner,
            created_at,
            data,
            cursor: 0,
        }
    }

    pub fn id(&self) -> TransportMessageId {
        self.id
    }

    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn created_at(&self) -> SimTime {
        self.created_at
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes not yet handed out as fragments.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Whether another call to `next_fragment` would yield data.
    pub fn has_next_fragment(&self) -> bool {
        self.remaining() > 0
    }

    pub fn is_fully_consumed(&self) -> bool {
        !self.has_next_fragment()
    }

    /// Cuts the next fragment of at most `max_length` bytes.
    ///
    /// Returns `None` when nothing remains or `max_length` is zero.
    pub fn next_fragment(&mut self, max_length: usize) -> Option<Fragment> {
        let length = max_length.min(self.remaining());
        if length == 0 {
            return None;
        }

        let offset = self.cursor;
        self.cursor += length;

        Some(Fragment {
            parent: self.id,
            parent_created_at: self.created_at,
            offset,
            data: self.data.slice(offset..offset + length),
            is_last_fragment: self.cursor == self.data.len(),
        })
    }
}

/// Length-bounded slice of a [`TransportMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub parent: TransportMessageId,
    pub parent_created_at: SimTime,
    pub offset: usize,
    pub data: Bytes,
    pub is_last_fragment: bool,
}

impl Fragment {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this slice is the entire parent message.
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && self.is_last_fragment
    }
}

/// Item stored inside a [`super::Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadObject {
    /// A small application message carried in one piece
    Whole(Fragment),
    /// Part of an application message spread across several messages
    Fragment(Fragment),
}

impl From<Fragment> for PayloadObject {
    fn from(fragment: Fragment) -> Self {
        if fragment.is_whole() {
            PayloadObject::Whole(fragment)
        } else {
            PayloadObject::Fragment(fragment)
        }
    }
}

impl PayloadObject {
    fn slice(&self) -> &Fragment {
        match self {
            PayloadObject::Whole(fragment) | PayloadObject::Fragment(fragment) => fragment,
        }
    }

    pub fn len(&self) -> usize {
        self.slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slice().is_empty()
    }

    pub fn data(&self) -> &Bytes {
        &self.slice().data
    }

    pub fn parent(&self) -> TransportMessageId {
        self.slice().parent
    }

    pub fn parent_created_at(&self) -> SimTime {
        self.slice().parent_created_at
    }

    /// Whether delivering this object completes its parent message.
    pub fn completes_parent(&self) -> bool {
        self.slice().is_last_fragment
    }
}
