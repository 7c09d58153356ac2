//! Application messages.
//!
//! Messages are a plain tagged value rather than a refcounted polymorphic
//! object: the send queue is the unique owner of a `Message` until it is
//! acknowledged (and dropped) or handed to the application; the sent-packet
//! ledger and in-flight packet data reference messages by `id` only, never
//! by a second owning handle, so no reference counting is required (see
//! Design Notes).

use bytes::Bytes;

use crate::seq::Seq;

/// Reserved message type tag identifying a materialized large-block message.
///
/// Application message types are registered in `0..numMessageTypes`; this
/// value is chosen outside that range so it can never collide with a
/// registered type.
pub const BLOCK_MESSAGE_TYPE: u16 = u16::MAX;

/// What kind of payload a [`Message`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// An application-defined message of the given registered type.
    Application(u16),
    /// A block delivered whole (either small enough to never need
    /// fragmenting, or reassembled from fragments).
    Block,
}

impl MessageKind {
    /// The wire type tag for this kind.
    #[must_use]
    pub fn wire_type(self) -> u16 {
        match self {
            Self::Application(ty) => ty,
            Self::Block => BLOCK_MESSAGE_TYPE,
        }
    }

    /// Resolves a wire type tag against the registered type count.
    ///
    /// Returns `None` if the tag is neither the reserved block tag nor a
    /// registered application type; the caller should treat this as a
    /// protocol violation.
    #[must_use]
    pub fn from_wire_type(wire_type: u16, num_message_types: u16) -> Option<Self> {
        if wire_type == BLOCK_MESSAGE_TYPE {
            Some(Self::Block)
        } else if wire_type < num_message_types {
            Some(Self::Application(wire_type))
        } else {
            None
        }
    }
}

/// A single logical message travelling through a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The message's kind/type tag.
    pub kind: MessageKind,
    /// The id assigned to this message by the channel that sent it.
    pub id: Seq,
    /// The application payload, or the reassembled block bytes.
    pub payload: Bytes,
}

impl Message {
    /// Creates an application message.
    #[must_use]
    pub fn application(id: Seq, ty: u16, payload: Bytes) -> Self {
        Self {
            kind: MessageKind::Application(ty),
            id,
            payload,
        }
    }

    /// Creates a block message (a block that travelled whole, or was
    /// reassembled from fragments).
    #[must_use]
    pub fn block(id: Seq, payload: Bytes) -> Self {
        Self {
            kind: MessageKind::Block,
            id,
            payload,
        }
    }

    /// The on-wire serialized length of this message's body (type tag,
    /// length prefix and payload), in bytes.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        crate::wire::varint_len(u64::from(self.kind.wire_type()))
            + crate::wire::varint_len(self.payload.len() as u64)
            + self.payload.len()
    }
}
