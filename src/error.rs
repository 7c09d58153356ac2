//! Typed errors, following the teacher's preference for `thiserror`-derived
//! enums over sentinel codes or exceptions crossing the public API.

use thiserror::Error;

use crate::block::{BlockTooLarge, FragmentMismatch};
use crate::wire::WireError;

/// Rejected `send_message`/`send_block` call: a transient, retry-next-tick condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The send queue has no free slot for the next id.
    #[error("send queue is full")]
    QueueFull,
    /// A large block is currently in flight; `SendBlock` cannot start another.
    #[error("a large block is already in flight on this channel")]
    BlockInFlight,
    /// An ordinary message's payload exceeds `maxMessageSize`.
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge {
        /// The payload's actual length.
        len: usize,
        /// The configured limit.
        max: usize,
    },
    /// A block exceeds `maxLargeBlockSize`.
    #[error(transparent)]
    BlockTooLarge(#[from] BlockTooLarge),
}

/// A sticky protocol-violation or resource-exhaustion condition.
///
/// Once set, the channel that raised it refuses further progress until
/// [`crate::connection::Connection::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A message-type tag outside the registered range (and not the
    /// reserved block type).
    #[error("unknown message type {ty}")]
    UnknownMessageType {
        /// The offending wire type tag.
        ty: u16,
    },
    /// A fragment's geometry was inconsistent with its block.
    #[error(transparent)]
    Fragment(#[from] FragmentMismatch),
    /// A fragment declared a `blockSize` exceeding `maxLargeBlockSize`.
    #[error("block size {size} exceeds the {max} byte limit")]
    BlockSizeExceedsLimit {
        /// The declared size.
        size: usize,
        /// The configured limit.
        max: usize,
    },
    /// A received channel payload was malformed at the wire level.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Reassembly of a large block would exceed the memory budget.
    #[error("reassembling block would need {needed} bytes, {available} available")]
    OutOfMemory {
        /// Bytes the allocation would need.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
}

/// A channel configuration violated one of its own invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A capacity-like field (queue sizes, packet budget, message/block
    /// size limits) was zero.
    #[error("{field} must be non-zero")]
    ZeroField {
        /// The name of the offending field.
        field: &'static str,
    },
    /// `maxSmallBlockSize` exceeded `maxLargeBlockSize`.
    #[error("maxSmallBlockSize ({small}) exceeds maxLargeBlockSize ({large})")]
    SmallBlockExceedsLarge {
        /// The configured small-block threshold.
        small: usize,
        /// The configured large-block limit.
        large: usize,
    },
}
