#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod ack;
pub mod block;
pub mod channel;
pub mod connection;
pub mod error;
pub mod message;
pub mod packet;
pub mod seq;
pub mod seq_buf;
pub mod wire;

pub use {
    ack::Acknowledge,
    block::Block,
    channel::{Channel, ChannelConfig, ChannelData, ChannelStats, ReliableMessageChannel},
    connection::{ChannelStructure, Connection, ReadOutcome},
    error::{ChannelError, ConfigError, SendError},
    message::Message,
    packet::ConnectionPacket,
    seq::Seq,
};
