//! `ConnectionPacket`: the ack header plus one payload per registered channel.

use bytes::{Bytes, BytesMut};

use crate::ack::Acknowledge;
use crate::channel::{ChannelConfig, ChannelData};
use crate::seq::Seq;
use crate::wire::{WireRead, WireWrite};

/// Reserved packet-type tag. The distilled protocol's wire layout reserves
/// a packet-type field for a sibling handshake/control packet kind that is
/// out of this crate's scope; this crate emits and expects only this one value.
pub const PACKET_TYPE_CONNECTION: u8 = 0;

/// One serialized datagram: the ack header plus one payload per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPacket {
    /// This packet's own sequence number.
    pub sequence: Seq,
    /// The sender's acknowledgement of the peer's packets.
    pub ack: Acknowledge,
    /// One payload per registered channel, in channel order.
    pub channel_data: Vec<ChannelData>,
}

/// Packet failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketDecodeError {
    /// The wire bytes were malformed.
    #[error(transparent)]
    Wire(#[from] crate::wire::WireError),
    /// A channel payload violated that channel's configuration.
    #[error("channel {index} payload rejected: {source}")]
    Channel {
        /// The offending channel's index.
        index: usize,
        /// The underlying error.
        source: crate::error::ChannelError,
    },
    /// The packet declared a packet type this crate doesn't speak.
    #[error("unsupported packet type {ty}")]
    UnsupportedPacketType {
        /// The offending type tag.
        ty: u8,
    },
}

impl ConnectionPacket {
    /// Encodes this packet onto `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.write_u8(PACKET_TYPE_CONNECTION);
        buf.write_u16(self.sequence.get());
        buf.write_u16(self.ack.last_recv.get());
        buf.write_u32(self.ack.bits);
        for data in &self.channel_data {
            ChannelData::encode(Some(data), buf);
        }
    }

    /// Decodes a packet, validating each channel's payload against the
    /// corresponding entry in `channel_configs`.
    pub fn decode(mut bytes: Bytes, channel_configs: &[ChannelConfig]) -> Result<Self, PacketDecodeError> {
        let packet_type = bytes.read_u8()?;
        if packet_type != PACKET_TYPE_CONNECTION {
            return Err(PacketDecodeError::UnsupportedPacketType { ty: packet_type });
        }
        let sequence = Seq::new(bytes.read_u16()?);
        let last_recv = Seq::new(bytes.read_u16()?);
        let bits = bytes.read_u32()?;

        let mut channel_data = Vec::with_capacity(channel_configs.len());
        for (index, config) in channel_configs.iter().enumerate() {
            let data = ChannelData::decode(&mut bytes, config)
                .map_err(|source| PacketDecodeError::Channel { index, source })?;
            channel_data.push(data);
        }

        Ok(Self {
            sequence,
            ack: Acknowledge { last_recv, bits },
            channel_data,
        })
    }
}
