//! `Connection`: owns the ack engine and a fixed set of channels, drives one
//! tick's worth of packet production/consumption.

use bytes::Bytes;

use crate::ack::Acknowledge;
use crate::channel::{Channel, ChannelConfig, ChannelData, ReliableMessageChannel};
use crate::error::ConfigError;
use crate::packet::{ConnectionPacket, PacketDecodeError};
use crate::seq::Seq;

/// Builds the fixed, ordered list of channels a [`Connection`] will own.
///
/// Consumed by [`Connection::new`]; there is no runtime lock flag; the
/// structure simply cannot be mutated once it has been handed to a
/// connection (see `DESIGN.md`).
#[derive(Debug, Clone, Default)]
pub struct ChannelStructure {
    configs: Vec<ChannelConfig>,
    packet_budget: Option<usize>,
}

impl ChannelStructure {
    /// Starts an empty structure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel with the given configuration. Channels are
    /// indexed in the order they are added.
    #[must_use]
    pub fn add_channel(mut self, config: ChannelConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Overrides the connection-wide per-packet byte budget shared across
    /// channels (defaults to each channel's own `packet_budget` summed).
    #[must_use]
    pub fn with_packet_budget(mut self, bytes: usize) -> Self {
        self.packet_budget = Some(bytes);
        self
    }
}

/// Outcome of [`Connection::read_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The packet was new, every channel accepted its payload, and ack
    /// processing ran.
    Accepted,
    /// The packet's sequence had already been received; dropped untouched.
    Duplicate,
    /// At least one channel rejected its payload; the whole packet (and its
    /// ack information) was discarded.
    Rejected,
}

/// A reliable connection: one ack engine plus N channels, ticked once per
/// `write_packet`/`read_packet`/`update` cycle.
#[derive(Debug)]
pub struct Connection {
    configs: Vec<ChannelConfig>,
    channels: Vec<ReliableMessageChannel>,
    packet_budget: usize,
    next_outgoing_seq: Seq,
    /// Packets we've received from the peer, used both for duplicate
    /// detection and to build our own outgoing ack header.
    received: Acknowledge,
}

impl Connection {
    /// Builds a connection from a fixed channel structure.
    pub fn new(structure: ChannelStructure) -> Result<Self, ConfigError> {
        let mut channels = Vec::with_capacity(structure.configs.len());
        for config in &structure.configs {
            channels.push(ReliableMessageChannel::new(config.clone())?);
        }
        let packet_budget = structure
            .packet_budget
            .unwrap_or_else(|| structure.configs.iter().map(|c| c.packet_budget).sum());
        Ok(Self {
            configs: structure.configs,
            channels,
            packet_budget,
            next_outgoing_seq: Seq::ZERO,
            received: Acknowledge::default(),
        })
    }

    /// Number of registered channels.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Borrows channel `index` through the `Channel` interface the
    /// application sends/receives messages through.
    pub fn channel_mut(&mut self, index: usize) -> &mut dyn Channel {
        &mut self.channels[index]
    }

    /// Advances every channel's internal clock.
    pub fn update(&mut self, now: f64) {
        for channel in &mut self.channels {
            channel.update(now);
        }
    }

    /// Builds the next outgoing packet, pulling data from every channel.
    ///
    /// The connection's packet budget is shared across channels in
    /// registration order: each channel is offered `min(remaining,
    /// its own packet_budget)` bytes, and whatever it actually uses is
    /// deducted before offering the rest to the next channel.
    pub fn write_packet(&mut self) -> ConnectionPacket {
        let sequence = self.next_outgoing_seq;
        self.next_outgoing_seq = self.next_outgoing_seq.next();

        let mut remaining = self.packet_budget;
        let mut channel_data = Vec::with_capacity(self.channels.len());
        for (channel, config) in self.channels.iter_mut().zip(&self.configs) {
            let share = remaining.min(config.packet_budget);
            let data = channel.get_data(sequence, share);
            if let Some(data) = &data {
                let mut buf = bytes::BytesMut::new();
                ChannelData::encode(Some(data), &mut buf);
                remaining = remaining.saturating_sub(buf.len());
            }
            channel_data.push(data.unwrap_or(ChannelData::Empty));
        }

        ConnectionPacket {
            sequence,
            ack: self.received,
            channel_data,
        }
    }

    /// Serializes a freshly-built packet to bytes, ready for the (external)
    /// datagram socket.
    #[must_use]
    pub fn serialize(packet: &ConnectionPacket) -> Bytes {
        let mut buf = bytes::BytesMut::new();
        packet.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes and applies one incoming datagram.
    pub fn read_packet(&mut self, bytes: Bytes) -> Result<ReadOutcome, PacketDecodeError> {
        let packet = ConnectionPacket::decode(bytes, &self.configs)?;

        if self.received.is_acked(packet.sequence) {
            return Ok(ReadOutcome::Duplicate);
        }
        // mark received for duplicate-suppression purposes regardless of
        // whether the payload turns out to be usable: a malformed
        // retransmission shouldn't be reprocessed either.
        self.received.ack(packet.sequence);

        for (channel, data) in self.channels.iter_mut().zip(&packet.channel_data) {
            if !channel.process_data(packet.sequence, data) {
                return Ok(ReadOutcome::Rejected);
            }
        }

        for seq in packet.ack.seqs() {
            for channel in &mut self.channels {
                channel.process_ack(seq);
            }
        }
        Ok(ReadOutcome::Accepted)
    }

    /// Clears all connection and channel state, as if newly constructed.
    pub fn reset(&mut self) {
        self.next_outgoing_seq = Seq::ZERO;
        self.received = Acknowledge::default();
        for channel in &mut self.channels {
            channel.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure() -> ChannelStructure {
        ChannelStructure::new()
            .add_channel(ChannelConfig::default())
            .add_channel(ChannelConfig::default())
    }

    #[test]
    fn write_then_read_delivers_message() {
        let mut a = Connection::new(structure()).unwrap();
        let mut b = Connection::new(structure()).unwrap();

        a.channel_mut(0)
            .send_message(0, Bytes::from_static(b"hello"))
            .unwrap();

        let packet = a.write_packet();
        let bytes = Connection::serialize(&packet);
        assert_eq!(b.read_packet(bytes).unwrap(), ReadOutcome::Accepted);

        let received = b.channel_mut(0).receive_message().unwrap();
        assert_eq!(&received.payload[..], b"hello");
    }

    #[test]
    fn duplicate_packets_are_dropped_before_reaching_channels() {
        let mut a = Connection::new(structure()).unwrap();
        let mut b = Connection::new(structure()).unwrap();
        a.channel_mut(0).send_message(0, Bytes::from_static(b"x")).unwrap();
        let packet = a.write_packet();
        let bytes = Connection::serialize(&packet);
        assert_eq!(b.read_packet(bytes.clone()).unwrap(), ReadOutcome::Accepted);
        assert_eq!(b.read_packet(bytes).unwrap(), ReadOutcome::Duplicate);
        // the message was only ever delivered once
        assert!(b.channel_mut(0).receive_message().is_some());
        assert!(b.channel_mut(0).receive_message().is_none());
    }

    #[test]
    fn ack_round_trip_clears_sender_ledger() {
        let mut a = Connection::new(structure()).unwrap();
        let mut b = Connection::new(structure()).unwrap();
        a.channel_mut(0).send_message(0, Bytes::from_static(b"x")).unwrap();

        let packet = a.write_packet();
        b.read_packet(Connection::serialize(&packet)).unwrap();

        // b now acks `a`'s packet 0 in its own next outgoing packet
        let reply = b.write_packet();
        let outcome = a.read_packet(Connection::serialize(&reply)).unwrap();
        assert_eq!(outcome, ReadOutcome::Accepted);
        assert_eq!(a.channel_mut(0).stats().messages_sent, 1);
    }

    #[test]
    fn reset_clears_sequence_numbers_and_channel_state() {
        let mut conn = Connection::new(structure()).unwrap();
        conn.channel_mut(0).send_message(0, Bytes::from_static(b"x")).unwrap();
        let _ = conn.write_packet();
        conn.reset();
        assert_eq!(conn.channel_mut(0).stats().messages_sent, 0);
    }
}
