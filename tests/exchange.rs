//! End-to-end exchange scenarios driving two `Connection`s against each
//! other directly, without a real socket: each tick, both sides build a
//! packet and (optionally) lose or reorder it before handing it to the peer.

use bytes::Bytes;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reliable_channel::channel::ChannelConfig;
use reliable_channel::{ChannelStructure, Connection};

fn small_config() -> ChannelConfig {
    ChannelConfig {
        max_messages_per_packet: 8,
        send_queue_size: 128,
        receive_queue_size: 128,
        packet_budget: 512,
        max_message_size: 256,
        block_fragment_size: 256,
        max_small_block_size: 256,
        max_large_block_size: 64 * 1024,
        resend_rate: 0.05,
        num_message_types: 4,
    }
}

fn pair() -> (Connection, Connection) {
    let structure = || ChannelStructure::new().add_channel(small_config());
    (
        Connection::new(structure()).unwrap(),
        Connection::new(structure()).unwrap(),
    )
}

/// Exchanges one packet in each direction, optionally dropping one side of
/// the exchange according to `loss`.
fn tick(a: &mut Connection, b: &mut Connection, now: f64, rng: &mut StdRng, loss: f64) {
    a.update(now);
    b.update(now);

    let a_to_b = Connection::serialize(&a.write_packet());
    let b_to_a = Connection::serialize(&b.write_packet());

    if rng.gen::<f64>() >= loss {
        b.read_packet(a_to_b).unwrap();
    }
    if rng.gen::<f64>() >= loss {
        a.read_packet(b_to_a).unwrap();
    }
}

fn drain_all(conn: &mut Connection) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Some(message) = conn.channel_mut(0).receive_message() {
        out.push(message.payload);
    }
    out
}

#[test]
fn lossless_small_messages_arrive_in_order() {
    let (mut a, mut b) = pair();
    let mut rng = StdRng::seed_from_u64(1);

    for i in 0..20u16 {
        a.channel_mut(0)
            .send_message(0, Bytes::from(format!("msg-{i}")))
            .unwrap();
    }

    let mut now = 0.0;
    for _ in 0..10 {
        tick(&mut a, &mut b, now, &mut rng, 0.0);
        now += 0.05;
    }

    let received = drain_all(&mut b);
    let expected: Vec<Bytes> = (0..20u16).map(|i| Bytes::from(format!("msg-{i}"))).collect();
    assert_eq!(received, expected);
}

#[test]
fn messages_survive_ten_percent_loss() {
    let (mut a, mut b) = pair();
    let mut rng = StdRng::seed_from_u64(42);

    for i in 0..40u16 {
        a.channel_mut(0)
            .send_message((i % 4) as u16, Bytes::from(format!("m{i}")))
            .unwrap();
    }

    let mut now = 0.0;
    // enough ticks, at the configured resend rate, for every message to be
    // retried past a run of drops with high probability.
    for _ in 0..400 {
        tick(&mut a, &mut b, now, &mut rng, 0.1);
        now += 0.01;
    }

    let received = drain_all(&mut b);
    let expected: Vec<Bytes> = (0..40u16).map(|i| Bytes::from(format!("m{i}"))).collect();
    assert_eq!(received, expected);
}

#[test]
fn small_block_round_trips_as_a_single_message() {
    let (mut a, mut b) = pair();
    let mut rng = StdRng::seed_from_u64(7);

    let payload = Bytes::from(vec![9u8; 100]);
    a.channel_mut(0).send_block(payload.clone()).unwrap();

    let mut now = 0.0;
    for _ in 0..5 {
        tick(&mut a, &mut b, now, &mut rng, 0.0);
        now += 0.05;
    }

    let received = b.channel_mut(0).receive_message().unwrap();
    assert_eq!(received.payload, payload);
}

#[test]
fn large_block_reassembles_losslessly() {
    let (mut a, mut b) = pair();
    let mut rng = StdRng::seed_from_u64(99);

    let payload = Bytes::from((0..5000u32).map(|n| (n % 256) as u8).collect::<Vec<u8>>());
    a.channel_mut(0).send_block(payload.clone()).unwrap();
    // the channel is busy with the block; ordinary sends are rejected
    assert!(!a.channel_mut(0).can_send_message());

    let mut now = 0.0;
    for _ in 0..200 {
        tick(&mut a, &mut b, now, &mut rng, 0.0);
        now += 0.01;
        if b.channel_mut(0).stats().large_blocks_received > 0 {
            break;
        }
    }

    let received = b.channel_mut(0).receive_message().unwrap();
    assert_eq!(received.payload, payload);
    // the block completing frees the channel back up for ordinary sends
    assert!(a.channel_mut(0).can_send_message());
}

#[test]
fn large_block_survives_loss_and_out_of_order_delivery() {
    let (mut a, mut b) = pair();
    let mut rng = StdRng::seed_from_u64(123);

    let payload = Bytes::from((0..8000u32).map(|n| (n % 251) as u8).collect::<Vec<u8>>());
    a.channel_mut(0).send_block(payload.clone()).unwrap();

    // hold the most recently sent a->b packet back by one tick, simulating
    // a single-slot reorder, on top of flat packet loss.
    let mut held: Option<Bytes> = None;
    let mut now = 0.0;
    for _ in 0..800 {
        a.update(now);
        b.update(now);
        let a_to_b = Connection::serialize(&a.write_packet());
        let b_to_a = Connection::serialize(&b.write_packet());

        if rng.gen::<f64>() >= 0.1 {
            match held.replace(a_to_b) {
                Some(previous) => {
                    b.read_packet(previous).unwrap();
                }
                None => {}
            }
        }
        if rng.gen::<f64>() >= 0.1 {
            a.read_packet(b_to_a).unwrap();
        }
        now += 0.01;
        if b.channel_mut(0).stats().large_blocks_received > 0 {
            break;
        }
    }
    if let Some(last) = held.take() {
        b.read_packet(last).unwrap();
    }

    let received = b.channel_mut(0).receive_message().unwrap();
    assert_eq!(received.payload, payload);
}

#[test]
fn mixed_soak_of_messages_and_a_block_under_loss() {
    let (mut a, mut b) = pair();
    let mut rng = StdRng::seed_from_u64(2024);

    let mut sent = Vec::new();
    for i in 0..10u16 {
        let payload = Bytes::from(format!("pre-{i}"));
        a.channel_mut(0).send_message(0, payload.clone()).unwrap();
        sent.push(payload);
    }

    let block = Bytes::from(vec![3u8; 3000]);
    a.channel_mut(0).send_block(block.clone()).unwrap();

    let mut now = 0.0;
    let mut block_delivered = false;
    let mut post_sent = false;
    for _ in 0..600 {
        tick(&mut a, &mut b, now, &mut rng, 0.05);
        now += 0.01;

        if !block_delivered && b.channel_mut(0).stats().large_blocks_received > 0 {
            block_delivered = true;
        }
        if block_delivered && !post_sent {
            for i in 10..20u16 {
                let payload = Bytes::from(format!("post-{i}"));
                a.channel_mut(0).send_message(1, payload.clone()).unwrap();
                sent.push(payload);
            }
            post_sent = true;
        }
    }

    assert!(block_delivered);
    let received = drain_all(&mut b);
    // the block arrives in its id slot among the ordinary messages; pull it
    // out and check everything else arrived in order around it.
    let mut block_index = None;
    for (index, payload) in received.iter().enumerate() {
        if payload.len() == block.len() {
            block_index = Some(index);
        }
    }
    let block_index = block_index.expect("block delivered as one message");
    assert_eq!(received[block_index], block);
    let without_block: Vec<_> = received
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i != block_index)
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(without_block, sent);
}
