//! Cumulative packet acknowledgement bitfield.
//!
//! Tracks, from one side's point of view, which of the last 33 packet
//! sequences (the highest received plus a 32-bit trailing bitfield) have
//! been received. The same type doubles as the decoded form of an incoming
//! ack header: `seqs()` yields every packet sequence the header claims as
//! received, from which the caller derives newly-acknowledged packets.

use crate::seq::Seq;

/// A received-packet bitfield: the highest received sequence plus a bitset
/// of the 32 preceding sequences.
///
/// Bit `i` (for `i` in `0..32`) is set iff `last_recv - (i + 1)` has been
/// received. `last_recv` itself is always considered received and needs no
/// bit; it is implied by its own presence in this struct.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Acknowledge {
    /// The highest packet sequence received so far.
    pub last_recv: Seq,
    /// Bitset of the 32 sequences immediately preceding `last_recv`.
    pub bits: u32,
}

impl Acknowledge {
    /// Marks `seq` as received.
    ///
    /// Idempotent: acking the same sequence twice has no further effect.
    pub fn ack(&mut self, seq: Seq) {
        let dist = seq.dist_to(self.last_recv);
        match dist.cmp(&0) {
            core::cmp::Ordering::Greater => {
                // `seq` becomes the new high point; everything we knew
                // slides backwards by `dist`, and the old `last_recv`
                // takes the bit it's now due.
                let shift = dist as u32;
                self.bits = shl(self.bits, shift);
                if let Some(bit) = bit_for_offset(shift) {
                    self.bits |= bit;
                }
                self.last_recv = seq;
            }
            core::cmp::Ordering::Less => {
                let offset = (-dist) as u32;
                if let Some(bit) = bit_for_offset(offset) {
                    self.bits |= bit;
                }
            }
            core::cmp::Ordering::Equal => {}
        }
    }

    /// Returns true if `seq` has been marked as received.
    #[must_use]
    pub fn is_acked(&self, seq: Seq) -> bool {
        let dist = self.last_recv.dist_to(seq);
        match dist.cmp(&0) {
            core::cmp::Ordering::Equal => true,
            core::cmp::Ordering::Greater => {
                bit_for_offset(dist as u32).is_some_and(|bit| self.bits & bit != 0)
            }
            core::cmp::Ordering::Less => false,
        }
    }

    /// Iterates every packet sequence this bitfield claims as received,
    /// starting with `last_recv` and then the set bits, oldest last.
    #[must_use]
    pub fn seqs(&self) -> impl Iterator<Item = Seq> + '_ {
        core::iter::once(self.last_recv).chain((0..u32::BITS).filter_map(move |pos| {
            if self.bits & (1 << pos) != 0 {
                Some(self.last_recv - (pos as u16 + 1))
            } else {
                None
            }
        }))
    }
}

fn bit_for_offset(offset: u32) -> Option<u32> {
    let pos = offset.checked_sub(1)?;
    if pos < u32::BITS {
        Some(1 << pos)
    } else {
        None
    }
}

fn shl(n: u32, by: u32) -> u32 {
    n.checked_shl(by).unwrap_or(0)
}

impl core::fmt::Debug for Acknowledge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Acknowledge")
            .field("last_recv", &self.last_recv)
            .field("bits", &format_args!("{:032b}", self.bits))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_in_order() {
        let mut acks = Acknowledge::default();
        acks.ack(Seq::new(0));
        assert!(acks.is_acked(Seq::new(0)));
        assert!(!acks.is_acked(Seq::new(1)));

        acks.ack(Seq::new(1));
        assert!(acks.is_acked(Seq::new(0)));
        assert!(acks.is_acked(Seq::new(1)));
    }

    #[test]
    fn ack_out_of_order_sets_a_bit_not_last_recv() {
        let mut acks = Acknowledge::default();
        acks.ack(Seq::new(5));
        assert_eq!(acks.last_recv, Seq::new(5));
        acks.ack(Seq::new(2));
        assert!(acks.is_acked(Seq::new(2)));
        assert!(acks.is_acked(Seq::new(5)));
        assert!(!acks.is_acked(Seq::new(3)));
        assert!(!acks.is_acked(Seq::new(4)));
    }

    #[test]
    fn ack_is_idempotent() {
        let mut acks = Acknowledge::default();
        acks.ack(Seq::new(5));
        acks.ack(Seq::new(2));
        let before = acks;
        acks.ack(Seq::new(2));
        assert_eq!(acks, before);
    }

    #[test]
    fn bit_zero_never_represents_last_recv_itself() {
        // a gap of exactly 1: last_recv=1, only seq 0 could be in the bitfield
        let mut acks = Acknowledge::default();
        acks.ack(Seq::new(1));
        // seq 1 is acked purely by being last_recv, no bit required
        assert_eq!(acks.bits, 0);
        assert!(acks.is_acked(Seq::new(1)));
    }

    #[test]
    fn seqs_yields_last_recv_and_set_bits() {
        let acks = Acknowledge {
            last_recv: Seq::new(50),
            bits: 0b10010,
        };
        let got: Vec<_> = acks.seqs().collect();
        assert_eq!(got[0], Seq::new(50));
        assert!(got.contains(&Seq::new(49)));
        assert!(got.contains(&Seq::new(46)));
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn wraparound_ack() {
        let mut acks = Acknowledge {
            last_recv: Seq::new(u16::MAX),
            bits: 0,
        };
        acks.ack(Seq::new(0));
        assert_eq!(acks.last_recv, Seq::new(0));
        assert!(acks.is_acked(Seq::new(u16::MAX)));
    }
}
