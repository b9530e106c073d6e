//! Reconstruction of 64-bit RTP sequence numbers from their 16-bit wire form.

use crate::constants::LOSS_BURST_WARN;
use tracing::{trace, warn};

/// Maps a 16-bit wire sequence onto the 64-bit sequence space of a sender.
///
/// The first packet of a sender maps to its wire value. Later packets add the
/// wrapping 16-bit distance from `last_true`, read as signed, so late packets
/// land behind the last accepted value. Returns `None` if the result would
/// precede zero.
#[must_use]
pub fn unwrap_sequence(last_true: Option<u64>, short: u16) -> Option<u64> {
    match last_true {
        None => Some(u64::from(short)),
        Some(last) => {
            let delta = short.wrapping_sub(last as u16) as i16;
            last.checked_add_signed(i64::from(delta))
        },
    }
}

/// Placement of a packet relative to the last one accepted from its sender.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SequenceClass {
    /// The packet is a duplicate or arrived late, and must be discarded.
    OutOfOrder,
    /// The packet is new; `gap` concealment frames are owed before its audio.
    InOrder {
        /// Reconstructed 64-bit sequence of the packet.
        sequence: u64,
        /// Number of packets missing between the last accepted one and this.
        gap: u64,
    },
}

/// Classifies `true_seq` against the last accepted sequence of a sender.
#[must_use]
pub fn classify(true_seq: u64, last_true: Option<u64>) -> SequenceClass {
    let gap = match last_true {
        None => 0,
        Some(last) if true_seq <= last => return SequenceClass::OutOfOrder,
        Some(last) => true_seq - last - 1,
    };

    if gap >= LOSS_BURST_WARN {
        warn!("Loss burst: {gap} packets missing before sequence {true_seq}.");
    } else if gap > 0 {
        trace!("{gap} packets missing before sequence {true_seq}.");
    }

    SequenceClass::InOrder {
        sequence: true_seq,
        gap,
    }
}

/// Per-sender sequence state.
///
/// [`classify`](Self::classify) is pure: state only moves on [`accept`](Self::accept),
/// so that packets which later fail authentication do not advance it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SequenceTracker {
    last: Option<u64>,
}

impl SequenceTracker {
    /// Last accepted 64-bit sequence, if any packet has been accepted.
    #[must_use]
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Classifies an incoming wire sequence number.
    #[must_use]
    pub fn classify(&self, short: u16) -> SequenceClass {
        unwrap_sequence(self.last, short)
            .map_or(SequenceClass::OutOfOrder, |seq| classify(seq, self.last))
    }

    /// Records `sequence` as the last accepted value.
    ///
    /// Values at or behind the current one are ignored.
    pub fn accept(&mut self, sequence: u64) {
        if self.last.map_or(true, |last| sequence > last) {
            self.last = Some(sequence);
        }
    }
}
