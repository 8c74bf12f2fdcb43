//! Inbound segment reassembly for the data sink.
//!
//! [`Receiver`] accepts segments in any order and releases a contiguous byte
//! stream:
//!
//! - A segment with `seq == expected_seq` is delivered immediately, then the
//!   out-of-order store is drained for as long as it holds the next
//!   expected sequence number.
//! - A segment ahead of `expected_seq` is stored keyed by `seq`, provided it
//!   fits in the bounded store.
//! - A segment behind `expected_seq` is a duplicate and is discarded.
//!
//! Whatever happens, the caller answers with a cumulative ACK carrying
//! [`Receiver::ack_number`].  A repeated ACK value is how the sender learns
//! about a gap.
//!
//! The store is capped at `capacity` segments and at `capacity · mss` bytes
//! ahead of `expected_seq`; the free part of it is the advertised window.

use std::collections::{BTreeMap, VecDeque};

/// What happened to one inbound data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// In order: this many bytes (including drained ones) became readable.
    Delivered(usize),
    /// Ahead of the expected sequence number; stored for later.
    Buffered,
    /// Already delivered or already stored.
    Duplicate,
    /// Ahead of the expected sequence number but outside the store's bounds.
    Overflow,
}

/// Counters describing one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub delivered_bytes: u64,
    pub buffered: u64,
    pub duplicates: u64,
    pub overflows: u64,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    /// Next contiguous sequence number expected from the peer.
    expected_seq: u32,
    /// Out-of-order payloads keyed by sequence number.
    buffer: BTreeMap<u32, Vec<u8>>,
    /// In-order bytes ready for the application.
    app_buffer: VecDeque<u8>,
    capacity: u16,
    mss: usize,
    stats: ReceiverStats,
}

impl Receiver {
    /// `expected_seq` is the first data sequence number (peer ISN + 1).
    pub fn new(expected_seq: u32, capacity: u16, mss: usize) -> Self {
        Self {
            expected_seq,
            buffer: BTreeMap::new(),
            app_buffer: VecDeque::new(),
            capacity: capacity.max(1),
            mss,
            stats: ReceiverStats::default(),
        }
    }

    /// Process one inbound data segment.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> Outcome {
        if payload.is_empty() {
            return Outcome::Duplicate;
        }

        let offset = seq.wrapping_sub(self.expected_seq);
        if offset == 0 {
            let mut delivered = self.deliver(payload);
            while let Some(next) = self.buffer.remove(&self.expected_seq) {
                delivered += self.deliver(&next);
            }
            return Outcome::Delivered(delivered);
        }

        // Anything more than half the sequence space ahead is behind us.
        if offset > u32::MAX / 2 {
            self.stats.duplicates += 1;
            return Outcome::Duplicate;
        }

        if self.buffer.contains_key(&seq) {
            self.stats.duplicates += 1;
            return Outcome::Duplicate;
        }

        let horizon = usize::from(self.capacity) * self.mss;
        let fits = (offset as usize).saturating_add(payload.len()) <= horizon
            && self.buffer.len() < usize::from(self.capacity);
        if !fits {
            self.stats.overflows += 1;
            return Outcome::Overflow;
        }

        self.buffer.insert(seq, payload.to_vec());
        self.stats.buffered += 1;
        Outcome::Buffered
    }

    fn deliver(&mut self, payload: &[u8]) -> usize {
        self.app_buffer.extend(payload.iter().copied());
        self.expected_seq = self.expected_seq.wrapping_add(payload.len() as u32);
        self.stats.delivered_bytes += payload.len() as u64;
        payload.len()
    }

    /// Cumulative ACK to place in the next outbound segment.
    pub fn ack_number(&self) -> u32 {
        self.expected_seq
    }

    /// Free out-of-order slots, advertised as the receive window.
    pub fn window(&self) -> u16 {
        self.capacity.saturating_sub(self.buffer.len() as u16).max(1)
    }

    /// Number of out-of-order segments held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any out-of-order segments still held; returns how many.
    pub fn clear_buffered(&mut self) -> usize {
        let n = self.buffer.len();
        self.buffer.clear();
        n
    }

    /// Number of in-order bytes waiting for the application.
    pub fn readable(&self) -> usize {
        self.app_buffer.len()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Take every readable byte.
    pub fn take_readable(&mut self) -> Vec<u8> {
        self.app_buffer.drain(..).collect()
    }
}
