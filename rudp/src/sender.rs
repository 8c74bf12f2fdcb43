//! Send-side state for the data source.
//!
//! [`Sender`] owns the outbound byte stream from the moment the application
//! hands it over until every byte is acknowledged:
//! - chunking into segments of at most `mss` bytes,
//! - window-gated admission (see [`crate::congestion`]),
//! - the ordered unacked set with one send timestamp per segment,
//! - cumulative-ACK processing,
//! - retransmission of the oldest expired segment with a congestion backoff.
//!
//! It does **not** touch the socket; [`crate::source::Source`] drives it and
//! performs all I/O.  Every time-dependent method takes `now` so the state
//! machine can be exercised without a clock.
//!
//! # Sequence-number layout
//!
//! ```text
//!  send_base          next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space
//!      │ <── unacked ───▶ │ <── queued ─────▶
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::Config;
use crate::congestion::CongestionState;
use crate::packet::{flags, Header, Packet};
use crate::timer::{RetransmitTimer, RetryBudget};

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
///
/// Correct as long as the two values are less than `u32::MAX / 2` apart.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// A segment that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct RetransmitEntry {
    /// The segment exactly as it went on the wire.
    pub packet: Packet,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// Retransmissions of this segment so far.
    pub retries: RetryBudget,
}

/// Counters describing one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// First transmissions of data segments.
    pub segments_sent: u64,
    /// Payload bytes in first transmissions.
    pub bytes_sent: u64,
    /// Timer-driven resends.
    pub retransmissions: u64,
    /// Timer scans that triggered a congestion backoff.
    pub backoffs: u64,
    /// ACKs that advanced the left window edge.
    pub acks: u64,
    /// ACKs that acknowledged nothing new.
    pub duplicate_acks: u64,
}

/// A data segment whose retransmission budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    pub seq: u32,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct Sender {
    /// Sequence number of the oldest unacked byte (left window edge).
    pub send_base: u32,
    /// Sequence number for the next new segment.
    pub next_seq: u32,
    /// Congestion and flow-control budget.
    pub congestion: CongestionState,
    /// Last window advertised by the peer, in segments.
    pub peer_window: u16,
    mss: usize,
    timer: RetransmitTimer,
    max_retransmissions: Option<u32>,
    /// Chunked payloads not yet transmitted.
    queue: VecDeque<Vec<u8>>,
    /// In-flight segments ordered by sequence number (front = oldest).
    unacked: VecDeque<RetransmitEntry>,
    stats: SenderStats,
}

impl Sender {
    /// Create a sender whose first data byte carries `seq_start`.
    pub fn new(seq_start: u32, peer_window: u16, config: &Config) -> Self {
        Self {
            send_base: seq_start,
            next_seq: seq_start,
            congestion: CongestionState::new(
                config.mss,
                config.window_size,
                config.initial_ssthresh,
                config.send_buffer,
            ),
            peer_window: peer_window.max(1),
            mss: config.mss,
            timer: RetransmitTimer::new(config.timeout),
            max_retransmissions: config.max_retransmissions,
            queue: VecDeque::new(),
            unacked: VecDeque::new(),
            stats: SenderStats::default(),
        }
    }

    /// Split `data` into `mss`-sized chunks and queue them for transmission.
    pub fn enqueue(&mut self, data: &[u8]) {
        self.queue.extend(data.chunks(self.mss).map(<[u8]>::to_vec));
    }

    /// Bytes queued but not yet transmitted.
    pub fn queued_bytes(&self) -> usize {
        self.queue.iter().map(Vec::len).sum()
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    /// Nothing left to send and nothing awaiting acknowledgement.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.unacked.is_empty()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Iterate over in-flight segments from oldest to newest.
    pub fn unacked(&self) -> impl Iterator<Item = &RetransmitEntry> {
        self.unacked.iter()
    }

    /// `true` when the flow/congestion gate admits one more segment.
    pub fn can_send(&self) -> bool {
        self.unacked.len() < usize::from(self.peer_window)
            && self.congestion.can_admit(self.unacked.len())
    }

    /// Admit the next queued chunk if the window allows.
    ///
    /// The returned segment is already recorded as in flight with
    /// `sent_at = now`; the caller only has to put it on the wire.
    pub fn poll_transmit(&mut self, ack: u32, window: u16, now: Instant) -> Option<Packet> {
        if !self.can_send() {
            return None;
        }
        let payload = self.queue.pop_front()?;
        let len = payload.len();
        let packet = Packet {
            header: Header {
                seq: self.next_seq,
                ack,
                flags: flags::ACK,
                window,
            },
            payload,
        };

        self.next_seq = self.next_seq.wrapping_add(len as u32);
        self.congestion.on_send(len);
        self.stats.segments_sent += 1;
        self.stats.bytes_sent += len as u64;
        self.unacked.push_back(RetransmitEntry {
            packet: packet.clone(),
            sent_at: now,
            retries: RetryBudget::new(self.max_retransmissions),
        });
        Some(packet)
    }

    /// Process a cumulative ACK and the window advertised with it.
    ///
    /// Removes every unacked segment whose `seq + len ≤ ack_num`, returns
    /// their bytes to the send buffer, and grows the windows once.  Returns
    /// the number of segments acknowledged; `0` for a duplicate or an ACK
    /// outside `[send_base, next_seq]`.
    pub fn on_ack(&mut self, ack_num: u32, peer_window: u16) -> usize {
        self.peer_window = peer_window.max(1);

        if !seq_le(self.send_base, ack_num) || !seq_le(ack_num, self.next_seq) {
            return 0;
        }
        if ack_num == self.send_base {
            self.stats.duplicate_acks += 1;
            return 0;
        }

        let mut acked = 0usize;
        while let Some(front) = self.unacked.front() {
            let seg_end = front.packet.end_seq();
            if !seq_le(seg_end, ack_num) {
                break;
            }
            self.congestion.on_segment_acked(front.packet.payload.len());
            self.send_base = seg_end;
            self.unacked.pop_front();
            acked += 1;
        }

        if acked > 0 {
            self.stats.acks += 1;
            self.congestion.on_ack();
        } else {
            self.stats.duplicate_acks += 1;
        }
        acked
    }

    /// Scan the per-segment timers after a timeout.
    ///
    /// Only the oldest expired segment goes back on the wire; any later
    /// expired segment is re-stamped with `now` and keeps its own timer, so
    /// it is resent on a later scan if it really was lost.  If at least one
    /// segment expired the congestion state backs off once.  Fails when the
    /// resent segment has used up its retransmission budget.
    pub fn poll_timeouts(&mut self, now: Instant) -> Result<Option<Packet>, Exhausted> {
        let mut resend = None;
        for entry in self.unacked.iter_mut() {
            if !self.timer.expired(entry.sent_at, now) {
                continue;
            }
            entry.sent_at = now;
            if resend.is_some() {
                continue;
            }
            if !entry.retries.take() {
                return Err(Exhausted {
                    seq: entry.packet.header.seq,
                });
            }
            resend = Some(entry.packet.clone());
        }

        if resend.is_some() {
            self.congestion.on_timeout();
            self.stats.backoffs += 1;
            self.stats.retransmissions += 1;
        }
        Ok(resend)
    }

    /// Earliest retransmission deadline, or `None` when nothing is in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.unacked
            .iter()
            .map(|e| self.timer.deadline(e.sent_at))
            .min()
    }
}
