//! Slow-start / congestion-avoidance window for the data source.
//!
//! Two windows gate transmission at once:
//! - `cwnd`, a byte-denominated congestion window that grows by one `mss`
//!   per accepted ACK in slow start and by `mss² / cwnd` afterwards;
//! - `window_size`, a segment count that grows by one every
//!   `window_size`-th accepted ACK.
//!
//! A retransmission timeout collapses both: the threshold drops to half the
//! segment window, the segment window to one, and `cwnd` to one segment.
//! Separately, `available_space` tracks how many payload bytes the send
//! buffer may still hand out before acknowledgements return them.

/// Congestion state owned by one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionState {
    mss: u64,
    /// Congestion window in bytes.
    pub cwnd: u64,
    /// Slow-start threshold, in segments.
    pub slow_start_threshold: u32,
    /// Send-buffer bytes not currently held by unacked segments.
    pub available_space: u64,
    /// Segments permitted in flight.
    pub window_size: u32,
    /// Accepted ACKs counted toward the next `window_size` increment.
    pub num_acks: u32,
}

impl CongestionState {
    pub fn new(mss: usize, window_size: u32, slow_start_threshold: u32, send_buffer: u64) -> Self {
        let mss = mss as u64;
        Self {
            mss,
            cwnd: mss,
            slow_start_threshold: slow_start_threshold.max(1),
            available_space: send_buffer,
            window_size: window_size.max(1),
            num_acks: 0,
        }
    }

    /// `true` while `cwnd` is below the threshold.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < u64::from(self.slow_start_threshold) * self.mss
    }

    /// Maximum number of unacked segments: `min(window_size, cwnd / mss)`.
    pub fn allowed_in_flight(&self) -> usize {
        let by_bytes = (self.cwnd / self.mss).max(1);
        (self.window_size as u64).min(by_bytes) as usize
    }

    /// The admission gate for one new segment.
    pub fn can_admit(&self, unacked: usize) -> bool {
        unacked < self.allowed_in_flight() && self.available_space > 0
    }

    /// Reserve send-buffer space for a newly transmitted payload.
    pub fn on_send(&mut self, len: usize) {
        self.available_space = self.available_space.saturating_sub(len as u64);
    }

    /// Return an acknowledged segment's bytes to the send buffer.
    pub fn on_segment_acked(&mut self, len: usize) {
        self.available_space = self.available_space.saturating_add(len as u64);
    }

    /// Grow both windows after an ACK that advanced the left edge.
    pub fn on_ack(&mut self) {
        if self.in_slow_start() {
            self.cwnd += self.mss;
        } else {
            self.cwnd += (self.mss * self.mss / self.cwnd).max(1);
        }

        self.num_acks += 1;
        if self.num_acks >= self.window_size {
            self.window_size += 1;
            self.num_acks = 0;
        }
    }

    /// Multiplicative decrease after a retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.slow_start_threshold = (self.window_size / 2).max(1);
        self.window_size = 1;
        self.num_acks = 0;
        self.cwnd = u64::from(self.window_size) * self.mss;
    }
}
