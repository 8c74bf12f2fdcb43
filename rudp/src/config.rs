//! Tunable parameters for one endpoint.
//!
//! Every knob has a sensible default; callers override individual fields
//! and then call [`Config::validate`] (the connection constructors do this
//! for them).

use std::time::Duration;

use thiserror::Error;

use crate::packet::HEADER_LEN;
use crate::socket::MAX_DATAGRAM;

/// Endpoint configuration shared by both roles.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest payload carried by one segment, in bytes.
    pub mss: usize,
    /// Per-segment retransmission timeout.
    pub timeout: Duration,
    /// Upper bound on one receive wait; doubles as the timer-scan interval.
    /// Must divide `timeout` evenly.
    pub tick: Duration,
    /// Initial number of segments allowed in flight.
    pub window_size: u32,
    /// Initial slow-start threshold, in segments.
    pub initial_ssthresh: u32,
    /// Send-buffer budget (`available_space`) in bytes.
    pub send_buffer: u64,
    /// Out-of-order segments the receiver will hold; also the advertised
    /// window.
    pub reorder_capacity: u16,
    /// Handshake retransmissions before giving up with `ConnectionFailed`.
    pub handshake_retries: u32,
    /// FIN / FIN+ACK retransmissions before force-closing.
    pub teardown_retries: u32,
    /// Retransmissions of a single data segment before the transfer is
    /// abandoned.  `None` retries forever.
    pub max_retransmissions: Option<u32>,
    /// How long the closing initiator keeps re-acknowledging duplicate
    /// FIN+ACKs after its final ACK.
    pub linger: Duration,
    /// Seed for initial sequence numbers; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let mss = 1000;
        let timeout = Duration::from_millis(500);
        Self {
            mss,
            timeout,
            tick: Duration::from_millis(100),
            window_size: 4,
            initial_ssthresh: 16,
            send_buffer: mss as u64 * 64,
            reorder_capacity: 64,
            handshake_retries: 5,
            teardown_retries: 5,
            max_retransmissions: None,
            linger: timeout,
            seed: None,
        }
    }
}

impl Config {
    /// Reject combinations the transport cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.mss + HEADER_LEN > MAX_DATAGRAM {
            return Err(ConfigError::MssTooLarge(self.mss));
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.reorder_capacity == 0 {
            return Err(ConfigError::ZeroReorderCapacity);
        }
        if self.send_buffer == 0 {
            return Err(ConfigError::ZeroSendBuffer);
        }
        if self.tick.is_zero() || self.timeout.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timeout.as_nanos() % self.tick.as_nanos() != 0 {
            return Err(ConfigError::TickDoesNotDivideTimeout {
                tick: self.tick,
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// Reasons a [`Config`] is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mss must be non-zero")]
    ZeroMss,
    #[error("mss {0} does not fit in a single datagram")]
    MssTooLarge(usize),
    #[error("window size must be at least one segment")]
    ZeroWindow,
    #[error("reorder capacity must be at least one segment")]
    ZeroReorderCapacity,
    #[error("send buffer must be non-zero")]
    ZeroSendBuffer,
    #[error("timeout and tick must be non-zero")]
    ZeroInterval,
    #[error("tick {tick:?} does not divide timeout {timeout:?}")]
    TickDoesNotDivideTimeout { tick: Duration, timeout: Duration },
}
