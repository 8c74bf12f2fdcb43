//! Fault-injecting network layer for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] wraps any [`Transport`] and intercepts outbound segments,
//! applying a configurable fault model:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | Targeted drop    | Drop the n-th data-carrying segment ever sent.       |
//! | Packet loss      | Drop a segment with probability `loss_rate`.         |
//! | Duplication      | Send a segment twice with probability `duplicate_rate`. |
//! | Reordering       | Hold a segment back until the next one has been sent, |
//! |                  | with probability `reorder_rate`.                     |
//!
//! Faults apply on the send path only; wrapping both endpoints covers both
//! directions.  All randomness comes from a seeded RNG so failures reproduce.

use std::net::SocketAddr;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;
use crate::socket::{SocketError, Transport};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given segment is silently dropped.
    pub loss_rate: f64,
    /// Probability that a segment is sent twice.
    pub duplicate_rate: f64,
    /// Probability that a segment is held back behind the next one.
    pub reorder_rate: f64,
    /// Zero-based indices of data segments to drop, counted over every
    /// payload-carrying send (retransmissions included).
    pub drop_data: Vec<u64>,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            drop_data: Vec::new(),
            seed: 0,
        }
    }
}

/// Counts of faults applied so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub data_sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

struct Faults {
    rng: StdRng,
    held: Option<(Packet, SocketAddr)>,
    stats: FaultStats,
}

/// What to put on the wire for one outbound segment.
enum Plan {
    Drop,
    Hold,
    Send { copies: usize, release: Option<(Packet, SocketAddr)> },
}

/// A fault-injecting wrapper around a transport.
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    faults: Mutex<Faults>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        let faults = Faults {
            rng: StdRng::seed_from_u64(config.seed),
            held: None,
            stats: FaultStats::default(),
        };
        Self {
            inner,
            config,
            faults: Mutex::new(faults),
        }
    }

    pub fn stats(&self) -> FaultStats {
        self.lock().stats
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Faults> {
        // A panic while holding the lock leaves only counters behind.
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn plan(&self, packet: &Packet, dest: SocketAddr) -> Plan {
        let mut f = self.lock();

        if packet.is_data() {
            let index = f.stats.data_sent;
            f.stats.data_sent += 1;
            if self.config.drop_data.contains(&index) {
                f.stats.dropped += 1;
                log::debug!("[sim] dropping data segment #{index} seq={}", packet.header.seq);
                return Plan::Drop;
            }
        }

        if self.config.loss_rate > 0.0 && f.rng.gen_bool(self.config.loss_rate) {
            f.stats.dropped += 1;
            log::debug!("[sim] lost seq={} flags={:03b}", packet.header.seq, packet.header.flags);
            return Plan::Drop;
        }

        let reorder = self.config.reorder_rate > 0.0 && f.held.is_none();
        if reorder && f.rng.gen_bool(self.config.reorder_rate) {
            f.stats.reordered += 1;
            f.held = Some((packet.clone(), dest));
            return Plan::Hold;
        }

        let duplicate = self.config.duplicate_rate > 0.0;
        let copies = if duplicate && f.rng.gen_bool(self.config.duplicate_rate) {
            f.stats.duplicated += 1;
            2
        } else {
            1
        };
        Plan::Send {
            copies,
            release: f.held.take(),
        }
    }
}

impl<T: Transport> Transport for Simulator<T> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        match self.plan(packet, dest) {
            Plan::Drop | Plan::Hold => Ok(()),
            Plan::Send { copies, release } => {
                for _ in 0..copies {
                    self.inner.send_to(packet, dest).await?;
                }
                if let Some((held, to)) = release {
                    self.inner.send_to(&held, to).await?;
                }
                Ok(())
            }
        }
    }

    async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        self.inner.recv_from().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::packet::flags;
    use crate::socket::Socket;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    fn data(seq: u32) -> Packet {
        Packet {
            header: crate::packet::Header {
                seq,
                ack: 0,
                flags: flags::ACK,
                window: 1,
            },
            payload: vec![seq as u8],
        }
    }

    async fn recv_seq(s: &Socket) -> Option<u32> {
        tokio::time::timeout(Duration::from_millis(200), s.recv_from())
            .await
            .ok()
            .map(|r| r.unwrap().0.header.seq)
    }

    #[tokio::test]
    async fn targeted_drop_skips_exactly_one() {
        let tx = Simulator::new(
            loopback().await,
            SimulatorConfig {
                drop_data: vec![1],
                ..SimulatorConfig::default()
            },
        );
        let rx = loopback().await;

        // Control segments are not counted.
        tx.send_to(&Packet::control(99, 0, flags::SYN, 1), rx.local_addr)
            .await
            .unwrap();
        for seq in 0..3 {
            tx.send_to(&data(seq), rx.local_addr).await.unwrap();
        }

        assert_eq!(recv_seq(&rx).await, Some(99));
        assert_eq!(recv_seq(&rx).await, Some(0));
        assert_eq!(recv_seq(&rx).await, Some(2));
        assert_eq!(recv_seq(&rx).await, None);
        assert_eq!(tx.stats().dropped, 1);
        assert_eq!(tx.stats().data_sent, 3);
    }

    #[tokio::test]
    async fn reorder_swaps_neighbours() {
        let tx = Simulator::new(
            loopback().await,
            SimulatorConfig {
                reorder_rate: 1.0,
                ..SimulatorConfig::default()
            },
        );
        let rx = loopback().await;

        tx.send_to(&data(0), rx.local_addr).await.unwrap();
        tx.send_to(&data(1), rx.local_addr).await.unwrap();

        assert_eq!(recv_seq(&rx).await, Some(1));
        assert_eq!(recv_seq(&rx).await, Some(0));
        assert_eq!(tx.stats().reordered, 1);
    }

    #[tokio::test]
    async fn duplication_sends_twice() {
        let tx = Simulator::new(
            loopback().await,
            SimulatorConfig {
                duplicate_rate: 1.0,
                ..SimulatorConfig::default()
            },
        );
        let rx = loopback().await;
        tx.send_to(&data(5), rx.local_addr).await.unwrap();
        assert_eq!(recv_seq(&rx).await, Some(5));
        assert_eq!(recv_seq(&rx).await, Some(5));
    }
}
