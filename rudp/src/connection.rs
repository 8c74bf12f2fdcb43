//! Connection establishment and the pieces of teardown both roles share.
//!
//! A [`Connection`] is the result of a completed three-way handshake:
//! - [`Connection::connect`]: active open, used by the data sink;
//! - [`Connection::accept`]: passive open, used by the data source.
//!
//! Data transfer lives in [`crate::source::Source`] and
//! [`crate::sink::Sink`], which are built from an established connection.
//!
//! Every wait in this module is bounded.  A handshake segment that goes
//! unanswered for one `timeout` is repeated up to `handshake_retries` times;
//! the closing handshake is repeated up to `teardown_retries` times and then
//! abandoned.

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::time::{timeout, Instant};

use crate::config::{Config, ConfigError};
use crate::packet::{flags, Packet};
use crate::socket::{SocketError, Transport};
use crate::state::{ConnectionState, Role, StateMachine};
use crate::timer::RetryBudget;

/// Errors surfaced to the application.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Control segment from an address other than the bound peer.
    #[error("segment from unexpected peer {0}")]
    UnexpectedPeer(SocketAddr),
    /// Acknowledgement from an address other than the bound peer.
    #[error("acknowledgement from unrecognised peer {0}")]
    PeerMismatch(SocketAddr),
    #[error("connection failed after {attempts} handshake attempts")]
    ConnectionFailed { attempts: u32 },
    #[error("closing handshake did not complete; connection force-closed")]
    UngracefulClose,
    #[error("segment seq={seq} exceeded its retransmission budget")]
    RetriesExhausted { seq: u32 },
    #[error("operation not valid in state {0}")]
    BadState(ConnectionState),
    #[error("peer closed the connection with {undelivered} bytes unsent")]
    PeerClosed { undelivered: usize },
}

/// An established connection, before either role's data path is attached.
pub struct Connection<T> {
    pub machine: StateMachine,
    transport: T,
    peer: SocketAddr,
    config: Config,
}

impl<T: Transport> Connection<T> {
    /// Active open (data sink): send SYN to `peer`, await SYN+ACK, send ACK.
    pub async fn connect(transport: T, peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        let mut rng = isn_rng(&config);
        let mut machine = StateMachine::new(Role::Receiver, rng.gen(), config.reorder_capacity);

        let syn = machine.open(peer)?;
        log::info!("[handshake] → SYN seq={} to {peer}", syn.header.seq);
        transport.send_to(&syn, peer).await?;

        handshake(&transport, &mut machine, &config, &mut rng).await?;
        Ok(Self {
            machine,
            transport,
            peer,
            config,
        })
    }

    /// Passive open (data source): wait for a SYN from anyone, answer with
    /// SYN+ACK, await the ACK.
    pub async fn accept(transport: T, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        let mut rng = isn_rng(&config);
        let mut machine = StateMachine::new(Role::Sender, rng.gen(), config.reorder_capacity);

        log::info!("[handshake] listening on {}", transport.local_addr());
        let peer = loop {
            let (pkt, from) = match transport.recv_from().await {
                Ok(v) => v,
                Err(e) if e.is_malformed() => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(syn_ack) = machine.on_segment(&pkt, from)? {
                transport.send_to(&syn_ack, from).await?;
                break from;
            }
        };

        handshake(&transport, &mut machine, &config, &mut rng).await?;
        Ok(Self {
            machine,
            transport,
            peer,
            config,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Break the connection into its parts for a data-path driver.
    pub fn into_parts(self) -> (StateMachine, T, SocketAddr, Config) {
        (self.machine, self.transport, self.peer, self.config)
    }
}

fn isn_rng(config: &Config) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Drive `SynSent` / `SynReceived` to `Established`, repeating the pending
/// handshake segment every `timeout`.
async fn handshake<T: Transport>(
    transport: &T,
    machine: &mut StateMachine,
    config: &Config,
    rng: &mut StdRng,
) -> Result<(), ConnError> {
    let mut budget = RetryBudget::limited(config.handshake_retries);
    let mut deadline = Instant::now() + config.timeout;

    while !machine.is_established() {
        let wait = deadline.saturating_duration_since(Instant::now());
        if let Some((pkt, from)) = recv_segment(transport, wait).await? {
            if let Some(reply) = machine.on_segment(&pkt, from)? {
                transport.send_to(&reply, from).await?;
            }
            continue;
        }
        if Instant::now() < deadline {
            continue;
        }
        if !budget.take() {
            return Err(ConnError::ConnectionFailed {
                attempts: budget.used() + 1,
            });
        }
        if let (Some(retry), Some(peer)) = (machine.retry_handshake(rng.gen()), machine.peer()) {
            log::warn!(
                "[handshake] timeout in {}; retry {} seq={}",
                machine.state(),
                budget.used(),
                retry.header.seq
            );
            transport.send_to(&retry, peer).await?;
        }
        deadline = Instant::now() + config.timeout;
    }
    Ok(())
}

/// Wait up to `wait` for one well-formed segment.
///
/// Returns `None` on timeout.  Malformed datagrams are dropped without a
/// reply and also yield `None`.
pub(crate) async fn recv_segment<T: Transport>(
    transport: &T,
    wait: Duration,
) -> Result<Option<(Packet, SocketAddr)>, ConnError> {
    match timeout(wait, transport.recv_from()).await {
        Err(_elapsed) => Ok(None),
        Ok(Ok(v)) => Ok(Some(v)),
        Ok(Err(e)) if e.is_malformed() => {
            log::debug!("dropping datagram: {e}");
            Ok(None)
        }
        Ok(Err(e)) => Err(e.into()),
    }
}

/// `true` for segments that only the state machine interprets.
pub(crate) fn is_control(pkt: &Packet) -> bool {
    pkt.header.flags & (flags::SYN | flags::FIN) != 0
}

/// Complete a closing handshake already started by `machine`.
///
/// The pending FIN (or FIN+ACK) is repeated every `timeout`.  Segments the
/// state machine ignores are handed to `on_other`, whose reply (if any) is
/// sent.  When retries run out the connection is force-closed and
/// [`ConnError::UngracefulClose`] is returned.  The side that sent the final
/// ACK then lingers for `linger`, repeating it for any repeated FIN+ACK.
pub(crate) async fn await_close<T, F>(
    transport: &T,
    machine: &mut StateMachine,
    peer: SocketAddr,
    config: &Config,
    mut on_other: F,
) -> Result<(), ConnError>
where
    T: Transport,
    F: FnMut(&Packet) -> Option<Packet>,
{
    let mut budget = RetryBudget::limited(config.teardown_retries);
    let mut deadline = Instant::now() + config.timeout;

    while !machine.is_closed() {
        let wait = deadline.saturating_duration_since(Instant::now());
        if let Some((pkt, from)) = recv_segment(transport, wait).await? {
            if let Some(reply) = machine.on_segment(&pkt, from)? {
                transport.send_to(&reply, peer).await?;
            } else if !is_control(&pkt) {
                if let Some(reply) = on_other(&pkt) {
                    transport.send_to(&reply, peer).await?;
                }
            }
            continue;
        }
        if Instant::now() < deadline {
            continue;
        }
        if !budget.take() {
            log::warn!("[teardown] no answer after {} retries; force-closing", budget.used());
            machine.force_close();
            return Err(ConnError::UngracefulClose);
        }
        if let Some(retry) = machine.retry_teardown() {
            log::debug!("[teardown] timeout; repeating flags={:03b}", retry.header.flags);
            transport.send_to(&retry, peer).await?;
        }
        deadline = Instant::now() + config.timeout;
    }

    if machine.lingers() {
        let until = Instant::now() + config.linger;
        loop {
            let wait = until.saturating_duration_since(Instant::now());
            if wait.is_zero() {
                break;
            }
            if let Some((pkt, from)) = recv_segment(transport, wait).await? {
                if let Some(reply) = machine.on_segment(&pkt, from)? {
                    transport.send_to(&reply, peer).await?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Socket;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    fn quick() -> Config {
        Config {
            timeout: Duration::from_millis(50),
            tick: Duration::from_millis(10),
            handshake_retries: 2,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn invalid_config_rejected_before_io() {
        let cfg = Config {
            mss: 0,
            ..Config::default()
        };
        let peer = "127.0.0.1:9".parse().unwrap();
        let result = Connection::connect(loopback().await, peer, cfg).await;
        assert!(matches!(
            result,
            Err(ConnError::Config(ConfigError::ZeroMss))
        ));
    }

    #[tokio::test]
    async fn malformed_datagram_is_dropped_silently() {
        let s = loopback().await;
        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[0u8; 3], s.local_addr).await.unwrap();
        let got = recv_segment(&s, Duration::from_millis(200)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn silent_peer_fails_after_retries() {
        let silent = loopback().await;
        let client = loopback().await;

        let result = Connection::connect(client, silent.local_addr, quick()).await;
        assert!(
            matches!(result, Err(ConnError::ConnectionFailed { attempts: 3 })),
            "expected ConnectionFailed, got: {:?}",
            result.err()
        );

        // The SYN was sent once and retried twice, each with a fresh ISN.
        let mut seqs = Vec::new();
        while let Some((pkt, _)) = recv_segment(&silent, Duration::from_millis(20)).await.unwrap() {
            assert_eq!(pkt.header.flags, flags::SYN);
            seqs.push(pkt.header.seq);
        }
        assert_eq!(seqs.len(), 3);
        seqs.dedup();
        assert_eq!(seqs.len(), 3);
    }
}
