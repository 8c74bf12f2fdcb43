//! Data source: pushes a byte stream to one connected sink.
//!
//! ```text
//!  Application
//!      │  send(data) / flush() / close()
//!      ▼
//!  Source ── one pump step ──────────────────────────────────────────┐
//!    │  1. admit queued chunks while the windows allow, send each     │
//!    │  2. wait up to `tick` for one inbound segment                  │
//!    │       ACK       → Sender::on_ack                               │
//!    │       SYN / FIN → StateMachine::on_segment                     │
//!    │  3. resend the oldest segment whose timer expired              │
//!    │  4. answer a deferred FIN once the unacked set is empty        │
//!    └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Acknowledgements are processed as soon as they arrive, so a sustained
//! flood of new data never starves the ACK path.

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::config::Config;
use crate::connection::{await_close, is_control, recv_segment, ConnError, Connection};
use crate::packet::Packet;
use crate::sender::{Sender, SenderStats};
use crate::socket::Transport;
use crate::state::{ConnectionState, Role, StateMachine};

/// The sending end of a connection.
pub struct Source<T> {
    /// Connection FSM.
    pub machine: StateMachine,
    /// Outbound window, queue and timers.
    pub sender: Sender,
    transport: T,
    peer: SocketAddr,
    config: Config,
}

impl<T: Transport> Source<T> {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Build a [`Source`] from a connection the source side accepted.
    pub fn from_connection(conn: Connection<T>) -> Result<Self, ConnError> {
        let (machine, transport, peer, config) = conn.into_parts();
        if machine.role() != Role::Sender || !machine.is_established() {
            return Err(ConnError::BadState(machine.state()));
        }
        let sender = Sender::new(machine.snd_nxt(), machine.peer_window(), &config);
        Ok(Self {
            machine,
            sender,
            transport,
            peer,
            config,
        })
    }

    /// Wait for a sink to connect, then return a ready source.
    pub async fn accept(transport: T, config: Config) -> Result<Self, ConnError> {
        let conn = Connection::accept(transport, config).await?;
        Self::from_connection(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> SenderStats {
        self.sender.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Queue `data` and pump until every byte of it has been transmitted at
    /// least once.
    ///
    /// Returns [`ConnError::PeerClosed`] if the sink closes first; in that
    /// case whatever was already in flight is still delivered and the
    /// closing handshake is completed before returning.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ConnError> {
        if !self.machine.is_established() {
            return Err(ConnError::BadState(self.machine.state()));
        }
        self.sender.enqueue(data);
        while self.sender.has_queued() {
            if self.machine.fin_deferred() || !self.machine.is_established() {
                return self.finish_passive_close().await;
            }
            self.step().await?;
        }
        Ok(())
    }

    /// Pump until every transmitted segment has been acknowledged.
    pub async fn flush(&mut self) -> Result<(), ConnError> {
        while !self.sender.is_idle() && self.machine.is_established() {
            if self.machine.fin_deferred() && !self.sender.has_unacked() {
                break;
            }
            self.step().await?;
        }
        Ok(())
    }

    /// Deliver everything queued, then run the closing handshake.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.machine.state() {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Established => {}
            ConnectionState::FinSent => return self.await_close().await,
            other => return Err(ConnError::BadState(other)),
        }

        self.flush().await?;
        if self.machine.fin_deferred() || !self.machine.is_established() {
            // The sink closed first; finish its handshake instead.
            return match self.finish_passive_close().await {
                Err(ConnError::PeerClosed { undelivered: 0 }) => Ok(()),
                other => other,
            };
        }

        self.machine.sync(self.sender.next_seq, self.machine.rcv_nxt());
        let fin = self.machine.close()?;
        log::info!("[teardown] → FIN seq={}", fin.header.seq);
        self.transport.send_to(&fin, self.peer).await?;
        self.await_close().await
    }

    /// Convenience: send `data`, then close.
    pub async fn send_all(&mut self, data: &[u8]) -> Result<(), ConnError> {
        self.send(data).await?;
        self.close().await
    }

    // -----------------------------------------------------------------------
    // Pump
    // -----------------------------------------------------------------------

    /// One iteration of the event loop.
    async fn step(&mut self) -> Result<(), ConnError> {
        // 1. Admission.  No new data once the peer has asked to close.
        if !self.machine.fin_deferred() {
            let ack = self.machine.rcv_nxt();
            let window = self.config.reorder_capacity;
            while let Some(pkt) = self.sender.poll_transmit(ack, window, Instant::now().into_std()) {
                self.transport.send_to(&pkt, self.peer).await?;
                log::debug!(
                    "[source] → DATA seq={} len={} in_flight={} cwnd={}",
                    pkt.header.seq,
                    pkt.payload.len(),
                    self.sender.in_flight(),
                    self.sender.congestion.cwnd
                );
            }
        }

        // 2. Bounded receive.
        if let Some((pkt, from)) = recv_segment(&self.transport, self.config.tick).await? {
            self.on_segment(&pkt, from).await?;
        }

        // 3. Timers.
        let resend = self
            .sender
            .poll_timeouts(Instant::now().into_std())
            .map_err(|e| ConnError::RetriesExhausted { seq: e.seq })?;
        if let Some(pkt) = resend {
            log::debug!(
                "[source] timeout: resending seq={}; window_size={} ssthresh={}",
                pkt.header.seq,
                self.sender.congestion.window_size,
                self.sender.congestion.slow_start_threshold
            );
            self.transport.send_to(&pkt, self.peer).await?;
        }

        // 4. Deferred FIN.
        self.machine.set_data_pending(self.sender.has_unacked());
        self.machine.sync(self.sender.next_seq, self.machine.rcv_nxt());
        if let Some(fin_ack) = self.machine.poll_deferred_fin() {
            log::info!("[teardown] unacked set drained; → FIN+ACK");
            self.transport.send_to(&fin_ack, self.peer).await?;
        }
        Ok(())
    }

    async fn on_segment(&mut self, pkt: &Packet, from: SocketAddr) -> Result<(), ConnError> {
        if is_control(pkt) {
            self.machine.set_data_pending(self.sender.has_unacked());
            self.machine.sync(self.sender.next_seq, self.machine.rcv_nxt());
            if let Some(reply) = self.machine.on_segment(pkt, from)? {
                self.transport.send_to(&reply, self.peer).await?;
            }
            return Ok(());
        }

        if from != self.peer {
            log::warn!("[source] ACK from {from}, expected {}", self.peer);
            return Err(ConnError::PeerMismatch(from));
        }

        let h = &pkt.header;
        let acked = self.sender.on_ack(h.ack, h.window);
        if acked > 0 {
            log::debug!(
                "[source] ← ACK ack={} (slid {acked} seg) window={}",
                h.ack,
                h.window
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// The sink closed while data was still queued: drain what is in
    /// flight, answer its FIN and report what was never sent.
    async fn finish_passive_close(&mut self) -> Result<(), ConnError> {
        while self.machine.is_established() {
            self.step().await?;
        }
        self.await_close().await?;
        let undelivered = self.sender.queued_bytes();
        log::warn!("[source] peer closed with {undelivered} bytes unsent");
        Err(ConnError::PeerClosed { undelivered })
    }

    async fn await_close(&mut self) -> Result<(), ConnError> {
        let sender = &mut self.sender;
        await_close(&self.transport, &mut self.machine, self.peer, &self.config, |pkt| {
            sender.on_ack(pkt.header.ack, pkt.header.window);
            None
        })
        .await?;
        log::info!("[source] closed; {:?}", self.sender.stats());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::packet::flags;
    use crate::socket::Socket;

    fn quick() -> Config {
        Config {
            timeout: Duration::from_millis(100),
            tick: Duration::from_millis(20),
            seed: Some(1),
            ..Config::default()
        }
    }

    /// Complete a handshake by hand against a raw socket and return both
    /// sides.
    async fn accepted() -> (Source<Socket>, Socket) {
        let src_sock = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let src_addr = src_sock.local_addr;
        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let accept = tokio::spawn(Source::accept(src_sock, quick()));
        peer.send_to(&Packet::control(100, 0, flags::SYN, 8), src_addr)
            .await
            .unwrap();
        let (syn_ack, _) = peer.recv_from().await.unwrap();
        assert_eq!(syn_ack.header.ack, 101);
        let ack = Packet::control(101, syn_ack.header.seq.wrapping_add(1), flags::ACK, 8);
        peer.send_to(&ack, src_addr).await.unwrap();

        let source = accept.await.unwrap().unwrap();
        (source, peer)
    }

    #[tokio::test]
    async fn from_connection_rejects_the_sink_role() {
        let sock = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let listener = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let dest = listener.local_addr;
        let src = tokio::spawn(Source::accept(listener, quick()));
        let conn = Connection::connect(sock, dest, quick()).await.unwrap();
        assert!(matches!(Source::from_connection(conn), Err(ConnError::BadState(_))));
        src.abort();
    }

    #[tokio::test]
    async fn first_data_segment_follows_isn() {
        let (mut source, peer) = accepted().await;
        let isn = source.machine.isn();

        let send = tokio::spawn(async move {
            source.send(b"xyz").await.unwrap();
            source
        });
        let (data, _) = peer.recv_from().await.unwrap();
        assert_eq!(data.header.seq, isn.wrapping_add(1));
        assert_eq!(data.payload, b"xyz");
        assert_eq!(data.header.ack, 101);
        send.await.unwrap();
    }

    #[tokio::test]
    async fn ack_from_stranger_aborts() {
        let (mut source, _peer) = accepted().await;
        let stranger = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let dest = source.transport().local_addr();
        stranger
            .send_to(&Packet::control(0, 0, flags::ACK, 8), dest)
            .await
            .unwrap();

        let err = source.send(&[7u8; 10]).await.unwrap_err();
        assert!(matches!(err, ConnError::PeerMismatch(a) if a == stranger.local_addr));
    }

    #[tokio::test]
    async fn syn_from_stranger_after_handshake_aborts() {
        let (mut source, _peer) = accepted().await;
        let stranger = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let dest = source.transport().local_addr();
        stranger
            .send_to(&Packet::control(9, 0, flags::SYN, 8), dest)
            .await
            .unwrap();

        let err = source.send(&[7u8; 10]).await.unwrap_err();
        assert!(matches!(err, ConnError::UnexpectedPeer(a) if a == stranger.local_addr));
        assert_eq!(source.state(), ConnectionState::Established);
    }

    #[tokio::test]
    async fn exhausted_segment_aborts_transfer() {
        let (mut source, _peer) = accepted().await;
        source.sender = Sender::new(
            source.machine.snd_nxt(),
            8,
            &Config {
                max_retransmissions: Some(1),
                ..quick()
            },
        );
        let err = tokio::time::timeout(Duration::from_secs(5), async {
            source.send(b"never acked").await?;
            source.flush().await
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, ConnError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn send_after_close_is_bad_state() {
        let (mut source, _peer) = accepted().await;
        source.machine.force_close();
        assert!(matches!(
            source.send(b"late").await,
            Err(ConnError::BadState(ConnectionState::Closed))
        ));
    }
}
