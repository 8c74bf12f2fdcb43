//! Data sink: connects to a source and reassembles its byte stream.
//!
//! Every data segment, in order or not, is answered with one cumulative ACK
//! carrying the next expected sequence number and the free reorder slots.
//! The FIN is honoured only once it sits exactly at the next expected
//! sequence number, so the stream is complete before teardown begins.

use std::net::SocketAddr;

use crate::config::Config;
use crate::connection::{await_close, is_control, recv_segment, ConnError, Connection};
use crate::packet::{flags, Packet};
use crate::receiver::{Outcome, Receiver, ReceiverStats};
use crate::socket::Transport;
use crate::state::{ConnectionState, Role, StateMachine};

/// The receiving end of a connection.
pub struct Sink<T> {
    /// Connection FSM.
    pub machine: StateMachine,
    /// Reassembly buffer and application byte queue.
    pub receiver: Receiver,
    transport: T,
    peer: SocketAddr,
    config: Config,
}

impl<T: Transport> Sink<T> {
    /// Build a [`Sink`] from a connection the sink side opened.
    pub fn from_connection(conn: Connection<T>) -> Result<Self, ConnError> {
        let (machine, transport, peer, config) = conn.into_parts();
        if machine.role() != Role::Receiver || !machine.is_established() {
            return Err(ConnError::BadState(machine.state()));
        }
        let receiver = Receiver::new(machine.rcv_nxt(), config.reorder_capacity, config.mss);
        Ok(Self {
            machine,
            receiver,
            transport,
            peer,
            config,
        })
    }

    /// Open a connection to the source at `peer`.
    pub async fn connect(transport: T, peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        let conn = Connection::connect(transport, peer, config).await?;
        Self::from_connection(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Return the next run of in-order bytes.
    ///
    /// `Ok(None)` means the source closed and every byte it sent has been
    /// returned.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, ConnError> {
        loop {
            if self.receiver.readable() > 0 {
                return Ok(Some(self.receiver.take_readable()));
            }
            match self.machine.state() {
                ConnectionState::Established => {}
                ConnectionState::FinSent => {
                    self.await_close().await?;
                    continue;
                }
                ConnectionState::Closed => return Ok(None),
                other => return Err(ConnError::BadState(other)),
            }
            if let Some((pkt, from)) = recv_segment(&self.transport, self.config.timeout).await? {
                self.on_segment(&pkt, from).await?;
            }
        }
    }

    /// Collect the whole stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ConnError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.recv().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Close from the sink side.
    ///
    /// Data the source still has in flight keeps being acknowledged until
    /// it answers the FIN; bytes that arrive meanwhile remain readable
    /// through [`Sink::recv`].
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.machine.state() {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Established => {}
            ConnectionState::FinSent => return self.await_close().await,
            other => return Err(ConnError::BadState(other)),
        }
        self.machine.sync(self.machine.snd_nxt(), self.receiver.ack_number());
        let fin = self.machine.close()?;
        log::info!("[teardown] → FIN seq={}", fin.header.seq);
        self.transport.send_to(&fin, self.peer).await?;
        self.await_close().await
    }

    async fn on_segment(&mut self, pkt: &Packet, from: SocketAddr) -> Result<(), ConnError> {
        let h = &pkt.header;
        if from != self.peer {
            log::warn!("[sink] segment from {from}, expected {}", self.peer);
            return Err(ConnError::UnexpectedPeer(from));
        }

        if is_control(pkt) || !pkt.is_data() {
            if h.has(flags::FIN) && h.seq != self.receiver.ack_number() {
                // Stream not complete yet; the source will repeat its FIN.
                log::debug!(
                    "[sink] FIN at seq={} but expecting {}; re-ACKing",
                    h.seq,
                    self.receiver.ack_number()
                );
                return self.send_ack().await;
            }
            self.machine.sync(self.machine.snd_nxt(), self.receiver.ack_number());
            if let Some(reply) = self.machine.on_segment(pkt, from)? {
                self.transport.send_to(&reply, self.peer).await?;
            }
            return Ok(());
        }

        let outcome = self.receiver.on_segment(h.seq, &pkt.payload);
        log::debug!(
            "[sink] ← DATA seq={} len={} {:?}; → ACK ack={} window={}",
            h.seq,
            pkt.payload.len(),
            outcome,
            self.receiver.ack_number(),
            self.receiver.window()
        );
        if outcome == Outcome::Overflow {
            log::warn!("[sink] reorder store full; dropped seq={}", h.seq);
        }
        self.send_ack().await
    }

    async fn send_ack(&mut self) -> Result<(), ConnError> {
        let ack = Packet::control(
            self.machine.snd_nxt(),
            self.receiver.ack_number(),
            flags::ACK,
            self.receiver.window(),
        );
        self.transport.send_to(&ack, self.peer).await?;
        Ok(())
    }

    async fn await_close(&mut self) -> Result<(), ConnError> {
        let receiver = &mut self.receiver;
        let seq = self.machine.snd_nxt();
        await_close(&self.transport, &mut self.machine, self.peer, &self.config, |pkt| {
            if !pkt.is_data() {
                return None;
            }
            receiver.on_segment(pkt.header.seq, &pkt.payload);
            Some(Packet::control(
                seq,
                receiver.ack_number(),
                flags::ACK,
                receiver.window(),
            ))
        })
        .await?;

        let stranded = self.receiver.clear_buffered();
        if stranded > 0 {
            log::warn!("[sink] discarded {stranded} out-of-order segment(s) at close");
        }
        log::info!("[sink] closed; {:?}", self.receiver.stats());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::socket::Socket;

    fn quick() -> Config {
        Config {
            timeout: Duration::from_millis(100),
            tick: Duration::from_millis(20),
            ..Config::default()
        }
    }

    /// A sink connected to a hand-driven raw source with ISN 500.
    async fn connected() -> (Sink<Socket>, Socket) {
        let source = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let sock = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let dest = source.local_addr;
        let connect = tokio::spawn(Sink::connect(sock, dest, quick()));

        let (syn, from) = source.recv_from().await.unwrap();
        assert_eq!(syn.header.flags, flags::SYN);
        let syn_ack = Packet::control(500, syn.header.seq.wrapping_add(1), flags::SYN | flags::ACK, 8);
        source.send_to(&syn_ack, from).await.unwrap();
        let (ack, _) = source.recv_from().await.unwrap();
        assert_eq!(ack.header.ack, 501);

        (connect.await.unwrap().unwrap(), source)
    }

    fn data(seq: u32, ack: u32, payload: &[u8]) -> Packet {
        Packet {
            header: crate::packet::Header {
                seq,
                ack,
                flags: flags::ACK,
                window: 8,
            },
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn out_of_order_segments_are_reassembled() {
        let (mut sink, source) = connected().await;
        let to = sink.transport().local_addr();
        let ack = sink.machine.snd_nxt();

        source.send_to(&data(503, ack, b"c"), to).await.unwrap();
        source.send_to(&data(501, ack, b"a"), to).await.unwrap();
        source.send_to(&data(502, ack, b"b"), to).await.unwrap();

        let mut got = Vec::new();
        while got.len() < 3 {
            got.extend(sink.recv().await.unwrap().unwrap());
        }
        assert_eq!(got, b"abc");

        // One ACK per data segment, the first a duplicate of the start.
        let mut acks = Vec::new();
        for _ in 0..3 {
            acks.push(source.recv_from().await.unwrap().0.header.ack);
        }
        assert_eq!(acks, vec![501, 502, 504]);
    }

    #[tokio::test]
    async fn early_fin_is_not_honoured() {
        let (mut sink, source) = connected().await;
        let to = sink.transport().local_addr();
        let ack = sink.machine.snd_nxt();

        // FIN claims the stream ends at 502 but byte 501 never arrived.
        source
            .send_to(&Packet::control(502, ack, flags::FIN, 8), to)
            .await
            .unwrap();
        source.send_to(&data(501, ack, b"z"), to).await.unwrap();

        assert_eq!(sink.recv().await.unwrap(), Some(b"z".to_vec()));
        assert_eq!(sink.state(), ConnectionState::Established);

        let (re_ack, _) = source.recv_from().await.unwrap();
        assert_eq!(re_ack.header.ack, 501);
    }

    /// A stranger's FIN is neither answered nor mistaken for the source's.
    #[tokio::test]
    async fn fin_from_stranger_aborts_without_reply() {
        let (mut sink, source) = connected().await;
        let to = sink.transport().local_addr();
        let stranger = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        stranger
            .send_to(&Packet::control(999, 0, flags::FIN, 8), to)
            .await
            .unwrap();

        let err = sink.recv().await.unwrap_err();
        assert!(matches!(err, ConnError::UnexpectedPeer(a) if a == stranger.local_addr));
        assert_eq!(sink.state(), ConnectionState::Established);

        let quiet = tokio::time::timeout(Duration::from_millis(100), source.recv_from()).await;
        assert!(quiet.is_err(), "real source must not be re-ACKed");
    }

    #[tokio::test]
    async fn peer_fin_completes_stream() {
        let (mut sink, source) = connected().await;
        let to = sink.transport().local_addr();
        let ack = sink.machine.snd_nxt();

        source.send_to(&data(501, ack, b"hi"), to).await.unwrap();
        source
            .send_to(&Packet::control(503, ack, flags::FIN, 8), to)
            .await
            .unwrap();

        let reader = tokio::spawn(async move {
            let out = sink.read_to_end().await.unwrap();
            (out, sink)
        });

        let (data_ack, _) = source.recv_from().await.unwrap();
        assert_eq!(data_ack.header.ack, 503);
        let (fin_ack, from) = source.recv_from().await.unwrap();
        assert_eq!(fin_ack.header.flags, flags::FIN | flags::ACK);
        assert_eq!(fin_ack.header.ack, 503);
        let last = Packet::control(504, fin_ack.header.seq.wrapping_add(1), flags::ACK, 8);
        source.send_to(&last, from).await.unwrap();

        let (out, sink) = reader.await.unwrap();
        assert_eq!(out, b"hi");
        assert!(sink.machine.is_closed());
        assert_eq!(sink.receiver.buffered(), 0);
    }

    #[tokio::test]
    async fn silent_source_forces_close() {
        let (mut sink, _source) = connected().await;
        sink.config.teardown_retries = 1;
        let err = sink.close().await.unwrap_err();
        assert!(matches!(err, ConnError::UngracefulClose));
        assert!(sink.machine.is_closed());
    }
}
