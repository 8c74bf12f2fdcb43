//! Connection finite-state machine (FSM).
//!
//! [`StateMachine`] owns the handshake and teardown for one endpoint.  It is
//! pure: it consumes control segments and returns the segment to send in
//! reply, and never touches a socket.  Data segments and the ACKs that
//! acknowledge them belong to [`crate::sender`] and [`crate::receiver`].
//!
//! ```text
//!  data sink (active open)            data source (passive open)
//!
//!  Idle ──send SYN──▶ SynSent          Idle ──SYN / send SYN+ACK──▶ SynReceived
//!                        │                                              │
//!        SYN+ACK / send ACK                                          ACK
//!                        ▼                                              ▼
//!                   Established                                    Established
//!
//!  either side:
//!  Established ──close / send FIN──────▶ FinSent ──FIN+ACK / send ACK──▶ Closed
//!  Established ──FIN / send FIN+ACK────▶ FinSent ──ACK─────────────────▶ Closed
//!
//!  simultaneous close (FINs cross):
//!  FinSent ──FIN / send FIN+ACK──▶ FinSent ──FIN+ACK / send ACK──▶ Closed
//! ```
//!
//! A FIN that arrives while data is still unacknowledged is held back and
//! answered once the sender reports it has drained
//! ([`StateMachine::set_data_pending`]).

use std::net::SocketAddr;

use crate::connection::ConnError;
use crate::packet::{flags, Packet};

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No handshake segment sent or received yet.
    #[default]
    Idle,
    /// SYN sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received and SYN+ACK sent; waiting for ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN or FIN+ACK sent; waiting for the closing handshake to complete.
    FinSent,
    /// Teardown complete (or forced).
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which end of the byte stream this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Data source; opens passively.
    Sender,
    /// Data sink; opens actively.
    Receiver,
}

/// Handshake and teardown state for one endpoint.
#[derive(Debug, Clone)]
pub struct StateMachine {
    role: Role,
    state: ConnectionState,
    peer: Option<SocketAddr>,
    /// Our initial sequence number.
    isn: u32,
    /// Peer's initial sequence number, once known.
    peer_isn: u32,
    /// Next sequence number we will use.
    snd_nxt: u32,
    /// Next sequence number we expect from the peer.
    rcv_nxt: u32,
    local_window: u16,
    peer_window: u16,
    /// We sent the first FIN.
    fin_initiator: bool,
    /// Peer sent FIN while we still had unacknowledged data.
    fin_deferred: bool,
    /// We sent the last segment of the closing handshake.
    final_acked: bool,
    /// Our FIN crossed the peer's FIN.
    was_simultaneous: bool,
    data_pending: bool,
}

impl StateMachine {
    pub fn new(role: Role, isn: u32, local_window: u16) -> Self {
        Self {
            role,
            state: ConnectionState::Idle,
            peer: None,
            isn,
            peer_isn: 0,
            snd_nxt: isn,
            rcv_nxt: 0,
            local_window,
            peer_window: 1,
            fin_initiator: false,
            fin_deferred: false,
            final_acked: false,
            was_simultaneous: false,
            data_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn isn(&self) -> u32 {
        self.isn
    }

    /// First data sequence number we send, valid once established.
    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    /// First data sequence number we expect, valid once established.
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    /// Window the peer advertised during the handshake.
    pub fn peer_window(&self) -> u16 {
        self.peer_window
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// `true` when this endpoint sent the final ACK of the closing
    /// handshake and should keep answering repeated FIN+ACKs for a while.
    pub fn lingers(&self) -> bool {
        self.final_acked
    }

    /// `true` when a peer FIN is waiting for the unacked set to drain.
    pub fn fin_deferred(&self) -> bool {
        self.fin_deferred
    }

    /// Record data-path progress so teardown segments carry current
    /// sequence numbers.
    pub fn sync(&mut self, snd_nxt: u32, rcv_nxt: u32) {
        self.snd_nxt = snd_nxt;
        self.rcv_nxt = rcv_nxt;
    }

    /// Tell the FSM whether unacknowledged data is outstanding.
    pub fn set_data_pending(&mut self, pending: bool) {
        self.data_pending = pending;
    }

    /// Active open: `Idle → SynSent`.  Only the data sink opens actively.
    pub fn open(&mut self, peer: SocketAddr) -> Result<Packet, ConnError> {
        if self.role != Role::Receiver || self.state != ConnectionState::Idle {
            return Err(ConnError::BadState(self.state));
        }
        self.peer = Some(peer);
        self.state = ConnectionState::SynSent;
        Ok(self.syn())
    }

    /// Handshake retry.  In `SynSent` the SYN is rebuilt around `fresh_isn`;
    /// in `SynReceived` the first SYN+ACK is repeated, because the peer
    /// may already have moved on with the old sequence number.
    pub fn retry_handshake(&mut self, fresh_isn: u32) -> Option<Packet> {
        match self.state {
            ConnectionState::SynSent => {
                self.isn = fresh_isn;
                self.snd_nxt = fresh_isn;
                Some(self.syn())
            }
            ConnectionState::SynReceived => Some(self.syn_ack()),
            _ => None,
        }
    }

    /// Local close: `Established → FinSent`.
    pub fn close(&mut self) -> Result<Packet, ConnError> {
        if self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }
        self.fin_initiator = true;
        self.state = ConnectionState::FinSent;
        Ok(self.fin())
    }

    /// The control segment to repeat when a teardown timer fires.
    pub fn retry_teardown(&self) -> Option<Packet> {
        match (self.state, self.fin_initiator) {
            (ConnectionState::FinSent, true) => Some(self.fin()),
            (ConnectionState::FinSent, false) => Some(self.fin_ack()),
            _ => None,
        }
    }

    /// Give up on the closing handshake.
    pub fn force_close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Answer a deferred peer FIN once no data is pending.
    pub fn poll_deferred_fin(&mut self) -> Option<Packet> {
        if !self.fin_deferred || self.data_pending || !self.is_established() {
            return None;
        }
        self.fin_deferred = false;
        self.state = ConnectionState::FinSent;
        Some(self.fin_ack())
    }

    /// Feed one inbound segment to the FSM.
    ///
    /// Returns the segment to send in reply, if any.  Segments the FSM has
    /// no interest in (data, data ACKs, stale handshake repeats) yield
    /// `Ok(None)` and leave the state unchanged.
    pub fn on_segment(
        &mut self,
        pkt: &Packet,
        from: SocketAddr,
    ) -> Result<Option<Packet>, ConnError> {
        match self.state {
            ConnectionState::Idle => Ok(self.on_idle(pkt, from)),
            ConnectionState::SynSent | ConnectionState::SynReceived => {
                if self.peer != Some(from) {
                    log::debug!("[handshake] ignoring segment from {from} while {}", self.state);
                    return Ok(None);
                }
                Ok(self.on_handshake(pkt))
            }
            ConnectionState::Established | ConnectionState::FinSent => {
                if self.peer != Some(from) {
                    return Err(ConnError::UnexpectedPeer(from));
                }
                Ok(self.on_open(pkt))
            }
            ConnectionState::Closed => {
                // Lingering: repeat the final ACK for a repeated FIN+ACK.
                let repeat = self.peer == Some(from)
                    && self.final_acked
                    && pkt.header.has(flags::FIN | flags::ACK);
                Ok(repeat.then(|| self.final_ack(pkt.header.seq)))
            }
        }
    }

    fn on_idle(&mut self, pkt: &Packet, from: SocketAddr) -> Option<Packet> {
        let h = &pkt.header;
        if self.role != Role::Sender || !h.has(flags::SYN) || h.has(flags::ACK) {
            return None;
        }
        self.peer = Some(from);
        self.learn_peer(h.seq, h.window);
        self.state = ConnectionState::SynReceived;
        log::info!("[handshake] SYN from {from}; Idle → SynReceived");
        Some(self.syn_ack())
    }

    fn on_handshake(&mut self, pkt: &Packet) -> Option<Packet> {
        let h = &pkt.header;
        match (self.state, h.flags) {
            (ConnectionState::SynSent, f) if f == flags::SYN | flags::ACK => {
                if h.ack != self.isn.wrapping_add(1) {
                    log::debug!("[handshake] SYN+ACK acks {} but ISN is {}", h.ack, self.isn);
                    return None;
                }
                self.learn_peer(h.seq, h.window);
                self.snd_nxt = self.isn.wrapping_add(1);
                self.state = ConnectionState::Established;
                log::info!("[handshake] SYN+ACK received; SynSent → Established");
                Some(self.handshake_ack())
            }
            (ConnectionState::SynReceived, flags::SYN) => {
                // The peer retried with a fresh ISN.
                self.learn_peer(h.seq, h.window);
                Some(self.syn_ack())
            }
            (ConnectionState::SynReceived, flags::ACK) => {
                if h.ack != self.isn.wrapping_add(1) {
                    return None;
                }
                self.snd_nxt = self.isn.wrapping_add(1);
                self.rcv_nxt = h.seq;
                self.peer_window = h.window.max(1);
                self.state = ConnectionState::Established;
                log::info!("[handshake] ACK received; SynReceived → Established");
                None
            }
            _ => None,
        }
    }

    fn on_open(&mut self, pkt: &Packet) -> Option<Packet> {
        let h = &pkt.header;
        let syn_ack = flags::SYN | flags::ACK;
        let fin_ack = flags::FIN | flags::ACK;

        match (self.state, h.flags) {
            // Our handshake ACK was lost and the SYN+ACK repeated.
            (ConnectionState::Established, f)
                if f == syn_ack && self.role == Role::Receiver && h.seq == self.peer_isn =>
            {
                Some(self.handshake_ack())
            }
            (ConnectionState::Established, flags::FIN) => {
                if self.data_pending {
                    log::debug!("[teardown] FIN deferred until unacked data drains");
                    self.fin_deferred = true;
                    return None;
                }
                self.state = ConnectionState::FinSent;
                log::info!("[teardown] FIN received; Established → FinSent");
                Some(self.fin_ack())
            }
            (ConnectionState::FinSent, f) if f == fin_ack && self.fin_initiator => {
                if h.ack != self.snd_nxt {
                    return None;
                }
                self.state = ConnectionState::Closed;
                self.final_acked = true;
                log::info!("[teardown] FIN+ACK received; FinSent → Closed");
                Some(self.final_ack(h.seq))
            }
            (ConnectionState::FinSent, f) if f == fin_ack && self.was_simultaneous => {
                // Both sides closed at once and the peer answered our FIN.
                self.state = ConnectionState::Closed;
                self.final_acked = true;
                log::info!("[teardown] simultaneous close; FinSent → Closed");
                Some(self.final_ack(h.seq))
            }
            (ConnectionState::FinSent, flags::FIN) => {
                // Repeated FIN, or both sides closing at once.
                if self.fin_initiator {
                    self.fin_initiator = false;
                    self.was_simultaneous = true;
                }
                Some(self.fin_ack())
            }
            (ConnectionState::FinSent, flags::ACK)
                if !self.fin_initiator && h.ack == self.snd_nxt.wrapping_add(1) =>
            {
                self.state = ConnectionState::Closed;
                log::info!("[teardown] final ACK received; FinSent → Closed");
                None
            }
            _ => None,
        }
    }

    fn learn_peer(&mut self, peer_isn: u32, window: u16) {
        self.peer_isn = peer_isn;
        self.rcv_nxt = peer_isn.wrapping_add(1);
        self.peer_window = window.max(1);
    }

    fn syn(&self) -> Packet {
        Packet::control(self.isn, 0, flags::SYN, self.local_window)
    }

    fn syn_ack(&self) -> Packet {
        Packet::control(self.isn, self.rcv_nxt, flags::SYN | flags::ACK, self.local_window)
    }

    fn handshake_ack(&self) -> Packet {
        Packet::control(self.snd_nxt, self.rcv_nxt, flags::ACK, self.local_window)
    }

    fn fin(&self) -> Packet {
        Packet::control(self.snd_nxt, self.rcv_nxt, flags::FIN, self.local_window)
    }

    fn fin_ack(&self) -> Packet {
        Packet::control(
            self.snd_nxt,
            self.rcv_nxt,
            flags::FIN | flags::ACK,
            self.local_window,
        )
    }

    fn final_ack(&self, peer_fin_seq: u32) -> Packet {
        Packet::control(
            self.snd_nxt.wrapping_add(1),
            peer_fin_seq.wrapping_add(1),
            flags::ACK,
            self.local_window,
        )
    }
}
