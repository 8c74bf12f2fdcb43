//! `rudp` — a reliable, ordered, flow- and congestion-controlled byte stream
//! carried over UDP datagrams.
//!
//! # Architecture
//!
//! ```text
//!   data source (passive open)                 data sink (active open)
//!  ┌──────────────────────────┐   DATA      ┌──────────────────────────┐
//!  │ Source                   │────────────▶│ Sink                     │
//!  │  ├── Sender              │             │  ├── Receiver            │
//!  │  │    └── Congestion     │◀────────────│  │    (reorder store)    │
//!  │  └── StateMachine        │    ACKs     │  └── StateMachine        │
//!  └────────────┬─────────────┘             └────────────┬─────────────┘
//!               │ Transport                              │ Transport
//!  ┌────────────▼─────────────┐             ┌────────────▼─────────────┐
//!  │ Socket or Simulator      │             │ Socket or Simulator      │
//!  └──────────────────────────┘             └──────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (serialise / deserialise)
//! - [`state`]       — handshake and teardown finite-state machine
//! - [`congestion`]  — congestion window, slow start, timeout backoff
//! - [`sender`]      — outbound queue, unacked set, per-segment timers
//! - [`receiver`]    — out-of-order reassembly and cumulative ACKs
//! - [`timer`]       — retransmit expiry and retry budgets
//! - [`config`]      — tunable parameters and validation
//! - [`connection`]  — handshake I/O and the error taxonomy
//! - [`source`]      — data-source event loop
//! - [`sink`]        — data-sink event loop
//! - [`simulator`]   — lossy/reordering network layer for testing
//! - [`socket`]      — async UDP socket abstraction
//! - [`directory`]   — peer-name lookup and local address lease

pub mod config;
pub mod congestion;
pub mod connection;
pub mod directory;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod sink;
pub mod socket;
pub mod source;
pub mod state;
pub mod timer;

pub use config::Config;
pub use connection::{ConnError, Connection};
pub use sink::Sink;
pub use socket::{Socket, Transport};
pub use source::Source;
