//! # Boardlink
//!
//! Host-authoritative multiplayer sync layer for turn-based board games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BOARDLINK                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Xorshift128+ dice and shuffles     │
//! │  └── hash.rs     - Snapshot digests                          │
//! │                                                              │
//! │  game/           - Reference domain engine                   │
//! │  ├── board.rs    - Tile ring, prices, rent                   │
//! │  ├── state.rs    - Players, turns, auctions, trades          │
//! │  ├── events.rs   - Events emitted per command                │
//! │  └── engine.rs   - Commands and the DomainEngine seam        │
//! │                                                              │
//! │  network/        - Transport (non-deterministic)             │
//! │  ├── protocol.rs - Message envelope and payloads             │
//! │  ├── snapshot.rs - Versioned full-state schema               │
//! │  ├── framing.rs  - Length-prefixed JSON frames               │
//! │  ├── reliability.rs - ACK/NACK, timeouts, retries            │
//! │  ├── session.rs  - Connected peers                           │
//! │  └── transport.rs- Host accept loop and client link          │
//! │                                                              │
//! │  dispatch/       - Authority                                 │
//! │  ├── authority.rs- Who may issue what                        │
//! │  ├── host.rs     - Single-writer command actor               │
//! │  ├── replica.rs  - Version-gated client state                │
//! │  └── client.rs   - Client command and replica driver         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! Client command → Transport → Host Dispatcher → DomainEngine → events →
//! broadcasts (stamped with the state version) → every client replica.
//! A turn boundary also broadcasts a sealed full-state snapshot, which
//! replaces each replica wholesale.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod dispatch;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::NetConfig;
pub use crate::core::rng::DeterministicRng;
pub use dispatch::{ClientDispatcher, ClientReplica, HostDispatcher, ReplicaEvent};
pub use game::{Command, DomainEngine, PlayerId, TableEngine};
pub use network::{Message, MessageType, NetError, TransportEvent, TransportManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 5555;
