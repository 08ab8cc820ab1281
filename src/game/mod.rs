//! Game Logic Module
//!
//! Reference rules behind the `DomainEngine` seam. The sync layer never
//! looks inside; it only issues commands and relays the resulting events.
//!
//! ## Module Structure
//!
//! - `board`: Tile ring, prices, rent
//! - `state`: Players, turns, auctions, trades
//! - `events`: Events emitted per applied command
//! - `engine`: Commands, rejections, the engine trait and `TableEngine`

pub mod board;
pub mod state;
pub mod events;
pub mod engine;

// Re-export key types
pub use board::{TileIndex, BOARD_SIZE};
pub use state::{GamePhase, GameState, PlayerId, PlayerState};
pub use events::DomainEvent;
pub use engine::{Command, Departure, DomainEngine, Rejection, RejectionKind, TableEngine};
