//! Game Events
//!
//! Events emitted by the engine for each applied command, in the order
//! they happened. The host dispatcher turns each one into a broadcast.

use serde::{Serialize, Deserialize};

use crate::game::board::TileIndex;
use crate::game::state::PlayerId;
use crate::network::protocol::{MoneyReason, TradeProposal};
use crate::network::snapshot::AuctionSnapshot;

/// Something that changed in the authoritative state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Seating order fixed, round 1 begins
    GameStarted {
        turn_order: Vec<PlayerId>,
    },

    /// A new turn began; the dispatcher follows this with a full sync
    TurnStarted {
        player_id: PlayerId,
        round: u32,
    },

    /// Dice were rolled
    DiceRolled {
        player_id: PlayerId,
        dice: [u8; 2],
    },

    /// Token moved
    PlayerMoved {
        player_id: PlayerId,
        from: TileIndex,
        to: TileIndex,
        passed_go: bool,
    },

    /// Unowned tile offered to the player who landed on it
    PropertyOffered {
        player_id: PlayerId,
        tile: TileIndex,
        price: i64,
    },

    /// Balance changed
    MoneyChanged {
        player_id: PlayerId,
        balance: i64,
        reason: MoneyReason,
    },

    /// Declined tile goes to auction
    AuctionStarted {
        auction: AuctionSnapshot,
    },

    /// New high bid
    BidPlaced {
        player_id: PlayerId,
        auction: AuctionSnapshot,
    },

    /// Bidder dropped out
    BidderPassed {
        player_id: PlayerId,
        auction: AuctionSnapshot,
    },

    /// Auction closed
    AuctionEnded {
        tile: TileIndex,
        winner: Option<PlayerId>,
        price: i64,
    },

    /// Trade proposed
    TradeOffered {
        proposal: TradeProposal,
    },

    /// Trade answered
    TradeResolved {
        proposal: TradeProposal,
        accepted: bool,
    },

    /// Host paused
    GamePaused,

    /// Host resumed
    GameResumed,
}

impl DomainEvent {
    /// Turn boundaries trigger a full-state sync.
    pub fn is_turn_start(&self) -> bool {
        matches!(self, DomainEvent::TurnStarted { .. })
    }

    /// Player the event is mainly about.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            DomainEvent::TurnStarted { player_id, .. }
            | DomainEvent::DiceRolled { player_id, .. }
            | DomainEvent::PlayerMoved { player_id, .. }
            | DomainEvent::PropertyOffered { player_id, .. }
            | DomainEvent::MoneyChanged { player_id, .. }
            | DomainEvent::BidPlaced { player_id, .. }
            | DomainEvent::BidderPassed { player_id, .. } => Some(*player_id),
            DomainEvent::AuctionEnded { winner, .. } => *winner,
            DomainEvent::TradeOffered { proposal } | DomainEvent::TradeResolved { proposal, .. } => {
                Some(proposal.from)
            }
            DomainEvent::GameStarted { .. }
            | DomainEvent::AuctionStarted { .. }
            | DomainEvent::GamePaused
            | DomainEvent::GameResumed => None,
        }
    }
}
