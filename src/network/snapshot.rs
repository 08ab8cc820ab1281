//! Full-State Snapshots
//!
//! Versioned wire schema for GAME_STATE_SYNC, deliberately decoupled from
//! the engine's in-memory `GameState`. A snapshot is sealed by the host
//! with the authoritative state version and a digest over its canonical
//! JSON; clients verify both before replacing their replica.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::hash::snapshot_digest;
use crate::game::board::TileIndex;
use crate::game::state::PlayerId;
use crate::network::error::NetError;
use crate::network::protocol::TradeProposal;

/// Schema revision understood by this build.
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 1;

/// Phase as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTag {
    /// Waiting for players
    Lobby,
    /// Turns running
    Playing,
    /// Paused by host
    Paused,
    /// Game over
    Finished,
}

/// One player in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Player id
    pub player_id: PlayerId,
    /// Display name
    pub name: String,
    /// Token position
    pub position: TileIndex,
    /// Cash
    pub balance: i64,
}

/// Auction in progress. Bidders are ids, never player copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    /// Tile for sale
    pub tile: TileIndex,
    /// Remaining bidders
    pub bidders: Vec<PlayerId>,
    /// Current high bid
    pub high_bid: i64,
    /// Holder of the high bid
    pub high_bidder: Option<PlayerId>,
}

/// Complete authoritative table state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Schema revision
    pub schema_version: u16,
    /// Authoritative state version at the time of the snapshot
    pub state_version: u64,
    /// Phase
    pub phase: PhaseTag,
    /// Round counter
    pub round: u32,
    /// Turn holder
    pub current_turn: Option<PlayerId>,
    /// Seating order
    pub turn_order: Vec<PlayerId>,
    /// Players in seating order
    pub players: Vec<PlayerSnapshot>,
    /// Tile owners
    pub ownership: BTreeMap<TileIndex, PlayerId>,
    /// Tile on offer to the turn holder
    pub pending_offer: Option<TileIndex>,
    /// Last roll this turn
    pub last_roll: Option<[u8; 2]>,
    /// Running auction
    pub auction: Option<AuctionSnapshot>,
    /// Open trade
    pub trade: Option<TradeProposal>,
    /// Hex SHA-256 over the canonical content; empty until sealed
    pub digest: String,
}

impl GameSnapshot {
    /// Canonical bytes: the JSON encoding with the digest cleared.
    fn canonical_bytes(&self) -> Result<Vec<u8>, NetError> {
        let mut unsealed = self.clone();
        unsealed.digest.clear();
        Ok(serde_json::to_vec(&unsealed)?)
    }

    /// Stamp `state_version` and compute the digest.
    pub fn seal(mut self, state_version: u64) -> Result<Self, NetError> {
        self.state_version = state_version;
        self.digest.clear();
        let canonical = self.canonical_bytes()?;
        self.digest = snapshot_digest(state_version, &canonical);
        Ok(self)
    }

    /// Check schema revision and digest.
    pub fn verify(&self) -> Result<(), NetError> {
        if self.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(NetError::protocol(format!(
                "unsupported snapshot schema {} (expected {})",
                self.schema_version, SNAPSHOT_SCHEMA_VERSION
            )));
        }
        let canonical = self.canonical_bytes()?;
        let expected = snapshot_digest(self.state_version, &canonical);
        if expected != self.digest {
            return Err(NetError::Serialization(serde::de::Error::custom(format!(
                "snapshot digest mismatch at version {}",
                self.state_version
            ))));
        }
        Ok(())
    }

    /// Find a player by id.
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.player_id == *id)
    }

    /// Find a player by id, mutably.
    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerSnapshot> {
        self.players.iter_mut().find(|p| p.player_id == *id)
    }

    /// Empty lobby snapshot at version 0; the starting point of a client replica.
    pub fn empty() -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            state_version: 0,
            phase: PhaseTag::Lobby,
            round: 0,
            current_turn: None,
            turn_order: Vec::new(),
            players: Vec::new(),
            ownership: BTreeMap::new(),
            pending_offer: None,
            last_roll: None,
            auction: None,
            trade: None,
            digest: String::new(),
        }
    }
}
