//! Game State Definitions
//!
//! Authoritative table state owned by the host's engine.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::rng::DeterministicRng;
use crate::game::board::{TileIndex, BOARD_SIZE};
use crate::network::protocol::TradeProposal;
use crate::network::snapshot::{
    AuctionSnapshot, GameSnapshot, PhaseTag, PlayerSnapshot, SNAPSHOT_SCHEMA_VERSION,
};

/// Cash every player starts with.
pub const STARTING_BALANCE: i64 = 1500;

/// Salary for passing GO.
pub const GO_SALARY: i64 = 200;

/// Most players a table seats.
pub const MAX_PLAYERS: usize = 8;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier; the same id names the peer on the wire.
///
/// Equality and ordering are by id alone. A player embedded in a synced
/// auction and the locally held player are the same player iff their ids
/// match, regardless of which copy carries which balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// State of a single seated player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,
    /// Display name from the handshake
    pub name: String,
    /// Tile the token stands on
    pub position: TileIndex,
    /// Cash on hand (may go negative, bankruptcy is a rules concern)
    pub balance: i64,
}

impl PlayerState {
    /// Create a new player on GO.
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            position: 0,
            balance: STARTING_BALANCE,
        }
    }

    /// Advance the token, wrapping around the board.
    ///
    /// Returns the new tile and whether GO was passed.
    pub fn advance(&mut self, steps: u8) -> (TileIndex, bool) {
        let raw = self.position as u16 + steps as u16;
        let passed_go = raw >= BOARD_SIZE as u16;
        self.position = (raw % BOARD_SIZE as u16) as TileIndex;
        (self.position, passed_go)
    }
}

// =============================================================================
// PHASES, AUCTIONS, TRADES
// =============================================================================

/// Table phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// Seating players, nobody has a turn yet.
    Lobby,
    /// Turns are running.
    Playing,
    /// Host paused the game.
    Paused,
    /// Game over.
    Finished,
}

impl GamePhase {
    /// Wire tag for snapshots.
    pub fn tag(self) -> PhaseTag {
        match self {
            GamePhase::Lobby => PhaseTag::Lobby,
            GamePhase::Playing => PhaseTag::Playing,
            GamePhase::Paused => PhaseTag::Paused,
            GamePhase::Finished => PhaseTag::Finished,
        }
    }
}

/// Running auction for a declined tile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuctionState {
    /// Tile being auctioned
    pub tile: TileIndex,
    /// Players still in the auction, by id
    pub bidders: Vec<PlayerId>,
    /// Current high bid (0 before the first bid)
    pub high_bid: i64,
    /// Holder of the high bid
    pub high_bidder: Option<PlayerId>,
}

impl AuctionState {
    /// Whether `player` is still eligible to bid or pass.
    pub fn is_bidder(&self, player: &PlayerId) -> bool {
        self.bidders.contains(player)
    }

    /// The auction is decided once a single bidder holding the high bid remains,
    /// or once everyone has dropped out.
    pub fn is_decided(&self) -> bool {
        match self.bidders.as_slice() {
            [] => true,
            [only] => self.high_bidder.as_ref() == Some(only),
            _ => false,
        }
    }

    /// Wire form.
    pub fn to_snapshot(&self) -> AuctionSnapshot {
        AuctionSnapshot {
            tile: self.tile,
            bidders: self.bidders.clone(),
            high_bid: self.high_bid,
            high_bidder: self.high_bidder,
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete authoritative table state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    /// Current phase
    pub phase: GamePhase,
    /// Seated players
    pub players: BTreeMap<PlayerId, PlayerState>,
    /// Seating order; turns rotate through it
    pub turn_order: Vec<PlayerId>,
    /// Index into `turn_order` of the turn holder
    pub turn_index: usize,
    /// Round counter, 1-based once the game starts
    pub round: u32,
    /// Owned tiles
    pub ownership: BTreeMap<TileIndex, PlayerId>,
    /// Tile offered to the turn holder after landing on it
    pub pending_offer: Option<TileIndex>,
    /// Whether the turn holder has rolled this turn
    pub has_rolled: bool,
    /// Last dice rolled
    pub last_roll: Option<[u8; 2]>,
    /// Running auction
    pub auction: Option<AuctionState>,
    /// Open trade proposal
    pub trade: Option<TradeProposal>,
    /// Dice source
    pub rng: DeterministicRng,
}

impl GameState {
    /// Create an empty table in the lobby.
    pub fn new(seed: u64) -> Self {
        Self {
            phase: GamePhase::Lobby,
            players: BTreeMap::new(),
            turn_order: Vec::new(),
            turn_index: 0,
            round: 0,
            ownership: BTreeMap::new(),
            pending_offer: None,
            has_rolled: false,
            last_roll: None,
            auction: None,
            trade: None,
            rng: DeterministicRng::new(seed),
        }
    }

    /// Seat a player. Returns false if already seated.
    pub fn add_player(&mut self, id: PlayerId, name: &str) -> bool {
        if self.players.contains_key(&id) {
            return false;
        }
        self.players.insert(id, PlayerState::new(id, name));
        self.turn_order.push(id);
        true
    }

    /// Get a player.
    pub fn get_player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Get a player mutably.
    pub fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    /// Current turn holder, if the game is running.
    pub fn current_turn(&self) -> Option<PlayerId> {
        match self.phase {
            GamePhase::Playing | GamePhase::Paused => self.turn_order.get(self.turn_index).copied(),
            GamePhase::Lobby | GamePhase::Finished => None,
        }
    }

    /// Pass the turn to the next seat; the round increments on wrap.
    pub fn advance_turn(&mut self) -> Option<(PlayerId, u32)> {
        if self.turn_order.is_empty() {
            return None;
        }
        self.turn_index += 1;
        if self.turn_index >= self.turn_order.len() {
            self.turn_index = 0;
            self.round += 1;
        }
        self.has_rolled = false;
        self.pending_offer = None;
        self.last_roll = None;
        self.turn_order
            .get(self.turn_index)
            .map(|id| (*id, self.round))
    }

    /// Unsealed snapshot (version 0, empty digest); the dispatcher seals it.
    pub fn to_snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            state_version: 0,
            phase: self.phase.tag(),
            round: self.round,
            current_turn: self.current_turn(),
            turn_order: self.turn_order.clone(),
            players: self
                .turn_order
                .iter()
                .filter_map(|id| self.players.get(id))
                .map(|p| PlayerSnapshot {
                    player_id: p.id,
                    name: p.name.clone(),
                    position: p.position,
                    balance: p.balance,
                })
                .collect(),
            ownership: self.ownership.clone(),
            pending_offer: self.pending_offer,
            last_roll: self.last_roll,
            auction: self.auction.as_ref().map(AuctionState::to_snapshot),
            trade: self.trade.clone(),
            digest: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u8) -> PlayerId {
        PlayerId::from_bytes([n; 16])
    }

    #[test]
    fn test_player_id_equality_is_by_id() {
        let a = pid(1);
        let b = PlayerId::from_uuid_str(&a.to_string()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.short(), "01010101");
    }

    #[test]
    fn test_advance_wraps_and_reports_go() {
        let mut player = PlayerState::new(pid(1), "Alice");
        player.position = 37;
        let (tile, passed_go) = player.advance(5);
        assert_eq!(tile, 2);
        assert!(passed_go);

        let (tile, passed_go) = player.advance(3);
        assert_eq!(tile, 5);
        assert!(!passed_go);
    }

    #[test]
    fn test_turn_rotation_and_rounds() {
        let mut state = GameState::new(1);
        state.add_player(pid(1), "Alice");
        state.add_player(pid(2), "Bob");
        assert!(!state.add_player(pid(2), "Bob again"));

        state.phase = GamePhase::Playing;
        state.round = 1;
        assert_eq!(state.current_turn(), Some(pid(1)));

        assert_eq!(state.advance_turn(), Some((pid(2), 1)));
        assert_eq!(state.advance_turn(), Some((pid(1), 2)));
    }

    #[test]
    fn test_lobby_has_no_turn_holder() {
        let mut state = GameState::new(1);
        state.add_player(pid(1), "Alice");
        assert_eq!(state.current_turn(), None);
    }

    #[test]
    fn test_auction_decision() {
        let mut auction = AuctionState {
            tile: 1,
            bidders: vec![pid(1), pid(2)],
            high_bid: 0,
            high_bidder: None,
        };
        assert!(!auction.is_decided());

        auction.high_bid = 50;
        auction.high_bidder = Some(pid(1));
        auction.bidders.retain(|p| *p != pid(2));
        assert!(auction.is_decided());

        auction.bidders.clear();
        assert!(auction.is_decided());
    }

    #[test]
    fn test_snapshot_follows_seating_order() {
        let mut state = GameState::new(1);
        state.add_player(pid(9), "Zed");
        state.add_player(pid(1), "Amy");
        let snap = state.to_snapshot();
        assert_eq!(snap.players[0].player_id, pid(9));
        assert_eq!(snap.players[1].player_id, pid(1));
        assert_eq!(snap.schema_version, SNAPSHOT_SCHEMA_VERSION);
    }
}
