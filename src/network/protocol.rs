//! Protocol Messages
//!
//! Wire envelope shared by host and clients. Every frame carries exactly
//! one `Message` serialized as JSON; the payload is a closed, tagged enum
//! so the schema is explicit and independent of in-memory game types.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::game::board::TileIndex;
use crate::game::state::PlayerId;
use crate::network::error::NetError;
use crate::network::snapshot::{AuctionSnapshot, GameSnapshot};

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Closed vocabulary of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Handshake (client to host) and handshake reply (host to client).
    Connect,
    /// Session is being closed, payload carries a reason.
    Disconnect,
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Command accepted.
    Ack,
    /// Command refused.
    Nack,
    /// Full authoritative snapshot.
    GameStateSync,
    /// Seated players.
    PlayerList,
    /// Turn holder rolls.
    RollDice,
    /// Token moved.
    Move,
    /// Dice outcome.
    DiceResult,
    /// Turn passed.
    NextTurn,
    /// Accept the pending offer.
    BuyProperty,
    /// Refuse the pending offer.
    DeclinePurchase,
    /// Tile offered to the turn holder.
    PropertyOffer,
    /// Turn holder is done.
    EndTurn,
    /// Balance changed.
    MoneyUpdate,
    /// Trade proposed.
    TradeOffer,
    /// Trade answered.
    TradeResponse,
    /// Auction opened.
    AuctionStart,
    /// Bid placed.
    AuctionBid,
    /// Bidder dropped out.
    AuctionPass,
    /// Auction closed.
    AuctionEnded,
    /// Chat line.
    Chat,
    /// Host asks to start.
    StartGame,
    /// Game started.
    GameStart,
    /// Game paused.
    PauseGame,
    /// Game resumed.
    ResumeGame,
    /// Something could not be processed.
    Error,
}

/// Types whose sender expects an ACK, NACK, or timeout.
pub const ACK_REQUIRED: [MessageType; 8] = [
    MessageType::RollDice,
    MessageType::BuyProperty,
    MessageType::DeclinePurchase,
    MessageType::AuctionBid,
    MessageType::AuctionPass,
    MessageType::TradeOffer,
    MessageType::TradeResponse,
    MessageType::EndTurn,
];

impl MessageType {
    /// Whether this type is in the ack-required set.
    pub fn requires_ack(self) -> bool {
        ACK_REQUIRED.contains(&self)
    }

    /// ACK or NACK.
    pub fn is_reply(self) -> bool {
        matches!(self, MessageType::Ack | MessageType::Nack)
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Handshake carried by CONNECT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Room code; `None` for legacy peers that only send a name.
    pub room_code: Option<String>,
    /// Name shown to other players.
    pub display_name: String,
}

/// One row of PLAYER_LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    /// Player id
    pub player_id: PlayerId,
    /// Display name
    pub name: String,
    /// Whether a live session exists for this player
    pub connected: bool,
}

/// MOVE payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveUpdate {
    /// Who moved
    pub player_id: PlayerId,
    /// Start tile
    pub from: TileIndex,
    /// End tile
    pub to: TileIndex,
    /// Whether the move wrapped past GO
    pub passed_go: bool,
}

/// DICE_RESULT payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceUpdate {
    /// Who rolled
    pub player_id: PlayerId,
    /// Both dice
    pub dice: [u8; 2],
}

/// NEXT_TURN payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnUpdate {
    /// New turn holder
    pub player_id: PlayerId,
    /// Round number
    pub round: u32,
}

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MoneyReason {
    /// Passed GO.
    Salary,
    /// Bought a tile.
    Purchase {
        /// Tile bought
        tile: TileIndex,
    },
    /// Paid or collected rent.
    Rent {
        /// Tile landed on
        tile: TileIndex,
        /// Other side of the payment
        counterparty: PlayerId,
    },
    /// Paid a tax tile.
    Tax {
        /// Tax tile
        tile: TileIndex,
    },
    /// Won an auction.
    AuctionWin {
        /// Tile won
        tile: TileIndex,
    },
    /// Settled a trade.
    Trade {
        /// Tile traded
        tile: TileIndex,
    },
}

/// MONEY_UPDATE payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyUpdate {
    /// Whose balance
    pub player_id: PlayerId,
    /// New balance
    pub balance: i64,
    /// Cause
    #[serde(flatten)]
    pub reason: MoneyReason,
}

/// PROPERTY_OFFER payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferUpdate {
    /// Who may buy
    pub player_id: PlayerId,
    /// Tile on offer
    pub tile: TileIndex,
    /// Asking price
    pub price: i64,
}

/// AUCTION_ENDED payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionResult {
    /// Tile auctioned
    pub tile: TileIndex,
    /// Winner, `None` if everyone passed
    pub winner: Option<PlayerId>,
    /// Price paid
    pub price: i64,
}

/// Tile-for-cash trade: `from` hands `tile` to `to`, who pays `cash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeProposal {
    /// Proposer, owns the tile
    pub from: PlayerId,
    /// Counterparty
    pub to: PlayerId,
    /// Tile changing hands
    pub tile: TileIndex,
    /// Cash paid by `to`
    pub cash: i64,
}

/// TRADE_RESPONSE command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeAnswer {
    /// Accept or refuse
    pub accepted: bool,
}

/// TRADE_RESPONSE broadcast payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOutcome {
    /// The proposal being resolved
    pub proposal: TradeProposal,
    /// Whether it went through
    pub accepted: bool,
}

/// CHAT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// Speaker's display name
    pub from_name: String,
    /// Text
    pub text: String,
}

/// Message payload. Adjacently tagged so every variant is self-describing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// No payload.
    #[default]
    Empty,
    /// Free text (DISCONNECT reasons, ERROR details, legacy CONNECT names).
    Text(String),
    /// CONNECT handshake.
    Handshake(Handshake),
    /// GAME_STATE_SYNC snapshot.
    Snapshot(Box<GameSnapshot>),
    /// PLAYER_LIST roster.
    PlayerList(Vec<PlayerEntry>),
    /// GAME_START seating order.
    Order(Vec<PlayerId>),
    /// MOVE.
    Move(MoveUpdate),
    /// DICE_RESULT.
    Dice(DiceUpdate),
    /// NEXT_TURN.
    Turn(TurnUpdate),
    /// MONEY_UPDATE.
    Money(MoneyUpdate),
    /// PROPERTY_OFFER.
    Offer(OfferUpdate),
    /// Tile referenced by BUY_PROPERTY / DECLINE_PURCHASE.
    Tile(TileIndex),
    /// AUCTION_BID amount.
    Bid(i64),
    /// AUCTION_START / AUCTION_BID / AUCTION_PASS broadcasts.
    Auction(AuctionSnapshot),
    /// AUCTION_ENDED.
    AuctionResult(AuctionResult),
    /// TRADE_OFFER.
    Trade(TradeProposal),
    /// TRADE_RESPONSE command.
    TradeAnswer(TradeAnswer),
    /// TRADE_RESPONSE broadcast.
    TradeOutcome(TradeOutcome),
    /// CHAT.
    Chat(ChatLine),
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Current UTC time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id, fresh per construction
    pub id: Uuid,
    /// Message kind
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Originating peer
    pub sender_id: PlayerId,
    /// Recipient; absent means broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
    /// Body
    #[serde(default)]
    pub payload: Payload,
    /// UTC milliseconds at construction
    pub timestamp: i64,
    /// Set iff `target_id` is absent
    pub broadcast: bool,
    /// Id of the message being answered (ACK/NACK only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_for_message_id: Option<Uuid>,
    /// Refusal reason (NACK only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nack_reason: Option<String>,
    /// Authoritative state version this message reflects (host broadcasts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<u64>,
}

impl Message {
    /// Build a message with a fresh id and timestamp.
    /// `target == None` makes it a broadcast.
    pub fn new(kind: MessageType, sender_id: PlayerId, target_id: Option<PlayerId>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender_id,
            target_id,
            payload,
            timestamp: now_millis(),
            broadcast: target_id.is_none(),
            ack_for_message_id: None,
            nack_reason: None,
            state_version: None,
        }
    }

    /// Broadcast message.
    pub fn broadcast(kind: MessageType, sender_id: PlayerId, payload: Payload) -> Self {
        Self::new(kind, sender_id, None, payload)
    }

    /// Targeted message.
    pub fn to(kind: MessageType, sender_id: PlayerId, target: PlayerId, payload: Payload) -> Self {
        Self::new(kind, sender_id, Some(target), payload)
    }

    /// ACK for `original_id`.
    pub fn make_ack(original_id: Uuid, from: PlayerId, to: PlayerId) -> Self {
        let mut msg = Self::to(MessageType::Ack, from, to, Payload::Empty);
        msg.ack_for_message_id = Some(original_id);
        msg
    }

    /// NACK for `original_id` with a reason.
    pub fn make_nack(original_id: Uuid, from: PlayerId, to: PlayerId, reason: impl Into<String>) -> Self {
        let mut msg = Self::to(MessageType::Nack, from, to, Payload::Empty);
        msg.ack_for_message_id = Some(original_id);
        msg.nack_reason = Some(reason.into());
        msg
    }

    /// Stamp the authoritative state version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.state_version = Some(version);
        self
    }

    /// Whether this message needs an ACK/NACK.
    pub fn requires_ack(&self) -> bool {
        self.kind.requires_ack()
    }

    /// Envelope invariants: ACK/NACK carry `ack_for_message_id` and nothing
    /// else does; only NACK carries a reason; `broadcast` mirrors the
    /// absence of a target.
    pub fn is_well_formed(&self) -> bool {
        let ack_ok = match self.kind {
            MessageType::Ack => self.ack_for_message_id.is_some() && self.nack_reason.is_none(),
            MessageType::Nack => self.ack_for_message_id.is_some(),
            _ => self.ack_for_message_id.is_none() && self.nack_reason.is_none(),
        };
        ack_ok && self.broadcast == self.target_id.is_none()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, NetError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize and validate.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        Self::from_bytes(json.as_bytes())
    }

    /// Deserialize and validate from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetError> {
        let msg: Self = serde_json::from_slice(bytes)?;
        if !msg.is_well_formed() {
            return Err(NetError::protocol(format!(
                "malformed {:?} envelope {}",
                msg.kind, msg.id
            )));
        }
        Ok(msg)
    }
}
