//! Domain Engine
//!
//! The narrow seam between the sync layer and game rules. The host
//! dispatcher decodes inbound messages into `Command`s, checks who may
//! issue them, and hands them to a `DomainEngine`, which either rejects
//! the command or returns the events it caused.
//!
//! `TableEngine` is a small reference rules set: enough board game to
//! exercise turns, purchases, rent, auctions, and trades end to end.
//!
//! A player who leaves mid-game forfeits: their tiles return to the bank,
//! they drop out of any auction or trade, and if they held the turn it
//! passes to the next seat. With fewer than two players left the game ends.

use crate::core::rng::{derive_game_seed, DeterministicRng};
use crate::game::board::{tile, TileIndex, TileKind};
use crate::game::events::DomainEvent;
use crate::game::state::{AuctionState, GamePhase, GameState, PlayerId, GO_SALARY, MAX_PLAYERS};
use crate::network::error::NetError;
use crate::network::protocol::{
    Message, MessageType, MoneyReason, Payload, PlayerEntry, TradeAnswer, TradeProposal,
};
use crate::network::snapshot::GameSnapshot;

// =============================================================================
// COMMANDS
// =============================================================================

/// A request to change authoritative state.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Turn holder rolls and moves.
    RollDice,
    /// Turn holder buys the tile on offer.
    BuyProperty {
        /// Tile the client believes is on offer
        tile: Option<TileIndex>,
    },
    /// Turn holder refuses the offer; the tile goes to auction.
    DeclinePurchase {
        /// Tile the client believes is on offer
        tile: Option<TileIndex>,
    },
    /// Raise the high bid.
    AuctionBid {
        /// New high bid
        amount: i64,
    },
    /// Leave the auction.
    AuctionPass,
    /// Turn holder proposes a trade.
    TradeOffer(TradeProposal),
    /// Trade target answers.
    TradeResponse {
        /// Accept or refuse
        accepted: bool,
    },
    /// Turn holder passes the turn.
    EndTurn,
    /// Host starts the game.
    StartGame,
    /// Host pauses.
    PauseGame,
    /// Host resumes.
    ResumeGame,
}

impl Command {
    /// Message type carrying this command.
    pub fn kind(&self) -> MessageType {
        match self {
            Command::RollDice => MessageType::RollDice,
            Command::BuyProperty { .. } => MessageType::BuyProperty,
            Command::DeclinePurchase { .. } => MessageType::DeclinePurchase,
            Command::AuctionBid { .. } => MessageType::AuctionBid,
            Command::AuctionPass => MessageType::AuctionPass,
            Command::TradeOffer(_) => MessageType::TradeOffer,
            Command::TradeResponse { .. } => MessageType::TradeResponse,
            Command::EndTurn => MessageType::EndTurn,
            Command::StartGame => MessageType::StartGame,
            Command::PauseGame => MessageType::PauseGame,
            Command::ResumeGame => MessageType::ResumeGame,
        }
    }

    /// Commands only the host may issue.
    pub fn is_host_only(&self) -> bool {
        matches!(self, Command::StartGame | Command::PauseGame | Command::ResumeGame)
    }

    /// Decode a command. `Ok(None)` means the message is not a command;
    /// an `Err` means it is one but its payload is unusable.
    pub fn from_message(msg: &Message) -> Result<Option<Command>, NetError> {
        let bad_payload = || NetError::protocol(format!("bad payload for {:?}", msg.kind));
        let offered_tile = || match msg.payload {
            Payload::Tile(t) => Ok(Some(t)),
            Payload::Empty => Ok(None),
            _ => Err(bad_payload()),
        };

        let cmd = match msg.kind {
            MessageType::RollDice => Command::RollDice,
            MessageType::BuyProperty => Command::BuyProperty { tile: offered_tile()? },
            MessageType::DeclinePurchase => Command::DeclinePurchase { tile: offered_tile()? },
            MessageType::AuctionBid => match msg.payload {
                Payload::Bid(amount) => Command::AuctionBid { amount },
                _ => return Err(bad_payload()),
            },
            MessageType::AuctionPass => Command::AuctionPass,
            MessageType::TradeOffer => match msg.payload {
                Payload::Trade(proposal) => Command::TradeOffer(proposal),
                _ => return Err(bad_payload()),
            },
            MessageType::TradeResponse => match msg.payload {
                Payload::TradeAnswer(TradeAnswer { accepted }) => Command::TradeResponse { accepted },
                _ => return Err(bad_payload()),
            },
            MessageType::EndTurn => Command::EndTurn,
            MessageType::StartGame => Command::StartGame,
            MessageType::PauseGame => Command::PauseGame,
            MessageType::ResumeGame => Command::ResumeGame,
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }

    /// Encode as a message from `sender` to the host.
    pub fn to_message(&self, sender: PlayerId) -> Message {
        let payload = match self {
            Command::BuyProperty { tile: Some(t) } | Command::DeclinePurchase { tile: Some(t) } => {
                Payload::Tile(*t)
            }
            Command::AuctionBid { amount } => Payload::Bid(*amount),
            Command::TradeOffer(proposal) => Payload::Trade(*proposal),
            Command::TradeResponse { accepted } => Payload::TradeAnswer(TradeAnswer { accepted: *accepted }),
            _ => Payload::Empty,
        };
        Message::broadcast(self.kind(), sender, payload)
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Why a rejection happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    /// The command breaks a rule (answered with NACK).
    Rule,
    /// The command refers to something that no longer exists (dropped silently).
    Stale,
}

/// A command the engine refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Rejection {
    /// Category
    pub kind: RejectionKind,
    /// Human-readable reason
    pub reason: String,
}

impl Rejection {
    /// Rule violation.
    pub fn rule(reason: impl Into<String>) -> Self {
        Self { kind: RejectionKind::Rule, reason: reason.into() }
    }

    /// Reference to state that has moved on.
    pub fn stale(reason: impl Into<String>) -> Self {
        Self { kind: RejectionKind::Stale, reason: reason.into() }
    }

    /// Whether this should be dropped without a NACK.
    pub fn is_stale(&self) -> bool {
        self.kind == RejectionKind::Stale
    }
}

/// What removing a player changed.
#[derive(Clone, Debug, PartialEq)]
pub enum Departure {
    /// Not seated; nothing changed.
    NotSeated,
    /// Left the lobby before the game started.
    Unseated,
    /// Left a running game; the events it caused, in order.
    Forfeited(Vec<DomainEvent>),
}

// =============================================================================
// ENGINE TRAIT
// =============================================================================

/// Game rules as seen by the host dispatcher.
///
/// Only the dispatcher's actor task calls these, so implementations need
/// no internal locking.
pub trait DomainEngine: Send + 'static {
    /// Seat a player. Seating an already-seated player succeeds without change.
    fn add_player(&mut self, id: PlayerId, name: &str) -> Result<(), Rejection>;

    /// Unseat a player who left the table.
    fn remove_player(&mut self, id: &PlayerId) -> Departure;

    /// Whether `id` is seated.
    fn has_player(&self, id: &PlayerId) -> bool;

    /// Seated players in seating order (`connected` is filled in by the caller).
    fn roster(&self) -> Vec<PlayerEntry>;

    /// Player allowed to issue turn-scoped commands.
    fn turn_holder(&self) -> Option<PlayerId>;

    /// Remaining bidders while an auction runs.
    fn auction_bidders(&self) -> Option<Vec<PlayerId>>;

    /// Player who must answer the open trade.
    fn trade_target(&self) -> Option<PlayerId>;

    /// Apply a command, returning the events it caused in order.
    fn apply_command(&mut self, actor: PlayerId, command: &Command) -> Result<Vec<DomainEvent>, Rejection>;

    /// Unsealed full-state snapshot.
    fn snapshot(&self) -> GameSnapshot;
}

// =============================================================================
// REFERENCE ENGINE
// =============================================================================

/// Minimal property-trading rules over `GameState`.
#[derive(Clone, Debug)]
pub struct TableEngine {
    state: GameState,
    game_id: Option<[u8; 16]>,
}

impl TableEngine {
    /// Empty table; `seed` drives dice and seating.
    pub fn new(seed: u64) -> Self {
        Self { state: GameState::new(seed), game_id: None }
    }

    /// Empty table whose dice are seeded at game start from `game_id` and
    /// the seated players, so the same table replays identically.
    pub fn for_game(game_id: [u8; 16]) -> Self {
        Self { state: GameState::new(0), game_id: Some(game_id) }
    }

    /// Read-only state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    fn require_playing(&self) -> Result<(), Rejection> {
        match self.state.phase {
            GamePhase::Playing => Ok(()),
            GamePhase::Lobby => Err(Rejection::rule("game has not started")),
            GamePhase::Paused => Err(Rejection::rule("game is paused")),
            GamePhase::Finished => Err(Rejection::rule("game is over")),
        }
    }

    fn require_turn(&self, actor: PlayerId) -> Result<(), Rejection> {
        if self.state.current_turn() == Some(actor) {
            Ok(())
        } else {
            Err(Rejection::rule("not your turn"))
        }
    }

    fn balance(&self, id: &PlayerId) -> i64 {
        self.state.get_player(id).map(|p| p.balance).unwrap_or(0)
    }

    fn pay(&mut self, id: PlayerId, delta: i64, reason: MoneyReason, events: &mut Vec<DomainEvent>) {
        if let Some(player) = self.state.get_player_mut(&id) {
            player.balance += delta;
            events.push(DomainEvent::MoneyChanged {
                player_id: id,
                balance: player.balance,
                reason,
            });
        }
    }

    fn start_game(&mut self) -> Result<Vec<DomainEvent>, Rejection> {
        if self.state.phase != GamePhase::Lobby {
            return Err(Rejection::stale("game already started"));
        }
        if self.state.turn_order.len() < 2 {
            return Err(Rejection::rule("need at least two players"));
        }

        if let Some(game_id) = &self.game_id {
            let seated: Vec<[u8; 16]> = self.state.players.keys().map(|id| *id.as_bytes()).collect();
            self.state.rng = DeterministicRng::new(derive_game_seed(game_id, &seated));
            self.state.turn_order.sort();
        }

        let mut order = std::mem::take(&mut self.state.turn_order);
        self.state.rng.shuffle(&mut order);
        self.state.turn_order = order;
        self.state.phase = GamePhase::Playing;
        self.state.round = 1;
        self.state.turn_index = 0;
        self.state.has_rolled = false;

        let mut events = vec![DomainEvent::GameStarted { turn_order: self.state.turn_order.clone() }];
        if let Some(first) = self.state.current_turn() {
            events.push(DomainEvent::TurnStarted { player_id: first, round: 1 });
        }
        Ok(events)
    }

    fn roll(&mut self, actor: PlayerId) -> Result<Vec<DomainEvent>, Rejection> {
        self.require_turn(actor)?;
        if self.state.has_rolled {
            return Err(Rejection::rule("already rolled this turn"));
        }
        if self.state.pending_offer.is_some() || self.state.auction.is_some() {
            return Err(Rejection::rule("resolve the pending purchase first"));
        }

        let dice = self.state.rng.roll_pair();
        self.state.has_rolled = true;
        self.state.last_roll = Some(dice);

        let Some(player) = self.state.get_player_mut(&actor) else {
            return Err(Rejection::rule("unknown player"));
        };
        let from = player.position;
        let (to, passed_go) = player.advance(dice[0] + dice[1]);

        let mut events = vec![
            DomainEvent::DiceRolled { player_id: actor, dice },
            DomainEvent::PlayerMoved { player_id: actor, from, to, passed_go },
        ];
        if passed_go {
            self.pay(actor, GO_SALARY, MoneyReason::Salary, &mut events);
        }
        self.land(actor, to, &mut events);
        Ok(events)
    }

    /// Resolve the tile `actor` just landed on.
    fn land(&mut self, actor: PlayerId, at: TileIndex, events: &mut Vec<DomainEvent>) {
        let landed = tile(at);
        match landed.kind {
            TileKind::Property { price } => match self.state.ownership.get(&at).copied() {
                None => {
                    self.state.pending_offer = Some(at);
                    events.push(DomainEvent::PropertyOffered { player_id: actor, tile: at, price });
                }
                Some(owner) if owner != actor => {
                    let rent = landed.rent();
                    self.pay(actor, -rent, MoneyReason::Rent { tile: at, counterparty: owner }, events);
                    self.pay(owner, rent, MoneyReason::Rent { tile: at, counterparty: actor }, events);
                }
                Some(_) => {}
            },
            TileKind::Tax { amount } => {
                self.pay(actor, -amount, MoneyReason::Tax { tile: at }, events);
            }
            TileKind::Go | TileKind::Corner | TileKind::Card => {}
        }
    }

    fn check_offer(&self, claimed: Option<TileIndex>) -> Result<TileIndex, Rejection> {
        match (self.state.pending_offer, claimed) {
            (None, _) => Err(Rejection::stale("no property on offer")),
            (Some(offer), Some(t)) if offer != t => Err(Rejection::stale("offer has moved on")),
            (Some(offer), _) => Ok(offer),
        }
    }

    fn buy(&mut self, actor: PlayerId, claimed: Option<TileIndex>) -> Result<Vec<DomainEvent>, Rejection> {
        let at = self.check_offer(claimed)?;
        self.require_turn(actor)?;
        let price = tile(at).price().unwrap_or(0);
        if self.balance(&actor) < price {
            return Err(Rejection::rule("insufficient funds"));
        }

        let mut events = Vec::new();
        self.state.pending_offer = None;
        self.state.ownership.insert(at, actor);
        self.pay(actor, -price, MoneyReason::Purchase { tile: at }, &mut events);
        Ok(events)
    }

    fn decline(&mut self, actor: PlayerId, claimed: Option<TileIndex>) -> Result<Vec<DomainEvent>, Rejection> {
        let at = self.check_offer(claimed)?;
        self.require_turn(actor)?;

        self.state.pending_offer = None;
        let bidders: Vec<PlayerId> = self
            .state
            .turn_order
            .iter()
            .copied()
            .filter(|id| self.balance(id) > 0)
            .collect();
        let auction = AuctionState { tile: at, bidders, high_bid: 0, high_bidder: None };

        let mut events = vec![DomainEvent::AuctionStarted { auction: auction.to_snapshot() }];
        self.state.auction = Some(auction);
        self.settle_auction(&mut events);
        Ok(events)
    }

    fn bid(&mut self, actor: PlayerId, amount: i64) -> Result<Vec<DomainEvent>, Rejection> {
        let balance = self.balance(&actor);
        let Some(auction) = self.state.auction.as_mut() else {
            return Err(Rejection::stale("no auction running"));
        };
        if !auction.is_bidder(&actor) {
            return Err(Rejection::rule("not in this auction"));
        }
        if amount <= auction.high_bid {
            return Err(Rejection::rule(format!("bid must exceed {}", auction.high_bid)));
        }
        if amount > balance {
            return Err(Rejection::rule("insufficient funds"));
        }

        auction.high_bid = amount;
        auction.high_bidder = Some(actor);
        let mut events = vec![DomainEvent::BidPlaced { player_id: actor, auction: auction.to_snapshot() }];
        self.settle_auction(&mut events);
        Ok(events)
    }

    fn pass(&mut self, actor: PlayerId) -> Result<Vec<DomainEvent>, Rejection> {
        let Some(auction) = self.state.auction.as_mut() else {
            return Err(Rejection::stale("no auction running"));
        };
        if !auction.is_bidder(&actor) {
            return Err(Rejection::rule("not in this auction"));
        }
        if auction.high_bidder == Some(actor) {
            return Err(Rejection::rule("high bidder cannot pass"));
        }

        auction.bidders.retain(|id| *id != actor);
        let mut events = vec![DomainEvent::BidderPassed { player_id: actor, auction: auction.to_snapshot() }];
        self.settle_auction(&mut events);
        Ok(events)
    }

    /// Close the auction once it is decided.
    fn settle_auction(&mut self, events: &mut Vec<DomainEvent>) {
        let decided = self.state.auction.as_ref().is_some_and(AuctionState::is_decided);
        if !decided {
            return;
        }
        let Some(auction) = self.state.auction.take() else {
            return;
        };

        if let Some(winner) = auction.high_bidder {
            self.state.ownership.insert(auction.tile, winner);
            self.pay(winner, -auction.high_bid, MoneyReason::AuctionWin { tile: auction.tile }, events);
        }
        events.push(DomainEvent::AuctionEnded {
            tile: auction.tile,
            winner: auction.high_bidder,
            price: if auction.high_bidder.is_some() { auction.high_bid } else { 0 },
        });
    }

    fn offer_trade(&mut self, actor: PlayerId, proposal: TradeProposal) -> Result<Vec<DomainEvent>, Rejection> {
        self.require_turn(actor)?;
        if proposal.from != actor {
            return Err(Rejection::rule("can only offer your own tiles"));
        }
        if self.state.trade.is_some() {
            return Err(Rejection::rule("a trade is already open"));
        }
        if self.state.ownership.get(&proposal.tile) != Some(&actor) {
            return Err(Rejection::rule("you do not own that tile"));
        }
        if proposal.to == actor || !self.state.players.contains_key(&proposal.to) {
            return Err(Rejection::rule("invalid trade partner"));
        }
        if proposal.cash < 0 {
            return Err(Rejection::rule("cash must not be negative"));
        }

        self.state.trade = Some(proposal);
        Ok(vec![DomainEvent::TradeOffered { proposal }])
    }

    fn answer_trade(&mut self, actor: PlayerId, accepted: bool) -> Result<Vec<DomainEvent>, Rejection> {
        let Some(proposal) = self.state.trade else {
            return Err(Rejection::stale("no trade open"));
        };
        if proposal.to != actor {
            return Err(Rejection::rule("trade is not addressed to you"));
        }
        if accepted && self.balance(&actor) < proposal.cash {
            return Err(Rejection::rule("insufficient funds"));
        }

        self.state.trade = None;
        let mut events = Vec::new();
        if accepted {
            self.state.ownership.insert(proposal.tile, proposal.to);
            let reason = MoneyReason::Trade { tile: proposal.tile };
            self.pay(proposal.to, -proposal.cash, reason, &mut events);
            self.pay(proposal.from, proposal.cash, reason, &mut events);
        }
        events.push(DomainEvent::TradeResolved { proposal, accepted });
        Ok(events)
    }

    fn forfeit(&mut self, id: PlayerId, seat: usize) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        let held_turn = self.state.current_turn() == Some(id);

        if let Some(proposal) = self.state.trade {
            if proposal.from == id || proposal.to == id {
                self.state.trade = None;
                events.push(DomainEvent::TradeResolved { proposal, accepted: false });
            }
        }

        if let Some(auction) = self.state.auction.as_mut() {
            if auction.is_bidder(&id) {
                auction.bidders.retain(|p| *p != id);
                if auction.high_bidder == Some(id) {
                    auction.high_bidder = None;
                    auction.high_bid = 0;
                }
                events.push(DomainEvent::BidderPassed { player_id: id, auction: auction.to_snapshot() });
            }
        }
        self.settle_auction(&mut events);

        self.state.ownership.retain(|_, owner| *owner != id);
        self.state.players.remove(&id);
        self.state.turn_order.remove(seat);

        if self.state.turn_order.len() < 2 {
            self.state.phase = GamePhase::Finished;
            return events;
        }

        if seat < self.state.turn_index {
            self.state.turn_index -= 1;
        } else if held_turn {
            // The next seat slid into the departed one's index.
            if self.state.turn_index >= self.state.turn_order.len() {
                self.state.turn_index = 0;
                self.state.round += 1;
            }
            self.state.has_rolled = false;
            self.state.pending_offer = None;
            self.state.last_roll = None;
            if let Some(player_id) = self.state.current_turn() {
                events.push(DomainEvent::TurnStarted { player_id, round: self.state.round });
            }
        }
        events
    }

    fn end_turn(&mut self, actor: PlayerId) -> Result<Vec<DomainEvent>, Rejection> {
        self.require_turn(actor)?;
        if !self.state.has_rolled {
            return Err(Rejection::rule("roll before ending the turn"));
        }
        if self.state.pending_offer.is_some() {
            return Err(Rejection::rule("buy or decline first"));
        }
        if self.state.auction.is_some() {
            return Err(Rejection::rule("auction in progress"));
        }

        let mut events = Vec::new();
        if let Some(proposal) = self.state.trade.take() {
            events.push(DomainEvent::TradeResolved { proposal, accepted: false });
        }
        if let Some((player_id, round)) = self.state.advance_turn() {
            events.push(DomainEvent::TurnStarted { player_id, round });
        }
        Ok(events)
    }
}

impl DomainEngine for TableEngine {
    fn add_player(&mut self, id: PlayerId, name: &str) -> Result<(), Rejection> {
        if self.state.players.contains_key(&id) {
            return Ok(());
        }
        if self.state.phase != GamePhase::Lobby {
            return Err(Rejection::rule("game already started"));
        }
        if self.state.players.len() >= MAX_PLAYERS {
            return Err(Rejection::rule("table is full"));
        }
        self.state.add_player(id, name);
        Ok(())
    }

    fn remove_player(&mut self, id: &PlayerId) -> Departure {
        let Some(seat) = self.state.turn_order.iter().position(|p| p == id) else {
            return Departure::NotSeated;
        };
        if self.state.phase == GamePhase::Lobby {
            self.state.players.remove(id);
            self.state.turn_order.remove(seat);
            return Departure::Unseated;
        }
        Departure::Forfeited(self.forfeit(*id, seat))
    }

    fn has_player(&self, id: &PlayerId) -> bool {
        self.state.players.contains_key(id)
    }

    fn roster(&self) -> Vec<PlayerEntry> {
        self.state
            .turn_order
            .iter()
            .filter_map(|id| self.state.get_player(id))
            .map(|p| PlayerEntry { player_id: p.id, name: p.name.clone(), connected: false })
            .collect()
    }

    fn turn_holder(&self) -> Option<PlayerId> {
        self.state.current_turn()
    }

    fn auction_bidders(&self) -> Option<Vec<PlayerId>> {
        self.state.auction.as_ref().map(|a| a.bidders.clone())
    }

    fn trade_target(&self) -> Option<PlayerId> {
        self.state.trade.map(|t| t.to)
    }

    fn apply_command(&mut self, actor: PlayerId, command: &Command) -> Result<Vec<DomainEvent>, Rejection> {
        match command {
            Command::StartGame => return self.start_game(),
            Command::PauseGame => {
                if self.state.phase != GamePhase::Playing {
                    return Err(Rejection::stale("game is not running"));
                }
                self.state.phase = GamePhase::Paused;
                return Ok(vec![DomainEvent::GamePaused]);
            }
            Command::ResumeGame => {
                if self.state.phase != GamePhase::Paused {
                    return Err(Rejection::stale("game is not paused"));
                }
                self.state.phase = GamePhase::Playing;
                return Ok(vec![DomainEvent::GameResumed]);
            }
            _ => {}
        }

        if !self.has_player(&actor) {
            return Err(Rejection::rule("unknown player"));
        }
        self.require_playing()?;

        match command {
            Command::RollDice => self.roll(actor),
            Command::BuyProperty { tile } => self.buy(actor, *tile),
            Command::DeclinePurchase { tile } => self.decline(actor, *tile),
            Command::AuctionBid { amount } => self.bid(actor, *amount),
            Command::AuctionPass => self.pass(actor),
            Command::TradeOffer(proposal) => self.offer_trade(actor, *proposal),
            Command::TradeResponse { accepted } => self.answer_trade(actor, *accepted),
            Command::EndTurn => self.end_turn(actor),
            Command::StartGame | Command::PauseGame | Command::ResumeGame => Ok(Vec::new()),
        }
    }

    fn snapshot(&self) -> GameSnapshot {
        self.state.to_snapshot()
    }
}
