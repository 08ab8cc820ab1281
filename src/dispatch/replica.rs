//! Client Replica
//!
//! A client's read-only view of the table. Full-state syncs replace it
//! wholesale; incremental broadcasts patch one field at a time so the UI
//! can react before the next sync confirms or corrects them.
//!
//! Ordering is decided by the host's state version, never by arrival:
//! a sync is taken if it is at least as new as anything seen, and an
//! event is taken only if it is newer than the last sync (the sync
//! already contains everything at or below its own version).

use tracing::debug;

use crate::game::state::PlayerId;
use crate::network::error::NetError;
use crate::network::protocol::{Message, MessageType, MoneyReason, Payload, PlayerEntry};
use crate::network::snapshot::{GameSnapshot, PhaseTag};

/// What `ClientReplica::apply` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A sync replaced the replica.
    Replaced,
    /// An event patched the replica.
    Patched,
    /// The message does not touch replicated state.
    Ignored,
    /// Older than what the replica already reflects; dropped.
    Stale,
}

/// Local copy of authoritative state.
#[derive(Debug, Clone)]
pub struct ClientReplica {
    local_id: PlayerId,
    snapshot: GameSnapshot,
    version: u64,
    synced_version: u64,
    roster: Vec<PlayerEntry>,
}

impl ClientReplica {
    /// Empty lobby replica.
    pub fn new(local_id: PlayerId) -> Self {
        Self {
            local_id,
            snapshot: GameSnapshot::empty(),
            version: 0,
            synced_version: 0,
            roster: Vec::new(),
        }
    }

    /// Current view.
    pub fn snapshot(&self) -> &GameSnapshot {
        &self.snapshot
    }

    /// Highest state version applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the last full sync.
    pub fn synced_version(&self) -> u64 {
        self.synced_version
    }

    /// Last roster received.
    pub fn roster(&self) -> &[PlayerEntry] {
        &self.roster
    }

    /// Whether the local player holds the turn.
    pub fn is_my_turn(&self) -> bool {
        self.snapshot.current_turn == Some(self.local_id)
    }

    /// Token position of `id`.
    pub fn position_of(&self, id: &PlayerId) -> Option<u8> {
        self.snapshot.player(id).map(|p| p.position)
    }

    /// Balance of `id`.
    pub fn balance_of(&self, id: &PlayerId) -> Option<i64> {
        self.snapshot.player(id).map(|p| p.balance)
    }

    /// Apply one inbound message.
    ///
    /// A sync whose digest or schema does not check out is an error and
    /// leaves the replica untouched.
    pub fn apply(&mut self, msg: &Message) -> Result<ApplyOutcome, NetError> {
        if msg.kind == MessageType::GameStateSync {
            return self.apply_sync(msg);
        }

        if let Some(v) = msg.state_version {
            if v < self.version || v <= self.synced_version {
                debug!(kind = ?msg.kind, version = v, have = self.version, "stale event");
                return Ok(ApplyOutcome::Stale);
            }
        }

        let patched = self.patch(msg);
        if patched {
            if let Some(v) = msg.state_version {
                self.version = v;
            }
            Ok(ApplyOutcome::Patched)
        } else {
            Ok(ApplyOutcome::Ignored)
        }
    }

    fn apply_sync(&mut self, msg: &Message) -> Result<ApplyOutcome, NetError> {
        let Payload::Snapshot(snapshot) = &msg.payload else {
            return Err(NetError::protocol("GAME_STATE_SYNC without a snapshot"));
        };
        snapshot.verify()?;

        let v = snapshot.state_version;
        if v < self.version {
            debug!(version = v, have = self.version, "stale sync");
            return Ok(ApplyOutcome::Stale);
        }

        self.snapshot = (**snapshot).clone();
        self.version = v;
        self.synced_version = v;
        Ok(ApplyOutcome::Replaced)
    }

    fn patch(&mut self, msg: &Message) -> bool {
        let view = &mut self.snapshot;
        match (&msg.kind, &msg.payload) {
            (_, Payload::PlayerList(entries)) => {
                self.roster = entries.clone();
            }
            (MessageType::GameStart, Payload::Order(order)) => {
                view.turn_order = order.clone();
                view.players.sort_by_key(|p| order.iter().position(|id| *id == p.player_id));
                view.phase = PhaseTag::Playing;
                view.round = 1;
            }
            (MessageType::NextTurn, Payload::Turn(turn)) => {
                view.current_turn = Some(turn.player_id);
                view.round = turn.round;
                view.last_roll = None;
                view.pending_offer = None;
            }
            (_, Payload::Dice(dice)) => view.last_roll = Some(dice.dice),
            (_, Payload::Move(mv)) => {
                if let Some(p) = view.player_mut(&mv.player_id) {
                    p.position = mv.to;
                }
            }
            (_, Payload::Money(money)) => {
                if let Some(p) = view.player_mut(&money.player_id) {
                    p.balance = money.balance;
                }
                if let MoneyReason::Purchase { tile } = money.reason {
                    view.ownership.insert(tile, money.player_id);
                    if view.pending_offer == Some(tile) {
                        view.pending_offer = None;
                    }
                }
            }
            (_, Payload::Offer(offer)) => view.pending_offer = Some(offer.tile),
            (_, Payload::Auction(auction)) => {
                view.pending_offer = None;
                view.auction = Some(auction.clone());
            }
            (_, Payload::AuctionResult(result)) => {
                view.auction = None;
                if let Some(winner) = result.winner {
                    view.ownership.insert(result.tile, winner);
                }
            }
            (MessageType::TradeOffer, Payload::Trade(proposal)) => view.trade = Some(*proposal),
            (_, Payload::TradeOutcome(outcome)) => {
                view.trade = None;
                if outcome.accepted {
                    view.ownership.insert(outcome.proposal.tile, outcome.proposal.to);
                }
            }
            (MessageType::PauseGame, _) => view.phase = PhaseTag::Paused,
            (MessageType::ResumeGame, _) => view.phase = PhaseTag::Playing,
            _ => return false,
        }
        true
    }
}
