//! Host Dispatcher
//!
//! The single writer of authoritative state. Session workers never touch
//! the engine; they publish `TransportEvent`s, and this actor drains them
//! one at a time together with the host's own local commands.
//!
//! For each applied command the state version is bumped once, every
//! resulting event is broadcast stamped with that version, and a turn
//! boundary additionally broadcasts a sealed full-state snapshot. A seated
//! player leaving mid-game is applied the same way, followed by a sync
//! since the seating itself changed.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::hash::short_digest;
use crate::dispatch::authority::authorize;
use crate::game::engine::{Command, Departure, DomainEngine};
use crate::game::events::DomainEvent;
use crate::game::state::PlayerId;
use crate::network::bus::EventBus;
use crate::network::protocol::{
    AuctionResult, ChatLine, DiceUpdate, Message, MessageType, MoneyUpdate, MoveUpdate,
    OfferUpdate, Payload, PlayerEntry, TradeOutcome, TurnUpdate,
};
use crate::network::transport::{TransportEvent, TransportManager};

/// Applied command ids remembered for duplicate suppression.
pub const DEDUP_WINDOW: usize = 256;

/// Where the dispatcher's messages go.
pub trait Outbound: Send + Sync + 'static {
    /// Queue a message; returns how many recipients it was queued for.
    fn send(&self, msg: Message) -> usize;
}

impl Outbound for TransportManager {
    fn send(&self, msg: Message) -> usize {
        TransportManager::send(self, msg)
    }
}

impl<T: Outbound + ?Sized> Outbound for Arc<T> {
    fn send(&self, msg: Message) -> usize {
        (**self).send(msg)
    }
}

/// Observations for host-side UI.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A command changed authoritative state.
    Applied {
        /// Who issued it
        actor: PlayerId,
        /// Command type
        command: MessageType,
        /// State version after applying
        version: u64,
        /// Events it caused
        events: Vec<DomainEvent>,
    },
    /// A command was refused or dropped.
    Refused {
        /// Who issued it
        actor: PlayerId,
        /// Command type
        command: MessageType,
        /// Why
        reason: String,
        /// Whether a NACK went back
        nacked: bool,
    },
    /// A full-state snapshot went out.
    SyncSent {
        /// Snapshot version
        version: u64,
        /// Recipient, `None` for everyone
        target: Option<PlayerId>,
        /// Snapshot digest
        digest: String,
    },
    /// Chat relayed.
    Chat {
        /// Speaker
        from: PlayerId,
        /// Line
        line: ChatLine,
    },
    /// Roster changed.
    Roster(Vec<PlayerEntry>),
}

/// Work for the dispatcher that does not come from the network.
#[derive(Debug)]
enum LocalInput {
    Command(Command),
    Chat(String),
    Resync(PlayerId),
}

/// Cloneable handle for submitting host-local work.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<LocalInput>,
    events: Arc<EventBus<DispatchEvent>>,
}

impl DispatchHandle {
    /// Queue a command issued by the host player.
    pub fn submit(&self, command: Command) -> bool {
        self.tx.send(LocalInput::Command(command)).is_ok()
    }

    /// Queue a chat line from the host player.
    pub fn chat(&self, text: impl Into<String>) -> bool {
        self.tx.send(LocalInput::Chat(text.into())).is_ok()
    }

    /// Queue a targeted full-state sync for `peer`.
    pub fn resync(&self, peer: PlayerId) -> bool {
        self.tx.send(LocalInput::Resync(peer)).is_ok()
    }

    /// Subscribe to dispatcher observations.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DispatchEvent> {
        self.events.subscribe()
    }
}

/// Host-side authority.
pub struct HostDispatcher<E, O> {
    engine: E,
    outbound: O,
    host_id: PlayerId,
    version: u64,
    nack_unauthorized: bool,
    connected: BTreeSet<PlayerId>,
    recent: VecDeque<Uuid>,
    recent_set: HashSet<Uuid>,
    events: Arc<EventBus<DispatchEvent>>,
    local_tx: mpsc::UnboundedSender<LocalInput>,
    local_rx: mpsc::UnboundedReceiver<LocalInput>,
}

impl<E: DomainEngine, O: Outbound> HostDispatcher<E, O> {
    /// Create a dispatcher and seat the host player.
    pub fn new(mut engine: E, outbound: O, host_id: PlayerId, host_name: &str, nack_unauthorized: bool) -> Self {
        if let Err(e) = engine.add_player(host_id, host_name) {
            warn!("host could not be seated: {}", e);
        }
        let (local_tx, local_rx) = mpsc::unbounded_channel();

        Self {
            engine,
            outbound,
            host_id,
            version: 0,
            nack_unauthorized,
            connected: BTreeSet::new(),
            recent: VecDeque::with_capacity(DEDUP_WINDOW),
            recent_set: HashSet::with_capacity(DEDUP_WINDOW),
            events: Arc::new(EventBus::new()),
            local_tx,
            local_rx,
        }
    }

    /// Handle for local commands and UI subscriptions.
    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            tx: self.local_tx.clone(),
            events: self.events.clone(),
        }
    }

    /// Authoritative engine (read-only).
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Current authoritative state version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Drain transport events and local input until the transport side closes.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        info!(host = %self.host_id.short(), "dispatcher running");
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
                Some(local) = self.local_rx.recv() => self.process_local(local),
            }
        }
        info!(version = self.version, "dispatcher stopped");
    }

    fn process_local(&mut self, input: LocalInput) {
        match input {
            LocalInput::Command(command) => self.handle_command(self.host_id, None, command),
            LocalInput::Chat(text) => {
                let line = ChatLine { from_name: self.name_of(&self.host_id), text };
                self.relay_chat(self.host_id, line);
            }
            LocalInput::Resync(peer) => self.resync_peer(peer),
        }
    }

    /// Handle one transport observation.
    pub fn process_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(msg) => self.process_message(msg),
            TransportEvent::PeerConnected { peer_id, display_name } => {
                self.connected.insert(peer_id);
                if let Err(e) = self.engine.add_player(peer_id, &display_name) {
                    info!(peer = %peer_id.short(), "joined as spectator: {}", e);
                    self.outbound.send(Message::to(
                        MessageType::Error,
                        self.host_id,
                        peer_id,
                        Payload::Text(e.reason),
                    ));
                }
                self.broadcast_roster();
                if self.engine.turn_holder().is_some() {
                    self.resync_peer(peer_id);
                }
            }
            TransportEvent::PeerDisconnected { peer_id } => {
                self.connected.remove(&peer_id);
                if let Departure::Forfeited(events) = self.engine.remove_player(&peer_id) {
                    self.apply_departure(peer_id, events);
                }
                self.broadcast_roster();
            }
            TransportEvent::Joined { .. } | TransportEvent::HostLost { .. } => {}
        }
    }

    /// Handle one inbound application message.
    pub fn process_message(&mut self, msg: Message) {
        if msg.kind == MessageType::Chat {
            let text = match msg.payload {
                Payload::Chat(line) => line.text,
                Payload::Text(text) => text,
                _ => return,
            };
            let line = ChatLine { from_name: self.name_of(&msg.sender_id), text };
            self.relay_chat(msg.sender_id, line);
            return;
        }

        match Command::from_message(&msg) {
            Ok(Some(command)) => self.handle_command(msg.sender_id, Some(&msg), command),
            Ok(None) => debug!(kind = ?msg.kind, from = %msg.sender_id.short(), "ignoring non-command"),
            Err(e) => {
                warn!(from = %msg.sender_id.short(), "undecodable command: {}", e);
                self.outbound.send(Message::to(
                    MessageType::Error,
                    self.host_id,
                    msg.sender_id,
                    Payload::Text(e.to_string()),
                ));
            }
        }
    }

    fn handle_command(&mut self, actor: PlayerId, origin: Option<&Message>, command: Command) {
        let kind = command.kind();
        let needs_ack = origin.is_some_and(Message::requires_ack);

        if let Some(msg) = origin {
            if self.recent_set.contains(&msg.id) {
                debug!(id = %msg.id, ?kind, "duplicate command, re-acknowledging");
                if needs_ack {
                    self.outbound.send(Message::make_ack(msg.id, self.host_id, actor));
                }
                return;
            }
        }

        if let Err(e) = authorize(&self.engine, self.host_id, actor, &command) {
            self.refuse(actor, origin, kind, e.to_string(), e.is_stale());
            return;
        }

        let events = match self.engine.apply_command(actor, &command) {
            Ok(events) => events,
            Err(rejection) => {
                let stale = rejection.is_stale();
                self.refuse(actor, origin, kind, rejection.reason, stale);
                return;
            }
        };

        self.version += 1;
        if let Some(msg) = origin {
            self.remember(msg.id);
        }
        debug!(actor = %actor.short(), ?kind, version = self.version, events = events.len(), "applied");

        self.broadcast_events(&events);

        if let (Some(msg), true) = (origin, needs_ack) {
            self.outbound.send(Message::make_ack(msg.id, self.host_id, actor));
        }

        self.events.publish(DispatchEvent::Applied {
            actor,
            command: kind,
            version: self.version,
            events,
        });
    }

    fn apply_departure(&mut self, peer_id: PlayerId, events: Vec<DomainEvent>) {
        self.version += 1;
        info!(peer = %peer_id.short(), version = self.version, events = events.len(), "player forfeited");
        if !self.broadcast_events(&events) {
            self.broadcast_sync(None);
        }
        self.events.publish(DispatchEvent::Applied {
            actor: peer_id,
            command: MessageType::Disconnect,
            version: self.version,
            events,
        });
    }

    /// Broadcast events at the current version. Returns whether a sync went out.
    fn broadcast_events(&mut self, events: &[DomainEvent]) -> bool {
        let mut synced = false;
        for event in events {
            let (event_kind, payload) = event_message(event);
            self.outbound.send(Message::broadcast(event_kind, self.host_id, payload).with_version(self.version));
            if event.is_turn_start() {
                self.broadcast_sync(None);
                synced = true;
            }
        }
        synced
    }

    fn refuse(&mut self, actor: PlayerId, origin: Option<&Message>, command: MessageType, reason: String, stale: bool) {
        let nack_to = origin.filter(|m| !stale && self.nack_unauthorized && m.requires_ack());
        if let Some(msg) = nack_to {
            self.outbound.send(Message::make_nack(msg.id, self.host_id, actor, reason.clone()));
        }

        if stale {
            debug!(actor = %actor.short(), ?command, %reason, "dropped stale command");
        } else {
            info!(actor = %actor.short(), ?command, %reason, "refused command");
        }
        self.events.publish(DispatchEvent::Refused {
            actor,
            command,
            reason,
            nacked: nack_to.is_some(),
        });
    }

    fn remember(&mut self, id: Uuid) {
        if self.recent.len() == DEDUP_WINDOW {
            if let Some(oldest) = self.recent.pop_front() {
                self.recent_set.remove(&oldest);
            }
        }
        self.recent.push_back(id);
        self.recent_set.insert(id);
    }

    /// Send a sealed full-state snapshot to one peer.
    pub fn resync_peer(&mut self, peer: PlayerId) {
        self.broadcast_sync(Some(peer));
    }

    fn broadcast_sync(&mut self, target: Option<PlayerId>) {
        let snapshot = match self.engine.snapshot().seal(self.version) {
            Ok(s) => s,
            Err(e) => {
                error!(version = self.version, "could not seal snapshot: {}", e);
                return;
            }
        };
        let digest = snapshot.digest.clone();
        let msg = Message::new(MessageType::GameStateSync, self.host_id, target, Payload::Snapshot(Box::new(snapshot)))
            .with_version(self.version);
        let recipients = self.outbound.send(msg);

        info!(version = self.version, digest = short_digest(&digest), recipients, "state sync");
        self.events.publish(DispatchEvent::SyncSent { version: self.version, target, digest });
    }

    fn broadcast_roster(&mut self) {
        let roster: Vec<PlayerEntry> = self
            .engine
            .roster()
            .into_iter()
            .map(|mut entry| {
                entry.connected = entry.player_id == self.host_id || self.connected.contains(&entry.player_id);
                entry
            })
            .collect();
        self.outbound.send(Message::broadcast(MessageType::PlayerList, self.host_id, Payload::PlayerList(roster.clone())));
        self.events.publish(DispatchEvent::Roster(roster));
    }

    fn relay_chat(&mut self, from: PlayerId, line: ChatLine) {
        self.outbound.send(Message::broadcast(MessageType::Chat, from, Payload::Chat(line.clone())));
        self.events.publish(DispatchEvent::Chat { from, line });
    }

    fn name_of(&self, id: &PlayerId) -> String {
        self.engine
            .roster()
            .into_iter()
            .find(|p| p.player_id == *id)
            .map(|p| p.name)
            .unwrap_or_else(|| id.short())
    }
}

/// Message type and payload broadcast for a domain event.
pub fn event_message(event: &DomainEvent) -> (MessageType, Payload) {
    match event {
        DomainEvent::GameStarted { turn_order } => (MessageType::GameStart, Payload::Order(turn_order.clone())),
        DomainEvent::TurnStarted { player_id, round } => (
            MessageType::NextTurn,
            Payload::Turn(TurnUpdate { player_id: *player_id, round: *round }),
        ),
        DomainEvent::DiceRolled { player_id, dice } => (
            MessageType::DiceResult,
            Payload::Dice(DiceUpdate { player_id: *player_id, dice: *dice }),
        ),
        DomainEvent::PlayerMoved { player_id, from, to, passed_go } => (
            MessageType::Move,
            Payload::Move(MoveUpdate { player_id: *player_id, from: *from, to: *to, passed_go: *passed_go }),
        ),
        DomainEvent::PropertyOffered { player_id, tile, price } => (
            MessageType::PropertyOffer,
            Payload::Offer(OfferUpdate { player_id: *player_id, tile: *tile, price: *price }),
        ),
        DomainEvent::MoneyChanged { player_id, balance, reason } => (
            MessageType::MoneyUpdate,
            Payload::Money(MoneyUpdate { player_id: *player_id, balance: *balance, reason: *reason }),
        ),
        DomainEvent::AuctionStarted { auction } => (MessageType::AuctionStart, Payload::Auction(auction.clone())),
        DomainEvent::BidPlaced { auction, .. } => (MessageType::AuctionBid, Payload::Auction(auction.clone())),
        DomainEvent::BidderPassed { auction, .. } => (MessageType::AuctionPass, Payload::Auction(auction.clone())),
        DomainEvent::AuctionEnded { tile, winner, price } => (
            MessageType::AuctionEnded,
            Payload::AuctionResult(AuctionResult { tile: *tile, winner: *winner, price: *price }),
        ),
        DomainEvent::TradeOffered { proposal } => (MessageType::TradeOffer, Payload::Trade(*proposal)),
        DomainEvent::TradeResolved { proposal, accepted } => (
            MessageType::TradeResponse,
            Payload::TradeOutcome(TradeOutcome { proposal: *proposal, accepted: *accepted }),
        ),
        DomainEvent::GamePaused => (MessageType::PauseGame, Payload::Empty),
        DomainEvent::GameResumed => (MessageType::ResumeGame, Payload::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::game::engine::TableEngine;
    use crate::network::protocol::TradeAnswer;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Message>>,
    }

    impl Outbound for Recorder {
        fn send(&self, msg: Message) -> usize {
            self.sent.lock().unwrap().push(msg);
            1
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    fn kinds(msgs: &[Message]) -> Vec<MessageType> {
        msgs.iter().map(|m| m.kind).collect()
    }

    const HOST: PlayerId = PlayerId::from_bytes([1; 16]);
    const GUEST: PlayerId = PlayerId::from_bytes([2; 16]);

    /// Host plus one guest, game started; returns (dispatcher, recorder, turn holder, other).
    fn started() -> (HostDispatcher<TableEngine, Arc<Recorder>>, Arc<Recorder>, PlayerId, PlayerId) {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = HostDispatcher::new(TableEngine::new(11), recorder.clone(), HOST, "Host", true);
        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() });
        dispatcher.handle_command(HOST, None, Command::StartGame);
        recorder.take();

        let holder = dispatcher.engine().turn_holder().unwrap();
        let other = if holder == HOST { GUEST } else { HOST };
        (dispatcher, recorder, holder, other)
    }

    #[test]
    fn test_start_broadcasts_start_turn_and_sync() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = HostDispatcher::new(TableEngine::new(11), recorder.clone(), HOST, "Host", true);
        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() });
        assert_eq!(kinds(&recorder.take()), vec![MessageType::PlayerList]);

        dispatcher.handle_command(HOST, None, Command::StartGame);
        let sent = recorder.take();
        assert_eq!(
            kinds(&sent),
            vec![MessageType::GameStart, MessageType::NextTurn, MessageType::GameStateSync]
        );
        assert!(sent.iter().all(|m| m.state_version == Some(1)));

        let Payload::Snapshot(snapshot) = &sent[2].payload else {
            panic!("expected snapshot payload");
        };
        snapshot.verify().unwrap();
        assert_eq!(snapshot.state_version, 1);
        assert_eq!(snapshot.players.len(), 2);
    }

    #[test]
    fn test_out_of_turn_roll_is_dropped() {
        let (mut dispatcher, recorder, holder, other) = started();

        let roll = Command::RollDice.to_message(other);
        dispatcher.process_message(roll.clone());

        let sent = recorder.take();
        assert!(!sent.iter().any(|m| matches!(m.kind, MessageType::Move | MessageType::DiceResult)));
        assert_eq!(kinds(&sent), vec![MessageType::Nack]);
        assert_eq!(sent[0].ack_for_message_id, Some(roll.id));
        assert_eq!(sent[0].nack_reason.as_deref(), Some("not your turn"));
        assert_eq!(dispatcher.engine().turn_holder(), Some(holder));
        assert_eq!(dispatcher.version(), 1);
    }

    #[test]
    fn test_applied_roll_is_broadcast_and_acked() {
        let (mut dispatcher, recorder, holder, _) = started();

        let roll = Command::RollDice.to_message(holder);
        dispatcher.process_message(roll.clone());

        let sent = recorder.take();
        assert_eq!(sent[0].kind, MessageType::DiceResult);
        assert_eq!(sent[1].kind, MessageType::Move);
        assert!(sent[..sent.len() - 1].iter().all(|m| m.broadcast && m.state_version == Some(2)));

        let ack = sent.last().unwrap();
        assert_eq!(ack.kind, MessageType::Ack);
        assert_eq!(ack.target_id, Some(holder));
        assert_eq!(ack.ack_for_message_id, Some(roll.id));
    }

    #[test]
    fn test_retransmitted_command_is_reacked_not_reapplied() {
        let (mut dispatcher, recorder, holder, _) = started();
        let roll = Command::RollDice.to_message(holder);

        dispatcher.process_message(roll.clone());
        recorder.take();
        dispatcher.process_message(roll.clone());

        let sent = recorder.take();
        assert_eq!(kinds(&sent), vec![MessageType::Ack]);
        assert_eq!(dispatcher.version(), 2);
    }

    #[test]
    fn test_turn_end_triggers_sync() {
        let (mut dispatcher, recorder, holder, other) = started();
        dispatcher.process_message(Command::RollDice.to_message(holder));
        if dispatcher.engine().state().pending_offer.is_some() {
            dispatcher.process_message(Command::DeclinePurchase { tile: None }.to_message(holder));
            while let Some(bidders) = dispatcher.engine().auction_bidders() {
                dispatcher.process_message(Command::AuctionPass.to_message(bidders[0]));
            }
        }
        recorder.take();

        dispatcher.process_message(Command::EndTurn.to_message(holder));
        let sent = recorder.take();
        let next = sent.iter().position(|m| m.kind == MessageType::NextTurn).unwrap();
        assert_eq!(sent[next + 1].kind, MessageType::GameStateSync);
        assert_eq!(sent[next].state_version, sent[next + 1].state_version);
        assert_eq!(dispatcher.engine().turn_holder(), Some(other));
    }

    #[test]
    fn test_purchase_reaches_replica_before_next_sync() {
        use crate::dispatch::replica::ClientReplica;

        for seed in 0..64 {
            let recorder = Arc::new(Recorder::default());
            let mut dispatcher = HostDispatcher::new(TableEngine::new(seed), recorder.clone(), HOST, "Host", true);
            dispatcher.process_event(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() });
            dispatcher.handle_command(HOST, None, Command::StartGame);
            let holder = dispatcher.engine().turn_holder().unwrap();
            dispatcher.process_message(Command::RollDice.to_message(holder));
            let Some(tile) = dispatcher.engine().state().pending_offer else {
                continue;
            };
            dispatcher.process_message(Command::BuyProperty { tile: None }.to_message(holder));

            let mut replica = ClientReplica::new(GUEST);
            for msg in recorder.take().iter().filter(|m| m.broadcast) {
                replica.apply(msg).unwrap();
            }
            assert_eq!(dispatcher.engine().state().ownership.get(&tile), Some(&holder));
            assert_eq!(replica.snapshot().ownership.get(&tile), Some(&holder));
            assert_eq!(replica.snapshot().pending_offer, None);
            assert_eq!(replica.version(), dispatcher.version());
            return;
        }
        panic!("no seed produced a purchasable landing");
    }

    #[test]
    fn test_departed_turn_holder_hands_over_the_turn() {
        let third = PlayerId::from_bytes([3; 16]);
        for seed in 0..32 {
            let recorder = Arc::new(Recorder::default());
            let mut dispatcher = HostDispatcher::new(TableEngine::new(seed), recorder.clone(), HOST, "Host", true);
            for (peer_id, name) in [(GUEST, "Guest"), (third, "Third")] {
                dispatcher.process_event(TransportEvent::PeerConnected { peer_id, display_name: name.into() });
            }
            dispatcher.handle_command(HOST, None, Command::StartGame);
            let order = dispatcher.engine().state().turn_order.clone();
            if order[0] == HOST {
                continue;
            }
            recorder.take();

            dispatcher.process_event(TransportEvent::PeerDisconnected { peer_id: order[0] });
            let sent = recorder.take();
            assert_eq!(
                kinds(&sent),
                vec![MessageType::NextTurn, MessageType::GameStateSync, MessageType::PlayerList]
            );
            assert!(sent[..2].iter().all(|m| m.state_version == Some(2)));
            assert_eq!(dispatcher.version(), 2);
            assert_eq!(dispatcher.engine().turn_holder(), Some(order[1]));
            assert!(!dispatcher.engine().has_player(&order[0]));
            return;
        }
        panic!("host held the first turn for every seed");
    }

    #[test]
    fn test_departed_bystander_triggers_sync() {
        let (mut dispatcher, recorder, _, _) = started();
        let third = PlayerId::from_bytes([3; 16]);
        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: third, display_name: "Late".into() });
        recorder.take();

        // Spectators leave without touching the game.
        dispatcher.process_event(TransportEvent::PeerDisconnected { peer_id: third });
        assert_eq!(kinds(&recorder.take()), vec![MessageType::PlayerList]);
        assert_eq!(dispatcher.version(), 1);

        dispatcher.process_event(TransportEvent::PeerDisconnected { peer_id: GUEST });
        let sent = recorder.take();
        assert_eq!(kinds(&sent), vec![MessageType::GameStateSync, MessageType::PlayerList]);
        assert_eq!(dispatcher.version(), 2);
        let Payload::Snapshot(snapshot) = &sent[0].payload else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.phase, crate::network::snapshot::PhaseTag::Finished);
    }

    #[test]
    fn test_late_bid_is_dropped_silently() {
        let (mut dispatcher, recorder, holder, _) = started();
        let bid = Command::AuctionBid { amount: 50 }.to_message(holder);
        dispatcher.process_message(bid);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_rule_rejection_is_nacked() {
        let (mut dispatcher, recorder, holder, _) = started();
        dispatcher.process_message(Command::EndTurn.to_message(holder));
        let sent = recorder.take();
        assert_eq!(kinds(&sent), vec![MessageType::Nack]);
        assert_eq!(sent[0].nack_reason.as_deref(), Some("roll before ending the turn"));
    }

    #[test]
    fn test_nack_can_be_disabled() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = HostDispatcher::new(TableEngine::new(11), recorder.clone(), HOST, "Host", false);
        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() });
        recorder.take();

        dispatcher.process_message(Command::RollDice.to_message(GUEST));
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_client_cannot_start_game() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = HostDispatcher::new(TableEngine::new(11), recorder.clone(), HOST, "Host", true);
        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() });
        recorder.take();
        let mut refusals = dispatcher.handle().subscribe();

        dispatcher.process_message(Message::broadcast(MessageType::StartGame, GUEST, Payload::Empty));
        assert!(recorder.take().is_empty());
        assert!(dispatcher.engine().turn_holder().is_none());
        assert!(matches!(
            refusals.try_recv().unwrap(),
            DispatchEvent::Refused { nacked: false, .. }
        ));
    }

    #[test]
    fn test_bad_payload_gets_error_reply() {
        let (mut dispatcher, recorder, holder, _) = started();
        let broken = Message::broadcast(MessageType::TradeResponse, holder, Payload::Empty);
        dispatcher.process_message(broken);
        let sent = recorder.take();
        assert_eq!(kinds(&sent), vec![MessageType::Error]);
        assert_eq!(sent[0].target_id, Some(holder));

        let fine = Message::broadcast(
            MessageType::TradeResponse,
            holder,
            Payload::TradeAnswer(TradeAnswer { accepted: false }),
        );
        dispatcher.process_message(fine);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_chat_is_relayed_with_speaker_name() {
        let (mut dispatcher, recorder, _, _) = started();
        dispatcher.process_message(Message::broadcast(MessageType::Chat, GUEST, Payload::Text("gg".into())));
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender_id, GUEST);
        assert_eq!(
            sent[0].payload,
            Payload::Chat(ChatLine { from_name: "Guest".into(), text: "gg".into() })
        );
    }

    #[test]
    fn test_join_and_leave_update_roster() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = HostDispatcher::new(TableEngine::new(11), recorder.clone(), HOST, "Host", true);

        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() });
        let sent = recorder.take();
        let Payload::PlayerList(roster) = &sent[0].payload else {
            panic!("expected roster");
        };
        assert_eq!(roster.len(), 2);
        assert!(roster.iter().all(|p| p.connected));

        dispatcher.process_event(TransportEvent::PeerDisconnected { peer_id: GUEST });
        let sent = recorder.take();
        let Payload::PlayerList(roster) = &sent[0].payload else {
            panic!("expected roster");
        };
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_late_joiner_gets_targeted_sync() {
        let (mut dispatcher, recorder, _, _) = started();
        let late = PlayerId::from_bytes([3; 16]);
        dispatcher.process_event(TransportEvent::PeerConnected { peer_id: late, display_name: "Late".into() });

        let sent = recorder.take();
        assert_eq!(
            kinds(&sent),
            vec![MessageType::Error, MessageType::PlayerList, MessageType::GameStateSync]
        );
        assert_eq!(sent[2].target_id, Some(late));
    }

    #[tokio::test]
    async fn test_actor_serializes_transport_and_local_input() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = HostDispatcher::new(TableEngine::new(11), recorder.clone(), HOST, "Host", true);
        let handle = dispatcher.handle();
        let mut observed = handle.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatcher.run(rx));

        tx.send(TransportEvent::PeerConnected { peer_id: GUEST, display_name: "Guest".into() }).unwrap();
        assert!(matches!(observed.recv().await, Some(DispatchEvent::Roster(_))));

        handle.submit(Command::StartGame);
        assert!(matches!(
            observed.recv().await,
            Some(DispatchEvent::SyncSent { version: 1, target: None, .. })
        ));
        assert!(matches!(
            observed.recv().await,
            Some(DispatchEvent::Applied { command: MessageType::StartGame, version: 1, .. })
        ));

        drop(tx);
        task.await.unwrap();
    }
}
