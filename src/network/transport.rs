//! Transport Manager
//!
//! Owns the sockets. In host mode it runs an accept loop and one worker
//! task per peer; in client mode it holds a single connection to the host.
//! Either way the rest of the crate only sees `send` and a stream of
//! `TransportEvent`s.
//!
//! Every connection gets a writer task fed by an unbounded queue, so
//! `send` never blocks and a slow peer never stalls the others. A failure
//! on one session ends that session only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::NetConfig;
use crate::game::state::PlayerId;
use crate::network::bus::EventBus;
use crate::network::error::NetError;
use crate::network::framing::{read_message, write_message};
use crate::network::protocol::{Handshake, Message, MessageType, Payload};
use crate::network::reliability::{DeliveryEvent, ReliabilityTracker};
use crate::network::session::{SessionHandle, SessionRegistry};

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Neither started nor connected.
    Idle,
    /// Listening for peers.
    Host,
    /// Connected to a host.
    Client,
}

/// Observations published by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An application message (never ACK/NACK, PING, or handshake traffic).
    Message(Message),
    /// Host side: a peer completed its handshake.
    PeerConnected {
        /// Peer id
        peer_id: PlayerId,
        /// Name from the handshake
        display_name: String,
    },
    /// Host side: a session ended.
    PeerDisconnected {
        /// Peer id
        peer_id: PlayerId,
    },
    /// Client side: the host accepted our handshake.
    Joined {
        /// Host's player id
        host_id: PlayerId,
        /// Host's display name
        host_name: String,
    },
    /// Client side: the host refused us or the connection dropped.
    HostLost {
        /// Why
        reason: String,
    },
}

/// Client-side link to the host.
struct HostLink {
    host_id: Option<PlayerId>,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Host or client transport.
pub struct TransportManager {
    config: NetConfig,
    local_id: PlayerId,
    display_name: String,
    mode: Mutex<TransportMode>,
    sessions: SessionRegistry,
    link: Mutex<Option<HostLink>>,
    tracker: ReliabilityTracker,
    events: EventBus<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl TransportManager {
    /// Create an idle transport for the local player.
    pub fn new(config: NetConfig, local_id: PlayerId, display_name: impl Into<String>) -> Arc<Self> {
        let display_name = display_name.into();
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let tracker = ReliabilityTracker::new(
                config.retry_policy(),
                Arc::new(move |msg: &Message| {
                    if let Some(transport) = weak.upgrade() {
                        transport.write_to_host(msg.clone());
                    }
                }),
            );

            Self {
                config,
                local_id,
                display_name,
                mode: Mutex::new(TransportMode::Idle),
                sessions: SessionRegistry::new(),
                link: Mutex::new(None),
                tracker,
                events: EventBus::new(),
                shutdown_tx,
                stopped: AtomicBool::new(false),
            }
        })
    }

    // =========================================================================
    // HOST MODE
    // =========================================================================

    /// Bind a listener and start accepting peers. Returns the bound address
    /// (useful with port 0).
    pub async fn start_host(
        self: &Arc<Self>,
        port: u16,
        room_code: Option<String>,
    ) -> Result<SocketAddr, NetError> {
        self.enter_mode(TransportMode::Host)?;

        let bind = SocketAddr::new(self.config.bind_addr, port);
        let listener = match TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                self.set_mode(TransportMode::Idle);
                return Err(NetError::connection(bind, e));
            }
        };
        let local_addr = listener.local_addr().map_err(|e| NetError::connection(bind, e))?;
        info!(%local_addr, room = room_code.is_some(), "host listening");

        let transport = self.clone();
        let room_code: Option<Arc<str>> = room_code.map(Arc::from);
        tokio::spawn(async move {
            transport.accept_loop(listener, room_code).await;
        });

        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, room_code: Option<Arc<str>>) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(%addr, "accepted socket");
                            let transport = self.clone();
                            let room_code = room_code.clone();
                            tokio::spawn(async move {
                                transport.run_peer(stream, addr, room_code).await;
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = stopped(&mut shutdown) => {
                    info!("accept loop stopped");
                    break;
                }
            }
        }
    }

    /// One peer: handshake, register, then read until EOF, error, or stop.
    async fn run_peer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, room_code: Option<Arc<str>>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let (mut reader, mut writer) = stream.into_split();

        let hello = tokio::select! {
            result = tokio::time::timeout(self.config.handshake_timeout, read_message(&mut reader)) => {
                match result {
                    Ok(Ok(msg)) => msg,
                    Ok(Err(e)) => {
                        debug!(%addr, "handshake read failed: {}", e);
                        return;
                    }
                    Err(_) => {
                        warn!(%addr, "{}", NetError::HandshakeTimeout);
                        return;
                    }
                }
            }
            _ = stopped(&mut shutdown) => return,
        };

        let display_name = match check_handshake(room_code.as_deref(), &hello) {
            Ok(name) => name,
            Err(e) => {
                warn!(%addr, "handshake refused: {}", e);
                self.refuse(&mut writer, hello.sender_id, &protocol_reason(&e)).await;
                return;
            }
        };

        let peer_id = hello.sender_id;
        if peer_id == self.local_id {
            self.refuse(&mut writer, peer_id, "duplicate peer id").await;
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            peer_id,
            display_name: display_name.clone(),
            addr,
            outbound: tx,
            connected_at: Instant::now(),
        };
        if let Err(e) = self.sessions.insert(handle.clone(), self.config.max_peers) {
            warn!(%addr, peer = %peer_id.short(), "handshake refused: {}", e);
            self.refuse(&mut writer, peer_id, &e.to_string()).await;
            return;
        }

        tokio::spawn(write_loop(writer, rx));
        handle.deliver(Message::to(
            MessageType::Connect,
            self.local_id,
            peer_id,
            Payload::Text(self.display_name.clone()),
        ));
        info!(%addr, peer = %peer_id.short(), name = %display_name, "peer joined");
        self.events.publish(TransportEvent::PeerConnected { peer_id, display_name });

        self.read_session(&mut reader, &handle, &mut shutdown).await;

        drop(handle);
        if self.sessions.remove(&peer_id).is_some() {
            info!(%addr, peer = %peer_id.short(), "session closed");
            self.events.publish(TransportEvent::PeerDisconnected { peer_id });
        }
    }

    async fn read_session(
        &self,
        reader: &mut OwnedReadHalf,
        session: &SessionHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            let result = tokio::select! {
                result = read_message(reader) => result,
                _ = stopped(shutdown) => return,
            };

            let mut msg = match result {
                Ok(msg) => msg,
                Err(e) if e.is_eof() => {
                    debug!(peer = %session.peer_id.short(), "peer closed connection");
                    return;
                }
                Err(e @ (NetError::Serialization(_) | NetError::Protocol(_))) => {
                    debug!(peer = %session.peer_id.short(), "undecodable message: {}", e);
                    session.deliver(Message::to(
                        MessageType::Error,
                        self.local_id,
                        session.peer_id,
                        Payload::Text(e.to_string()),
                    ));
                    continue;
                }
                Err(e) => {
                    warn!(peer = %session.peer_id.short(), "session error: {}", e);
                    return;
                }
            };

            if msg.sender_id != session.peer_id {
                warn!(peer = %session.peer_id.short(), claimed = %msg.sender_id.short(), "sender id rewritten");
                msg.sender_id = session.peer_id;
            }

            match msg.kind {
                MessageType::Ack | MessageType::Nack => {
                    self.tracker.handle_reply(&msg);
                }
                MessageType::Ping => {
                    session.deliver(Message::to(MessageType::Pong, self.local_id, session.peer_id, Payload::Empty));
                }
                MessageType::Disconnect => {
                    debug!(peer = %session.peer_id.short(), "peer said goodbye");
                    return;
                }
                MessageType::Connect => {
                    debug!(peer = %session.peer_id.short(), "ignoring repeated CONNECT");
                }
                _ => {
                    self.events.publish(TransportEvent::Message(msg));
                }
            }
        }
    }

    async fn refuse(&self, writer: &mut OwnedWriteHalf, peer: PlayerId, reason: &str) {
        let bye = Message::to(MessageType::Disconnect, self.local_id, peer, Payload::Text(reason.to_string()));
        if let Err(e) = write_message(writer, &bye).await {
            debug!("could not deliver refusal: {}", e);
        }
        let _ = writer.shutdown().await;
    }

    // =========================================================================
    // CLIENT MODE
    // =========================================================================

    /// Dial the host and send the handshake. The host's verdict arrives
    /// later as `Joined` or `HostLost`.
    pub async fn connect_to_host(
        self: &Arc<Self>,
        address: &str,
        port: u16,
        name: &str,
        room_code: Option<String>,
    ) -> Result<(), NetError> {
        self.enter_mode(TransportMode::Client)?;

        let stream = match TcpStream::connect((address, port)).await {
            Ok(s) => s,
            Err(e) => {
                self.set_mode(TransportMode::Idle);
                return Err(NetError::connection(format!("{address}:{port}"), e));
            }
        };
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, rx));

        let hello = Message::broadcast(
            MessageType::Connect,
            self.local_id,
            Payload::Handshake(Handshake {
                room_code,
                display_name: name.to_string(),
            }),
        );
        let _ = tx.send(hello);
        *self.link_lock() = Some(HostLink { host_id: None, outbound: tx });
        info!(%address, port, name, "connecting to host");

        let transport = self.clone();
        tokio::spawn(async move {
            transport.client_loop(reader).await;
        });
        Ok(())
    }

    async fn client_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut shutdown = self.shutdown_tx.subscribe();

        let lost_reason = loop {
            let result = tokio::select! {
                result = read_message(&mut reader) => result,
                _ = stopped(&mut shutdown) => return,
            };

            let msg = match result {
                Ok(msg) => msg,
                Err(e) if e.is_eof() => break "connection closed".to_string(),
                Err(e @ (NetError::Serialization(_) | NetError::Protocol(_))) => {
                    warn!("undecodable message from host: {}", e);
                    continue;
                }
                Err(e) => break e.to_string(),
            };

            match msg.kind {
                MessageType::Connect => {
                    let host_name = match &msg.payload {
                        Payload::Text(name) => name.clone(),
                        _ => String::new(),
                    };
                    if let Some(link) = self.link_lock().as_mut() {
                        link.host_id = Some(msg.sender_id);
                    }
                    info!(host = %msg.sender_id.short(), name = %host_name, "joined host");
                    self.events.publish(TransportEvent::Joined { host_id: msg.sender_id, host_name });
                }
                MessageType::Disconnect => {
                    break match msg.payload {
                        Payload::Text(reason) => reason,
                        _ => "disconnected by host".to_string(),
                    };
                }
                MessageType::Ack | MessageType::Nack => {
                    self.tracker.handle_reply(&msg);
                }
                MessageType::Ping => {
                    self.write_to_host(Message::to(MessageType::Pong, self.local_id, msg.sender_id, Payload::Empty));
                }
                _ => {
                    self.events.publish(TransportEvent::Message(msg));
                }
            }
        };

        warn!(reason = %lost_reason, "lost host");
        self.link_lock().take();
        self.tracker.shutdown();
        self.events.publish(TransportEvent::HostLost { reason: lost_reason });
    }

    fn write_to_host(&self, msg: Message) -> bool {
        match self.link_lock().as_ref() {
            Some(link) => link.outbound.send(msg).is_ok(),
            None => false,
        }
    }

    // =========================================================================
    // SENDING & LIFECYCLE
    // =========================================================================

    /// Queue a message. Host: to the target session, or every session when
    /// broadcast. Client: to the host, tracked first if ack-required.
    /// Returns the number of sessions the message was queued for.
    pub fn send(&self, msg: Message) -> usize {
        if self.is_stopped() {
            return 0;
        }

        match self.mode() {
            TransportMode::Host => match msg.target_id {
                Some(target) => self
                    .sessions
                    .get(&target)
                    .map(|s| usize::from(s.deliver(msg)))
                    .unwrap_or(0),
                None => self
                    .sessions
                    .snapshot()
                    .iter()
                    .filter(|s| s.deliver(msg.clone()))
                    .count(),
            },
            TransportMode::Client => {
                if self.link_lock().is_none() {
                    return 0;
                }
                self.tracker.track(&msg);
                usize::from(self.write_to_host(msg))
            }
            TransportMode::Idle => 0,
        }
    }

    /// Close everything. Idempotent; later `send` calls are no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.tracker.shutdown();
        self.shutdown_tx.send_replace(true);

        let closing = self.sessions.clear();
        for session in &closing {
            session.deliver(Message::to(
                MessageType::Disconnect,
                self.local_id,
                session.peer_id,
                Payload::Text("host stopped".to_string()),
            ));
        }
        if let Some(link) = self.link_lock().take() {
            let _ = link.outbound.send(Message::broadcast(
                MessageType::Disconnect,
                self.local_id,
                Payload::Text("client left".to_string()),
            ));
        }

        info!(mode = ?self.mode(), sessions = closing.len(), "transport stopped");
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Subscribe to transport events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Subscribe to delivery outcomes of our tracked commands.
    pub fn subscribe_delivery(&self) -> mpsc::UnboundedReceiver<DeliveryEvent> {
        self.tracker.subscribe()
    }

    /// Reliability tracker for client commands.
    pub fn tracker(&self) -> &ReliabilityTracker {
        &self.tracker
    }

    /// Our player id.
    pub fn local_id(&self) -> PlayerId {
        self.local_id
    }

    /// Our display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Configuration in force.
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Current mode.
    pub fn mode(&self) -> TransportMode {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live sessions (host mode).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ids of live sessions (host mode).
    pub fn peer_ids(&self) -> Vec<PlayerId> {
        self.sessions.peer_ids()
    }

    /// Host's id once the handshake reply arrived (client mode).
    pub fn host_id(&self) -> Option<PlayerId> {
        self.link_lock().as_ref().and_then(|l| l.host_id)
    }

    /// Whether `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn enter_mode(&self, mode: TransportMode) -> Result<(), NetError> {
        if self.is_stopped() {
            return Err(NetError::Stopped);
        }
        let mut current = self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != TransportMode::Idle {
            return Err(NetError::protocol(format!("transport already in {:?} mode", *current)));
        }
        *current = mode;
        Ok(())
    }

    fn set_mode(&self, mode: TransportMode) {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
    }

    fn link_lock(&self) -> MutexGuard<'_, Option<HostLink>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves once `stop` has been called (or the transport was dropped).
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Drain a connection's outbound queue into its socket.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_message(&mut writer, &msg).await {
            debug!("write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Validate a CONNECT against the configured room code.
/// Returns the peer's display name.
pub fn check_handshake(room_code: Option<&str>, hello: &Message) -> Result<String, NetError> {
    if hello.kind != MessageType::Connect {
        return Err(NetError::protocol(format!("expected CONNECT, got {:?}", hello.kind)));
    }

    let (offered, name) = match &hello.payload {
        Payload::Handshake(h) => (Some(h.room_code.as_deref()), h.display_name.clone()),
        Payload::Text(name) => (None, name.clone()),
        _ => return Err(NetError::protocol("malformed handshake")),
    };

    match (room_code, offered) {
        (None, _) => Ok(name),
        (Some(_), None) => Err(NetError::protocol("room code required")),
        (Some(expected), Some(Some(code))) if code == expected => Ok(name),
        (Some(_), Some(_)) => Err(NetError::protocol("invalid room code")),
    }
}

fn protocol_reason(e: &NetError) -> String {
    match e {
        NetError::Protocol(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::network::framing::{read_message, write_message};
    use crate::network::reliability::DeliveryEvent;

    fn loopback() -> NetConfig {
        NetConfig {
            bind_addr: "127.0.0.1".parse().unwrap(),
            ..NetConfig::default()
        }
    }

    async fn next_matching<T, F>(rx: &mut mpsc::UnboundedReceiver<T>, mut pred: F) -> T
    where
        F: FnMut(&T) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ev = rx.recv().await.expect("bus closed");
                if pred(&ev) {
                    return ev;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_for_sessions(host: &TransportManager, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while host.session_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session count never reached");
    }

    #[test]
    fn test_handshake_rules() {
        let peer = PlayerId::random();
        let modern = |code: Option<&str>| {
            Message::broadcast(
                MessageType::Connect,
                peer,
                Payload::Handshake(Handshake {
                    room_code: code.map(str::to_string),
                    display_name: "Alice".to_string(),
                }),
            )
        };
        let legacy = Message::broadcast(MessageType::Connect, peer, Payload::Text("Bob".into()));

        assert_eq!(check_handshake(Some("ABC123"), &modern(Some("ABC123"))).unwrap(), "Alice");
        assert!(check_handshake(Some("ABC123"), &modern(Some("nope"))).is_err());
        assert!(check_handshake(Some("ABC123"), &modern(None)).is_err());
        assert!(check_handshake(Some("ABC123"), &legacy).is_err());
        assert_eq!(check_handshake(None, &legacy).unwrap(), "Bob");
        assert_eq!(check_handshake(None, &modern(Some("anything"))).unwrap(), "Alice");

        let chat = Message::broadcast(MessageType::Chat, peer, Payload::Empty);
        assert!(matches!(check_handshake(None, &chat), Err(NetError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_two_clients_receive_host_broadcast() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let addr = host.start_host(0, Some("ABC123".into())).await.unwrap();

        let alice = TransportManager::new(loopback(), PlayerId::random(), "Alice");
        let bob = TransportManager::new(loopback(), PlayerId::random(), "Bob");
        let mut alice_rx = alice.subscribe();
        let mut bob_rx = bob.subscribe();

        alice.connect_to_host("127.0.0.1", addr.port(), "Alice", Some("ABC123".into())).await.unwrap();
        bob.connect_to_host("127.0.0.1", addr.port(), "Bob", Some("ABC123".into())).await.unwrap();
        wait_for_sessions(&host, 2).await;

        next_matching(&mut alice_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;
        next_matching(&mut bob_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;
        assert_eq!(alice.host_id(), Some(host.local_id()));

        let chat = Message::broadcast(MessageType::Chat, host.local_id(), Payload::Text("hello table".into()));
        assert_eq!(host.send(chat.clone()), 2);

        for rx in [&mut alice_rx, &mut bob_rx] {
            let ev = next_matching(rx, |e| matches!(e, TransportEvent::Message(_))).await;
            match ev {
                TransportEvent::Message(m) => {
                    assert_eq!(m.id, chat.id);
                    assert_eq!(m.payload, Payload::Text("hello table".into()));
                }
                other => panic!("expected chat, got {other:?}"),
            }
        }

        host.stop();
        alice.stop();
        bob.stop();
    }

    #[tokio::test]
    async fn test_wrong_room_code_is_refused() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let mut host_rx = host.subscribe();
        let addr = host.start_host(0, Some("ABC123".into())).await.unwrap();

        let eve = TransportManager::new(loopback(), PlayerId::random(), "Eve");
        let mut eve_rx = eve.subscribe();
        eve.connect_to_host("127.0.0.1", addr.port(), "Eve", Some("WRONG".into())).await.unwrap();

        let ev = next_matching(&mut eve_rx, |e| matches!(e, TransportEvent::HostLost { .. })).await;
        match ev {
            TransportEvent::HostLost { reason } => assert_eq!(reason, "invalid room code"),
            other => panic!("expected HostLost, got {other:?}"),
        }
        assert_eq!(host.session_count(), 0);
        assert!(host_rx.try_recv().is_err());

        host.stop();
    }

    #[tokio::test]
    async fn test_legacy_handshake() {
        let open = TransportManager::new(loopback(), PlayerId::random(), "Open");
        let open_addr = open.start_host(0, None).await.unwrap();
        let locked = TransportManager::new(loopback(), PlayerId::random(), "Locked");
        let locked_addr = locked.start_host(0, Some("ABC123".into())).await.unwrap();

        let legacy = Message::broadcast(MessageType::Connect, PlayerId::random(), Payload::Text("Carol".into()));

        let mut sock = TcpStream::connect(open_addr).await.unwrap();
        write_message(&mut sock, &legacy).await.unwrap();
        let reply = read_message(&mut sock).await.unwrap();
        assert_eq!(reply.kind, MessageType::Connect);
        assert_eq!(reply.payload, Payload::Text("Open".into()));
        wait_for_sessions(&open, 1).await;

        let mut sock = TcpStream::connect(locked_addr).await.unwrap();
        write_message(&mut sock, &legacy).await.unwrap();
        let reply = read_message(&mut sock).await.unwrap();
        assert_eq!(reply.kind, MessageType::Disconnect);
        assert_eq!(reply.payload, Payload::Text("room code required".into()));
        assert_eq!(locked.session_count(), 0);

        open.stop();
        locked.stop();
    }

    #[tokio::test]
    async fn test_ack_is_routed_to_tracker_not_handler() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let mut host_rx = host.subscribe();
        let addr = host.start_host(0, None).await.unwrap();

        let client = TransportManager::new(loopback(), PlayerId::random(), "Alice");
        let mut client_rx = client.subscribe();
        let mut delivery = client.subscribe_delivery();
        client.connect_to_host("127.0.0.1", addr.port(), "Alice", None).await.unwrap();
        next_matching(&mut client_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;

        let roll = Message::broadcast(MessageType::RollDice, client.local_id(), Payload::Empty);
        assert_eq!(client.send(roll.clone()), 1);
        assert!(client.tracker().is_pending(&roll.id));
        assert!(matches!(delivery.recv().await, Some(DeliveryEvent::Sending(m)) if m.id == roll.id));

        let ev = next_matching(&mut host_rx, |e| matches!(e, TransportEvent::Message(_))).await;
        let TransportEvent::Message(received) = ev else { unreachable!() };
        assert_eq!(received.id, roll.id);

        host.send(Message::make_ack(roll.id, host.local_id(), client.local_id()));
        let outcome = next_matching(&mut delivery, |e| e.is_terminal()).await;
        assert!(matches!(outcome, DeliveryEvent::Acked(m) if m.id == roll.id));
        assert_eq!(client.tracker().pending_count(), 0);
        assert!(client_rx.try_recv().is_err());

        host.stop();
        client.stop();
    }

    #[tokio::test]
    async fn test_losing_host_abandons_unanswered_commands() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let mut host_rx = host.subscribe();
        let addr = host.start_host(0, None).await.unwrap();

        let client = TransportManager::new(loopback(), PlayerId::random(), "Alice");
        let mut client_rx = client.subscribe();
        let mut delivery = client.subscribe_delivery();
        client.connect_to_host("127.0.0.1", addr.port(), "Alice", None).await.unwrap();
        next_matching(&mut client_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;

        let roll = Message::broadcast(MessageType::RollDice, client.local_id(), Payload::Empty);
        client.send(roll.clone());
        next_matching(&mut host_rx, |e| matches!(e, TransportEvent::Message(_))).await;

        host.stop();
        next_matching(&mut client_rx, |e| matches!(e, TransportEvent::HostLost { .. })).await;

        // Published before HostLost, so it is already queued.
        let outcome = next_matching(&mut delivery, |e| e.is_terminal()).await;
        match outcome {
            DeliveryEvent::Abandoned(failure) => {
                assert_eq!(failure.message.id, roll.id);
                assert_eq!(failure.timeouts, 0);
            }
            other => panic!("expected Abandoned, got {other:?}"),
        }
        assert_eq!(client.tracker().pending_count(), 0);
        assert!(delivery.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spoofed_sender_is_rewritten_and_ping_answered() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let mut host_rx = host.subscribe();
        let addr = host.start_host(0, None).await.unwrap();

        let me = PlayerId::random();
        let mut sock = TcpStream::connect(addr).await.unwrap();
        write_message(&mut sock, &Message::broadcast(MessageType::Connect, me, Payload::Text("Mallory".into())))
            .await
            .unwrap();
        assert_eq!(read_message(&mut sock).await.unwrap().kind, MessageType::Connect);

        write_message(&mut sock, &Message::broadcast(MessageType::Ping, me, Payload::Empty)).await.unwrap();
        assert_eq!(read_message(&mut sock).await.unwrap().kind, MessageType::Pong);

        let forged = Message::broadcast(MessageType::EndTurn, PlayerId::random(), Payload::Empty);
        write_message(&mut sock, &forged).await.unwrap();
        let ev = next_matching(&mut host_rx, |e| matches!(e, TransportEvent::Message(_))).await;
        let TransportEvent::Message(received) = ev else { unreachable!() };
        assert_eq!(received.sender_id, me);

        drop(sock);
        let ev = next_matching(&mut host_rx, |e| matches!(e, TransportEvent::PeerDisconnected { .. })).await;
        assert!(matches!(ev, TransportEvent::PeerDisconnected { peer_id } if peer_id == me));
        assert_eq!(host.session_count(), 0);

        host.stop();
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_only_that_session() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let mut host_rx = host.subscribe();
        let addr = host.start_host(0, None).await.unwrap();

        let alice = TransportManager::new(loopback(), PlayerId::random(), "Alice");
        let mut alice_rx = alice.subscribe();
        alice.connect_to_host("127.0.0.1", addr.port(), "Alice", None).await.unwrap();
        next_matching(&mut alice_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;

        let rogue = PlayerId::random();
        let mut sock = TcpStream::connect(addr).await.unwrap();
        write_message(&mut sock, &Message::broadcast(MessageType::Connect, rogue, Payload::Text("Rogue".into())))
            .await
            .unwrap();
        assert_eq!(read_message(&mut sock).await.unwrap().kind, MessageType::Connect);
        wait_for_sessions(&host, 2).await;

        let bogus_len = (crate::network::framing::MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        sock.write_all(&bogus_len).await.unwrap();
        let ev = next_matching(&mut host_rx, |e| matches!(e, TransportEvent::PeerDisconnected { .. })).await;
        assert!(matches!(ev, TransportEvent::PeerDisconnected { peer_id } if peer_id == rogue));
        assert_eq!(host.peer_ids(), vec![alice.local_id()]);

        let chat = Message::broadcast(MessageType::Chat, host.local_id(), Payload::Text("still here".into()));
        assert_eq!(host.send(chat.clone()), 1);
        let ev = next_matching(&mut alice_rx, |e| matches!(e, TransportEvent::Message(_))).await;
        assert!(matches!(ev, TransportEvent::Message(m) if m.id == chat.id));

        let carol = TransportManager::new(loopback(), PlayerId::random(), "Carol");
        let mut carol_rx = carol.subscribe();
        carol.connect_to_host("127.0.0.1", addr.port(), "Carol", None).await.unwrap();
        next_matching(&mut carol_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;
        wait_for_sessions(&host, 2).await;

        host.stop();
        alice.stop();
        carol.stop();
    }

    #[tokio::test]
    async fn test_reset_peer_does_not_stall_accept_loop() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let addr = host.start_host(0, None).await.unwrap();

        // Connect and vanish before any handshake.
        drop(TcpStream::connect(addr).await.unwrap());

        let alice = TransportManager::new(loopback(), PlayerId::random(), "Alice");
        let mut alice_rx = alice.subscribe();
        alice.connect_to_host("127.0.0.1", addr.port(), "Alice", None).await.unwrap();
        next_matching(&mut alice_rx, |e| matches!(e, TransportEvent::Joined { .. })).await;
        wait_for_sessions(&host, 1).await;

        host.stop();
        alice.stop();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_connection_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        let err = host.start_host(port, None).await.unwrap_err();
        assert!(matches!(err, NetError::Connection { .. }));
        assert_eq!(host.mode(), TransportMode::Idle);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_silences_send() {
        let host = TransportManager::new(loopback(), PlayerId::random(), "Host");
        host.start_host(0, None).await.unwrap();
        host.stop();
        host.stop();

        let chat = Message::broadcast(MessageType::Chat, host.local_id(), Payload::Empty);
        assert_eq!(host.send(chat), 0);
        assert!(matches!(host.start_host(0, None).await, Err(NetError::Stopped)));
    }
}
