//! Client Dispatcher
//!
//! Sends the local player's commands to the host and folds everything the
//! host broadcasts into the `ClientReplica`. Delivery outcomes from the
//! Reliability Tracker come back as `ReplicaEvent`s so the UI can tell a
//! confirmed command from a refused or lost one.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::hash::short_digest;
use crate::dispatch::host::Outbound;
use crate::dispatch::replica::{ApplyOutcome, ClientReplica};
use crate::game::engine::Command;
use crate::game::state::PlayerId;
use crate::network::bus::EventBus;
use crate::network::protocol::{ChatLine, Message, MessageType, Payload, PlayerEntry};
use crate::network::reliability::DeliveryEvent;
use crate::network::transport::TransportEvent;

/// Observations for client-side UI.
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// The host accepted our handshake.
    Joined {
        /// Host's player id
        host_id: PlayerId,
        /// Host's display name
        host_name: String,
    },
    /// A full sync replaced the replica.
    Synced {
        /// Snapshot version
        version: u64,
        /// Snapshot digest
        digest: String,
    },
    /// An incremental broadcast patched the replica.
    Updated {
        /// Broadcast type
        kind: MessageType,
        /// Version it carried
        version: Option<u64>,
    },
    /// Roster changed.
    Roster(Vec<PlayerEntry>),
    /// Chat line.
    Chat {
        /// Speaker
        from: PlayerId,
        /// Line
        line: ChatLine,
    },
    /// The host acknowledged one of our commands.
    Confirmed {
        /// Command type
        command: MessageType,
        /// Message id
        id: Uuid,
    },
    /// The host refused one of our commands.
    Refused {
        /// Command type
        command: MessageType,
        /// Host's reason
        reason: String,
    },
    /// A command got no reply within the retry budget.
    Undelivered {
        /// Command type
        command: MessageType,
        /// Timeouts observed
        timeouts: u32,
    },
    /// The host reported a problem with something we sent.
    HostError(String),
    /// The host went away.
    HostLost(String),
}

/// Client-side counterpart of the host dispatcher.
pub struct ClientDispatcher<O> {
    outbound: O,
    local_id: PlayerId,
    replica: Arc<RwLock<ClientReplica>>,
    events: EventBus<ReplicaEvent>,
}

impl<O: Outbound> ClientDispatcher<O> {
    /// Create a dispatcher with an empty replica.
    pub fn new(outbound: O, local_id: PlayerId) -> Self {
        Self {
            outbound,
            local_id,
            replica: Arc::new(RwLock::new(ClientReplica::new(local_id))),
            events: EventBus::new(),
        }
    }

    /// Subscribe to replica observations.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ReplicaEvent> {
        self.events.subscribe()
    }

    /// Read access to the replica.
    pub fn replica(&self) -> RwLockReadGuard<'_, ClientReplica> {
        self.replica.read().unwrap_or_else(|e| e.into_inner())
    }

    fn replica_mut(&self) -> RwLockWriteGuard<'_, ClientReplica> {
        self.replica.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a command to the host. Returns the message id.
    pub fn send_command(&self, command: &Command) -> Uuid {
        let msg = command.to_message(self.local_id);
        let id = msg.id;
        debug!(kind = ?msg.kind, %id, "sending command");
        self.outbound.send(msg);
        id
    }

    /// Send a chat line; the host relays it to everyone.
    pub fn send_chat(&self, text: impl Into<String>) {
        self.outbound
            .send(Message::broadcast(MessageType::Chat, self.local_id, Payload::Text(text.into())));
    }

    /// Fold one host message into the replica.
    pub fn handle_message(&self, msg: &Message) {
        match (&msg.kind, &msg.payload) {
            (MessageType::Chat, Payload::Chat(line)) => {
                self.events.publish(ReplicaEvent::Chat { from: msg.sender_id, line: line.clone() });
                return;
            }
            (MessageType::Error, payload) => {
                let detail = match payload {
                    Payload::Text(text) => text.clone(),
                    _ => "unspecified error".to_string(),
                };
                warn!(%detail, "host reported an error");
                self.events.publish(ReplicaEvent::HostError(detail));
                return;
            }
            _ => {}
        }

        let outcome = self.replica_mut().apply(msg);
        match outcome {
            Ok(ApplyOutcome::Replaced) => {
                let (version, digest) = {
                    let replica = self.replica();
                    (replica.version(), replica.snapshot().digest.clone())
                };
                info!(version, digest = short_digest(&digest), "replica synced");
                self.events.publish(ReplicaEvent::Synced { version, digest });
            }
            Ok(ApplyOutcome::Patched) => {
                if let Payload::PlayerList(roster) = &msg.payload {
                    self.events.publish(ReplicaEvent::Roster(roster.clone()));
                } else {
                    self.events.publish(ReplicaEvent::Updated { kind: msg.kind, version: msg.state_version });
                }
            }
            Ok(ApplyOutcome::Ignored) | Ok(ApplyOutcome::Stale) => {}
            Err(e) => warn!(kind = ?msg.kind, "dropping message: {}", e),
        }
    }

    /// Turn a delivery outcome into a replica event.
    pub fn handle_delivery(&self, event: DeliveryEvent) {
        match event {
            DeliveryEvent::Acked(message) => {
                self.events.publish(ReplicaEvent::Confirmed { command: message.kind, id: message.id });
            }
            DeliveryEvent::Rejected { message, reason } => {
                info!(kind = ?message.kind, %reason, "command refused");
                self.events.publish(ReplicaEvent::Refused { command: message.kind, reason });
            }
            DeliveryEvent::Abandoned(failure) => {
                warn!("{}", failure);
                self.events.publish(ReplicaEvent::Undelivered {
                    command: failure.message.kind,
                    timeouts: failure.timeouts,
                });
            }
            DeliveryEvent::Sending(_) | DeliveryEvent::Resent { .. } => {}
        }
    }

    /// Handle one transport observation. Returns false once the host is gone.
    pub fn handle_transport(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Message(msg) => self.handle_message(&msg),
            TransportEvent::Joined { host_id, host_name } => {
                self.events.publish(ReplicaEvent::Joined { host_id, host_name });
            }
            TransportEvent::HostLost { reason } => {
                self.events.publish(ReplicaEvent::HostLost(reason));
                return false;
            }
            TransportEvent::PeerConnected { .. } | TransportEvent::PeerDisconnected { .. } => {}
        }
        true
    }

    /// Process transport and delivery observations until the host is lost.
    pub async fn run(
        &self,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
        mut delivery: mpsc::UnboundedReceiver<DeliveryEvent>,
    ) {
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => {
                        if !self.handle_transport(event) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = delivery.recv() => self.handle_delivery(event),
            }
        }
        // Outcomes that raced the disconnect.
        while let Ok(event) = delivery.try_recv() {
            self.handle_delivery(event);
        }
        info!(local = %self.local_id.short(), "client dispatcher stopped");
    }
}
