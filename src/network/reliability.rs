//! Reliability Tracker
//!
//! Application-level acknowledgement for ack-required commands. Every
//! tracked message ends in exactly one terminal outcome: acknowledged,
//! rejected, or abandoned after the retry budget runs out.
//!
//! State per message:
//! ```text
//! SENT --ack--> ACKED
//! SENT --nack-> REJECTED
//! SENT --timeout, retries left--> SENT (resend)
//! SENT --timeout, no retries----> ABANDONED
//! ```
//!
//! The pending map is touched by the sender, the timer tasks, and the
//! receive loop handling ACK/NACK, so it sits behind a mutex and every
//! removal is the single point that decides the outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::network::bus::EventBus;
use crate::network::protocol::{Message, MessageType};

/// Default time to wait for an ACK before resending.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of timeouts before a message is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Timeout and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait per attempt
    pub timeout: Duration,
    /// Timeouts tolerated; the last one abandons the message
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// A message that exhausted its retries without an ACK or NACK.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{:?} {} abandoned after {} timeouts", .message.kind, .message.id, .timeouts)]
pub struct DeliveryFailure {
    /// The original tracked message
    pub message: Message,
    /// Timeouts observed
    pub timeouts: u32,
}

/// Observations published by the tracker.
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    /// Tracked and about to be written.
    Sending(Message),
    /// Timed out and resent.
    Resent {
        /// The original message
        message: Message,
        /// Retry number, starting at 1
        retry: u32,
    },
    /// Terminal: the host accepted it.
    Acked(Message),
    /// Terminal: the host refused it.
    Rejected {
        /// The original message
        message: Message,
        /// Host's reason
        reason: String,
    },
    /// Terminal: no reply within the retry budget.
    Abandoned(DeliveryFailure),
}

impl DeliveryEvent {
    /// Id of the message this event is about.
    pub fn message_id(&self) -> Uuid {
        match self {
            DeliveryEvent::Sending(m) | DeliveryEvent::Acked(m) => m.id,
            DeliveryEvent::Resent { message, .. } | DeliveryEvent::Rejected { message, .. } => message.id,
            DeliveryEvent::Abandoned(failure) => failure.message.id,
        }
    }

    /// Whether this is one of the three final outcomes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryEvent::Acked(_) | DeliveryEvent::Rejected { .. } | DeliveryEvent::Abandoned(_)
        )
    }
}

/// Performs the actual retransmission.
pub type ResendFn = Arc<dyn Fn(&Message) + Send + Sync>;

struct PendingEntry {
    message: Message,
    retry_count: u32,
    generation: u64,
    timer: AbortHandle,
}

struct Inner {
    policy: RetryPolicy,
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    resend: ResendFn,
    events: EventBus<DeliveryEvent>,
    shut_down: AtomicBool,
    generation: AtomicU64,
}

/// Tracks ack-required messages until they reach a terminal outcome.
///
/// Cheap to clone; clones share the same pending set. Timers are Tokio
/// tasks, so `track` must be called from within a runtime.
#[derive(Clone)]
pub struct ReliabilityTracker {
    inner: Arc<Inner>,
}

impl ReliabilityTracker {
    /// Create a tracker that retransmits through `resend`.
    pub fn new(policy: RetryPolicy, resend: ResendFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                pending: Mutex::new(HashMap::new()),
                resend,
                events: EventBus::new(),
                shut_down: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Policy in force.
    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Subscribe to delivery observations.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    /// Start tracking `message`. Returns false (and does nothing) if the
    /// message is not ack-required or the tracker was shut down.
    pub fn track(&self, message: &Message) -> bool {
        if !message.requires_ack() || self.inner.shut_down.load(Ordering::Acquire) {
            return false;
        }

        {
            let mut pending = self.inner.lock();
            let generation = self.inner.next_generation();
            let timer = spawn_timer(&self.inner, message.id, generation);
            let entry = PendingEntry {
                message: message.clone(),
                retry_count: 0,
                generation,
                timer,
            };
            if let Some(previous) = pending.insert(message.id, entry) {
                previous.timer.abort();
            }
        }

        debug!(id = %message.id, kind = ?message.kind, "tracking");
        self.inner.events.publish(DeliveryEvent::Sending(message.clone()));
        true
    }

    /// Terminal ACK. Returns false if `id` is not pending.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        match self.inner.take(id) {
            Some(entry) => {
                debug!(%id, kind = ?entry.message.kind, "acknowledged");
                self.inner.events.publish(DeliveryEvent::Acked(entry.message));
                true
            }
            None => false,
        }
    }

    /// Terminal NACK. Returns false if `id` is not pending.
    pub fn reject(&self, id: Uuid, reason: &str) -> bool {
        match self.inner.take(id) {
            Some(entry) => {
                info!(%id, kind = ?entry.message.kind, reason, "rejected by host");
                self.inner.events.publish(DeliveryEvent::Rejected {
                    message: entry.message,
                    reason: reason.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Route an inbound ACK/NACK envelope. Returns false for anything else
    /// or for replies to ids no longer pending.
    pub fn handle_reply(&self, reply: &Message) -> bool {
        let Some(original) = reply.ack_for_message_id else {
            return false;
        };
        match reply.kind {
            MessageType::Ack => self.acknowledge(original),
            MessageType::Nack => {
                self.reject(original, reply.nack_reason.as_deref().unwrap_or("rejected"))
            }
            _ => false,
        }
    }

    /// Number of messages awaiting a terminal outcome.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether `id` is still awaiting a terminal outcome.
    pub fn is_pending(&self, id: &Uuid) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Cancel every timer and abandon every pending message. Later calls
    /// find nothing pending and publish nothing.
    pub fn shutdown(&self) {
        let was_down = self.inner.shut_down.swap(true, Ordering::AcqRel);
        let drained: Vec<PendingEntry> = self.inner.lock().drain().map(|(_, e)| e).collect();
        if !was_down {
            info!(abandoned = drained.len(), "reliability tracker shut down");
        }
        for entry in drained {
            entry.timer.abort();
            debug!(id = %entry.message.id, kind = ?entry.message.kind, "abandoned at shutdown");
            self.inner.events.publish(DeliveryEvent::Abandoned(DeliveryFailure {
                message: entry.message,
                timeouts: entry.retry_count,
            }));
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, PendingEntry>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    fn take(&self, id: Uuid) -> Option<PendingEntry> {
        let entry = self.lock().remove(&id)?;
        entry.timer.abort();
        Some(entry)
    }

    fn on_timeout(self: &Arc<Self>, id: Uuid, generation: u64) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }

        let mut pending = self.lock();
        let Some(entry) = pending.get_mut(&id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        entry.retry_count += 1;
        let retry = entry.retry_count;

        if retry < self.policy.max_retries {
            let next = self.next_generation();
            entry.generation = next;
            entry.timer = spawn_timer(self, id, next);
            let message = entry.message.clone();
            drop(pending);

            warn!(%id, kind = ?message.kind, retry, "no ack, resending");
            (self.resend)(&message);
            self.events.publish(DeliveryEvent::Resent { message, retry });
        } else {
            let removed = pending.remove(&id);
            drop(pending);

            if let Some(entry) = removed {
                warn!(%id, kind = ?entry.message.kind, timeouts = retry, "abandoned");
                self.events.publish(DeliveryEvent::Abandoned(DeliveryFailure {
                    message: entry.message,
                    timeouts: retry,
                }));
            }
        }
    }
}

fn spawn_timer(inner: &Arc<Inner>, id: Uuid, generation: u64) -> AbortHandle {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let deadline = Instant::now() + inner.policy.timeout;
    tokio::spawn(async move {
        sleep_until(deadline).await;
        if let Some(inner) = weak.upgrade() {
            inner.on_timeout(id, generation);
        }
    })
    .abort_handle()
}
