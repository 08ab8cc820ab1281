//! Network Layer
//!
//! TCP transport, wire envelope, and delivery guarantees.
//! This layer is **non-deterministic**; all rules run through `game/`
//! behind the host dispatcher.

pub mod error;
pub mod protocol;
pub mod snapshot;
pub mod framing;
pub mod bus;
pub mod reliability;
pub mod session;
pub mod transport;

pub use error::NetError;
pub use protocol::{Message, MessageType, Payload, PlayerEntry, ACK_REQUIRED};
pub use snapshot::{GameSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use bus::EventBus;
pub use reliability::{DeliveryEvent, DeliveryFailure, ReliabilityTracker, RetryPolicy};
pub use session::{SessionHandle, SessionRegistry};
pub use transport::{TransportEvent, TransportManager, TransportMode};
