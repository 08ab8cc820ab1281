//! Authority Dispatch
//!
//! Where inbound commands become authoritative state changes (host) and
//! where broadcasts become replica updates (client).
//!
//! ## Module Structure
//!
//! - `authority`: Who may issue which command
//! - `host`: Single-writer actor in front of the domain engine
//! - `replica`: Version-gated local copy of host state
//! - `client`: Command sender and replica driver

pub mod authority;
pub mod host;
pub mod replica;
pub mod client;

pub use authority::{authorize, AuthorizationError};
pub use host::{DispatchEvent, DispatchHandle, HostDispatcher, Outbound};
pub use replica::{ApplyOutcome, ClientReplica};
pub use client::{ClientDispatcher, ReplicaEvent};
