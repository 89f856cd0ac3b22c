#![forbid(unsafe_code)]

//! # mediagate
//!
//! Pluggable access control for a multimedia server: every client-initiated
//! operation on a server object (sinks, sources, streams, modules, samples,
//! clients, cards, server globals) and every subscription event delivered to
//! a client is allowed, refused, or deferred to an out-of-process portal.
//!
//! ## Features
//!
//! - **Per-client policies** built from a small rule vocabulary (allow,
//!   deny, owner-check, portal-check) over a dense hook table
//! - **Event filtering** that keeps each client's view causally consistent
//!   with what it was allowed to observe
//! - **Portal arbitration** for sandboxed clients, with per-hook verdict
//!   caching, bounded reply waits, and cancellation on disconnect
//! - **Sandbox detection** from control-group membership
//! - **Transport-agnostic** portal seam with an in-process channel
//!   implementation
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use mediagate::{
//!     AccessBroker, AccessHook, AccessRequest, ClientInfo, Decision, ObjectTable,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mediagate::BuildError> {
//!     let objects = Arc::new(ObjectTable::new());
//!     objects.put_sink_input(7, Some(5));
//!
//!     let broker = AccessBroker::builder(objects).build()?;
//!     broker.client_put(&ClientInfo::new(5).with_pid(1234));
//!
//!     // Introspection of global objects is open under the default policy.
//!     let request = AccessRequest::new(5, AccessHook::GetSinkInfo, 0);
//!     let decision = broker.check(&request, Box::new(|_, _| {})).await;
//!     assert_eq!(decision, Decision::Allow);
//!
//!     // Streams belong to their clients; nobody else may touch them.
//!     let request = AccessRequest::new(6, AccessHook::KillSinkInput, 7);
//!     let decision = broker.check(&request, Box::new(|_, _| {})).await;
//!     assert_eq!(decision, Decision::Block);
//!     Ok(())
//! }
//! ```

mod broker;
mod client;
mod hooks;
mod host;
mod policy;
mod portal;
mod sandbox;

// Re-exports
pub use broker::{AccessBroker, BrokerBuilder, BuildError, DEFAULT_REPLY_TIMEOUT};
pub use client::{CacheState, SeenSet};
pub use hooks::{AccessHook, Event, EventKind, Facility, FACILITY_MASK, TYPE_MASK};
pub use host::{AccessRequest, AsyncFinish, ClientInfo, HostObjects, ObjectTable};
pub use policy::{
    AccessPolicy, Decision, Disposition, PolicyBuilder, PolicyId, PolicyTable, Rule,
    OWNER_CHECKED_HOOKS, SHARED_ALLOW_HOOKS,
};
pub use portal::{
    AccessQuery, ChannelPortal, DeviceTag, PortalBus, PortalError, RequestHandle,
    PORTAL_ACCESS_METHOD, PORTAL_DESTINATION, PORTAL_DEVICE_INTERFACE, PORTAL_OBJECT_PATH,
    PORTAL_REQUEST_INTERFACE, PORTAL_RESPONSE_MEMBER, RESPONSE_GRANTED,
};
pub use sandbox::{CgroupDetector, SandboxDetector, Unconfined};

pub mod prelude;
