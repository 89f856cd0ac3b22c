//! Convenient re-exports for common mediagate types.
pub use crate::{
    broker::{AccessBroker, BrokerBuilder, BuildError},
    client::{CacheState, SeenSet},
    hooks::{AccessHook, Event, EventKind, Facility},
    host::{AccessRequest, AsyncFinish, ClientInfo, HostObjects, ObjectTable},
    policy::{AccessPolicy, Decision, Disposition, PolicyId, PolicyTable, Rule},
    portal::{ChannelPortal, DeviceTag, PortalBus, PortalError, RequestHandle},
    sandbox::{CgroupDetector, SandboxDetector, Unconfined},
};
