//! Types the host server hands to the broker.
//!
//! The broker never owns server objects or the client registry; it sees
//! them through [`AccessRequest`] records and the [`HostObjects`] lookup
//! trait. [`ObjectTable`] is an in-memory implementation for embedding
//! hosts and tests.

use crate::hooks::{AccessHook, Event};
use std::collections::HashMap;
use std::sync::Mutex;

/// One access check as dispatched by the host.
///
/// The broker never mutates a request; the event filter copies it with an
/// overridden `hook` when probing visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest {
    /// Index of the client performing the operation.
    pub client_index: u32,
    /// The gated operation.
    pub hook: AccessHook,
    /// Index of the target object, when the hook has one.
    pub object_index: u32,
    /// Raw event word, present only on subscription-event hooks.
    pub event: Option<Event>,
}

impl AccessRequest {
    /// A request without an event word.
    #[must_use]
    pub fn new(client_index: u32, hook: AccessHook, object_index: u32) -> AccessRequest {
        AccessRequest { client_index, hook, object_index, event: None }
    }

    /// A subscription-event request.
    #[must_use]
    pub fn event(client_index: u32, event: Event, object_index: u32) -> AccessRequest {
        AccessRequest {
            client_index,
            hook: AccessHook::FilterSubscribeEvent,
            object_index,
            event: Some(event),
        }
    }
}

/// Completion continuation for deferred decisions.
///
/// Invoked exactly once, with the saved request and the final grant, iff
/// the check returned [`Decision::Defer`](crate::Decision::Defer) and the
/// client is still linked when the arbitration resolves. Dropped uninvoked
/// on every other path.
pub type AsyncFinish = Box<dyn FnOnce(&AccessRequest, bool) + Send + 'static>;

/// Resolution of stream objects against the host's registries.
///
/// Returns the index of the client owning the stream, or `None` when the
/// stream does not exist or carries no client backreference (server-owned
/// streams); ownership checks treat `None` as owned by nobody.
pub trait HostObjects: Send + Sync {
    fn sink_input_owner(&self, object_index: u32) -> Option<u32>;
    fn source_output_owner(&self, object_index: u32) -> Option<u32>;
}

/// In-memory stream-to-owner table.
#[derive(Debug, Default)]
pub struct ObjectTable {
    sink_inputs: Mutex<HashMap<u32, Option<u32>>>,
    source_outputs: Mutex<HashMap<u32, Option<u32>>>,
}

impl ObjectTable {
    #[must_use]
    pub fn new() -> ObjectTable {
        ObjectTable::default()
    }

    /// Register a sink input; `owner` is `None` for server-owned streams.
    pub fn put_sink_input(&self, object_index: u32, owner: Option<u32>) {
        self.sink_inputs.lock().unwrap().insert(object_index, owner);
    }

    /// Register a source output; `owner` is `None` for server-owned streams.
    pub fn put_source_output(&self, object_index: u32, owner: Option<u32>) {
        self.source_outputs.lock().unwrap().insert(object_index, owner);
    }

    pub fn remove_sink_input(&self, object_index: u32) {
        self.sink_inputs.lock().unwrap().remove(&object_index);
    }

    pub fn remove_source_output(&self, object_index: u32) {
        self.source_outputs.lock().unwrap().remove(&object_index);
    }
}

impl HostObjects for ObjectTable {
    fn sink_input_owner(&self, object_index: u32) -> Option<u32> {
        self.sink_inputs.lock().unwrap().get(&object_index).copied().flatten()
    }

    fn source_output_owner(&self, object_index: u32) -> Option<u32> {
        self.source_outputs.lock().unwrap().get(&object_index).copied().flatten()
    }
}

/// Client identity as reported by the host on lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Index in the host's client registry.
    pub index: u32,
    /// Process id, present only when the host validated peer credentials.
    pub pid: Option<u32>,
    /// The client's property list; logged for diagnostics, never used for
    /// policy selection.
    pub proplist: HashMap<String, String>,
}

impl ClientInfo {
    #[must_use]
    pub fn new(index: u32) -> ClientInfo {
        ClientInfo { index, ..ClientInfo::default() }
    }

    /// Attach a trusted pid.
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attach one property.
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.proplist.insert(key.into(), value.into());
        self
    }
}
