//! Per-client broker state.

use crate::hooks::{AccessHook, Facility};
use crate::host::{AccessRequest, AsyncFinish};
use crate::policy::PolicyId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::task::JoinHandle;

/// State of one hook's portal arbitration cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheState {
    /// No arbitration has completed for this hook.
    #[default]
    Unchecked,
    /// The portal granted the last arbitration.
    Granted,
    /// The portal denied the last arbitration.
    Denied,
}

/// Objects a client has been told exist, as `(facility, object_index)`
/// pairs.
///
/// The event filter inserts a pair when a NEW or CHANGE event passed its
/// visibility check and removes it again when the matching REMOVE is
/// delivered, keeping the client's view causally consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    entries: HashSet<(Facility, u32)>,
}

impl SeenSet {
    #[must_use]
    pub fn new() -> SeenSet {
        SeenSet::default()
    }

    /// Record a pair; returns `false` when it was already present.
    pub fn insert(&mut self, facility: Facility, object_index: u32) -> bool {
        self.entries.insert((facility, object_index))
    }

    #[must_use]
    pub fn contains(&self, facility: Facility, object_index: u32) -> bool {
        self.entries.contains(&(facility, object_index))
    }

    /// Forget a pair; returns `false` when it was never observed.
    pub fn remove(&mut self, facility: Facility, object_index: u32) -> bool {
        self.entries.remove(&(facility, object_index))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An in-flight portal arbitration. At most one exists per client; the
/// reply-wait task doubles as the forced-finalization timer and is aborted
/// when the entry goes away, repudiating the continuation.
pub(crate) struct PendingCheck {
    pub(crate) request: AccessRequest,
    pub(crate) finish: AsyncFinish,
    pub(crate) task: Option<JoinHandle<()>>,
}

impl PendingCheck {
    pub(crate) fn abandon(self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for PendingCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCheck")
            .field("request", &self.request)
            .field("task", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

/// Broker-side record for one linked client.
#[derive(Debug)]
pub(crate) struct ClientEntry {
    pub(crate) policy: PolicyId,
    pub(crate) pid: Option<u32>,
    pub(crate) seen: SeenSet,
    pub(crate) cached: [CacheState; AccessHook::COUNT],
    pub(crate) pending: Option<PendingCheck>,
}

impl ClientEntry {
    pub(crate) fn new(policy: PolicyId, pid: Option<u32>) -> ClientEntry {
        ClientEntry {
            policy,
            pid,
            seen: SeenSet::new(),
            cached: [CacheState::Unchecked; AccessHook::COUNT],
            pending: None,
        }
    }

    pub(crate) fn cache(&self, hook: AccessHook) -> CacheState {
        self.cached[hook.index()]
    }

    pub(crate) fn set_cache(&mut self, hook: AccessHook, state: CacheState) {
        self.cached[hook.index()] = state;
    }
}
