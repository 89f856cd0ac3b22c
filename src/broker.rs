//! The access broker: decision engine, event filter, portal arbiter, and
//! client lifecycle binding.
//!
//! Semantics
//! - The host dispatches every gated operation through [`AccessBroker::check`]
//!   and every client lifecycle transition through the `client_*` methods.
//! - `check` resolves most requests synchronously from the acting client's
//!   policy. Portal-arbitrated requests return [`Decision::Defer`]; the host
//!   must then wait for the completion continuation it supplied, which fires
//!   exactly once unless the client unlinks first.
//! - Subscription events are routed through an internal filter that keeps
//!   each client's view causally consistent: no CHANGE or REMOVE is ever
//!   passed for an object the client was not first shown via an allowed NEW
//!   or CHANGE.
//!
//! Invariants
//! - Unknown clients are refused everything (fail closed).
//! - At most one portal arbitration is in flight per client; overlapping
//!   portal-arbitrated requests are refused while one is pending.
//! - A portal verdict is cached per `(client, hook)` and answers later
//!   requests synchronously with no new bus traffic.
//! - Unlinking a client aborts its in-flight arbitration; the continuation
//!   is dropped, never invoked late.

use crate::client::{CacheState, ClientEntry, PendingCheck};
use crate::hooks::{AccessHook, EventKind, Facility};
use crate::host::{AccessRequest, AsyncFinish, ClientInfo, HostObjects};
use crate::policy::{AccessPolicy, Decision, PolicyId, PolicyTable, Rule};
use crate::portal::{DeviceTag, PortalBus, RequestHandle, RESPONSE_GRANTED};
use crate::sandbox::SandboxDetector;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the arbiter waits for a portal verdict before finalizing the
/// check on its own. Portal requests can sit behind a user dialog, so the
/// default is generous.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors returned when configuring a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The portal reply timeout must be greater than zero.
    #[error("portal reply timeout must be greater than zero")]
    ZeroReplyTimeout,
    /// A portal bus was supplied without the sandbox-aware flavor.
    #[error("a portal bus requires the sandbox-aware flavor")]
    PortalWithoutSandbox,
}

struct PortalConfig {
    policy: PolicyId,
    bus: Option<Arc<dyn PortalBus>>,
    detector: Arc<dyn SandboxDetector>,
    reply_timeout: Duration,
}

struct Shared {
    policies: PolicyTable,
    default_policy: PolicyId,
    portal: Option<PortalConfig>,
    objects: Arc<dyn HostObjects>,
    clients: Mutex<HashMap<u32, ClientEntry>>,
}

/// Outcome of the locked evaluation phase. Owner checks and portal calls
/// finish outside the client-table lock.
enum Staged {
    Done(Decision),
    Owner,
    Portal { pid: Option<u32>, bus: Arc<dyn PortalBus>, reply_timeout: Duration },
}

/// The broker. One instance guards one host server; the host owns it and
/// drops it at module teardown, which cancels any in-flight arbitration.
pub struct AccessBroker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AccessBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessBroker").finish_non_exhaustive()
    }
}

impl AccessBroker {
    /// Start configuring a broker over the given object registries.
    #[must_use]
    pub fn builder(objects: Arc<dyn HostObjects>) -> BrokerBuilder {
        BrokerBuilder {
            objects,
            detector: None,
            bus: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Decide one access request.
    ///
    /// Subscription events go through the event filter; everything else is
    /// resolved against the acting client's policy. `finish` is consumed
    /// only when the return is [`Decision::Defer`].
    pub async fn check(&self, request: &AccessRequest, finish: AsyncFinish) -> Decision {
        if request.hook == AccessHook::FilterSubscribeEvent {
            self.filter_event(request)
        } else {
            self.check_access(request, finish).await
        }
    }

    async fn check_access(&self, request: &AccessRequest, finish: AsyncFinish) -> Decision {
        match self.stage(request, Some(finish)) {
            Staged::Done(decision) => decision,
            Staged::Owner => self.rule_owner_check(request),
            Staged::Portal { pid, bus, reply_timeout } => {
                self.start_arbitration(request, pid, bus, reply_timeout).await
            }
        }
    }

    /// Locked evaluation phase: resolve the client, its policy, and the
    /// rule. Without a continuation (visibility probes) a portal rule can
    /// only answer from its cache.
    fn stage(&self, request: &AccessRequest, finish: Option<AsyncFinish>) -> Staged {
        let mut clients = self.shared.clients.lock().unwrap();
        let Some(entry) = clients.get_mut(&request.client_index) else {
            info!(
                hook = %request.hook,
                object = request.object_index,
                client = request.client_index,
                "blocked operation for unknown client"
            );
            return Staged::Done(Decision::Block);
        };
        let Some(policy) = self.shared.policies.get(entry.policy) else {
            warn!(client = request.client_index, policy = %entry.policy, "client bound to a dead policy handle");
            return Staged::Done(Decision::Block);
        };

        match policy.rule(request.hook) {
            Rule::Allow => {
                debug!(
                    hook = %request.hook,
                    object = request.object_index,
                    client = request.client_index,
                    "allow operation"
                );
                Staged::Done(Decision::Allow)
            }
            Rule::Deny => {
                info!(
                    hook = %request.hook,
                    object = request.object_index,
                    client = request.client_index,
                    "blocked operation"
                );
                Staged::Done(Decision::Block)
            }
            Rule::OwnerCheck => Staged::Owner,
            Rule::PortalCheck => self.stage_portal(entry, request, finish),
        }
    }

    fn stage_portal(
        &self,
        entry: &mut ClientEntry,
        request: &AccessRequest,
        finish: Option<AsyncFinish>,
    ) -> Staged {
        match entry.cache(request.hook) {
            CacheState::Granted => {
                debug!(hook = %request.hook, client = request.client_index, "cached portal answer: granted");
                return Staged::Done(Decision::Allow);
            }
            CacheState::Denied => {
                debug!(hook = %request.hook, client = request.client_index, "cached portal answer: denied");
                return Staged::Done(Decision::Block);
            }
            CacheState::Unchecked => {}
        }

        // Visibility probes cannot suspend; an unarbitrated hook blocks them.
        let Some(finish) = finish else {
            return Staged::Done(Decision::Block);
        };

        if entry.pending.is_some() {
            // The portal shows one dialog at a time; overlapping requests
            // from the same client are refused rather than queued.
            info!(
                hook = %request.hook,
                client = request.client_index,
                "blocked operation while a portal check is pending"
            );
            return Staged::Done(Decision::Block);
        }

        let Some(config) = &self.shared.portal else {
            warn!(hook = %request.hook, client = request.client_index, "portal rule without sandbox-aware flavor");
            return Staged::Done(Decision::Block);
        };
        let Some(bus) = config.bus.clone() else {
            info!(
                hook = %request.hook,
                client = request.client_index,
                "no portal transport, refusing"
            );
            return Staged::Done(Decision::Block);
        };

        entry.pending = Some(PendingCheck { request: *request, finish, task: None });
        Staged::Portal { pid: entry.pid, bus, reply_timeout: config.reply_timeout }
    }

    async fn start_arbitration(
        &self,
        request: &AccessRequest,
        pid: Option<u32>,
        bus: Arc<dyn PortalBus>,
        reply_timeout: Duration,
    ) -> Decision {
        let Some(devices) = DeviceTag::for_hook(request.hook) else {
            warn!(hook = %request.hook, "no portal device mapping for hook");
            self.clear_pending(request.client_index);
            return Decision::Block;
        };

        info!(
            hook = %request.hook,
            object = request.object_index,
            client = request.client_index,
            "asking portal for operation"
        );

        let handle = match bus.access_device(pid.unwrap_or(0), devices).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(client = request.client_index, %err, "failed to call portal");
                self.clear_pending(request.client_index);
                return Decision::Block;
            }
        };

        let task = tokio::spawn(await_verdict(
            self.shared.clone(),
            bus,
            handle,
            request.client_index,
            request.hook,
            reply_timeout,
        ));

        // Attach the reply task to the pending slot. The client may have
        // unlinked while the call was in flight.
        let mut clients = self.shared.clients.lock().unwrap();
        match clients.get_mut(&request.client_index).and_then(|entry| entry.pending.as_mut()) {
            Some(pending) => {
                pending.task = Some(task);
                Decision::Defer
            }
            None => {
                debug!(client = request.client_index, "client vanished during portal call");
                task.abort();
                Decision::Block
            }
        }
    }

    /// Drop a staged arbitration that never got off the ground. The
    /// continuation is dropped uninvoked; the answer is the synchronous
    /// refusal the caller returns.
    fn clear_pending(&self, client_index: u32) {
        let mut clients = self.shared.clients.lock().unwrap();
        if let Some(entry) = clients.get_mut(&client_index) {
            entry.pending.take();
        }
    }

    fn rule_owner_check(&self, request: &AccessRequest) -> Decision {
        use AccessHook::*;

        let owner = match request.hook {
            GetClientInfo | KillClient => Some(request.object_index),
            GetSinkInputInfo | MoveSinkInput | SetSinkInputVolume | SetSinkInputMute
            | KillSinkInput => self.shared.objects.sink_input_owner(request.object_index),
            GetSourceOutputInfo | MoveSourceOutput | SetSourceOutputVolume
            | SetSourceOutputMute | KillSourceOutput => {
                self.shared.objects.source_output_owner(request.object_index)
            }
            _ => None,
        };

        if owner == Some(request.client_index) {
            debug!(
                hook = %request.hook,
                object = request.object_index,
                client = request.client_index,
                "allow operation by owner"
            );
            Decision::Allow
        } else {
            info!(
                hook = %request.hook,
                object = request.object_index,
                client = request.client_index,
                owner = ?owner,
                "blocked operation on object owned by another client"
            );
            Decision::Block
        }
    }

    /// Gate one subscription event on the acting client's prior view.
    fn filter_event(&self, request: &AccessRequest) -> Decision {
        let Some(event) = request.event else {
            info!(client = request.client_index, "blocked subscription event without an event word");
            return Decision::Block;
        };
        let Some(facility) = event.facility() else {
            info!(
                %event,
                object = request.object_index,
                client = request.client_index,
                "blocked event with unknown facility"
            );
            return Decision::Block;
        };

        {
            let mut clients = self.shared.clients.lock().unwrap();
            let Some(entry) = clients.get_mut(&request.client_index) else {
                info!(
                    %event,
                    object = request.object_index,
                    client = request.client_index,
                    "blocked event for unknown client"
                );
                return Decision::Block;
            };

            match event.kind() {
                Some(EventKind::Remove) => {
                    // Only objects the client saw before can be forgotten.
                    return if entry.seen.remove(facility, request.object_index) {
                        debug!(%event, object = request.object_index, client = request.client_index, "pass event");
                        Decision::Allow
                    } else {
                        info!(%event, object = request.object_index, client = request.client_index, "blocked event");
                        Decision::Block
                    };
                }
                Some(EventKind::Change) if entry.seen.contains(facility, request.object_index) => {
                    debug!(%event, object = request.object_index, client = request.client_index, "pass event");
                    return Decision::Allow;
                }
                // First sight: fall through to the visibility probe.
                Some(EventKind::Change) | Some(EventKind::New) => {}
                None => {
                    info!(%event, object = request.object_index, client = request.client_index, "blocked malformed event");
                    return Decision::Block;
                }
            }
        }

        let probe = AccessRequest { hook: facility.info_hook(), ..*request };
        if self.probe_visibility(&probe) == Decision::Allow {
            let mut clients = self.shared.clients.lock().unwrap();
            if let Some(entry) = clients.get_mut(&request.client_index) {
                entry.seen.insert(facility, request.object_index);
                debug!(%event, object = request.object_index, client = request.client_index, "pass event");
                return Decision::Allow;
            }
        }

        info!(%event, object = request.object_index, client = request.client_index, "blocked event");
        Decision::Block
    }

    /// Re-enter the engine for a visibility check. Probes never start an
    /// arbitration: a deferred answer cannot pass the event that triggered
    /// it, so an unarbitrated portal hook reads as a refusal here.
    fn probe_visibility(&self, request: &AccessRequest) -> Decision {
        match self.stage(request, None) {
            Staged::Done(decision) => decision,
            Staged::Owner => self.rule_owner_check(request),
            Staged::Portal { .. } => Decision::Block,
        }
    }

    /// The client appeared; it may not be authenticated yet.
    pub fn client_put(&self, client: &ClientInfo) {
        let policy = self.select_policy(client);
        let mut clients = self.shared.clients.lock().unwrap();
        if let Some(previous) = clients.insert(client.index, ClientEntry::new(policy, client.pid)) {
            warn!(client = client.index, "replacing an existing client entry");
            if let Some(pending) = previous.pending {
                pending.abandon();
            }
        }
        info!(client = client.index, pid = ?client.pid, policy = %policy, "new client");
    }

    /// Credentials were finalized; a newly trusted pid may flip the client
    /// into or out of confinement.
    pub fn client_auth(&self, client: &ClientInfo) {
        self.reselect_policy(client, "auth");
    }

    /// The client's property list changed.
    pub fn client_proplist_changed(&self, client: &ClientInfo) {
        self.reselect_policy(client, "proplist change");
    }

    fn reselect_policy(&self, client: &ClientInfo, cause: &str) {
        let policy = self.select_policy(client);
        let mut clients = self.shared.clients.lock().unwrap();
        let Some(entry) = clients.get_mut(&client.index) else {
            return;
        };
        entry.policy = policy;
        entry.pid = client.pid;
        debug!(client = client.index, pid = ?client.pid, policy = %policy, cause, "reselected policy");
    }

    /// The client disconnected. Its view, cache, and any in-flight
    /// arbitration go with it; a late portal response is dropped without
    /// invoking the continuation.
    pub fn client_unlink(&self, client_index: u32) {
        let removed = self.shared.clients.lock().unwrap().remove(&client_index);
        if let Some(entry) = removed {
            if let Some(pending) = entry.pending {
                debug!(client = client_index, "abandoning pending portal check");
                pending.abandon();
            }
            info!(client = client_index, "removed client");
        }
    }

    fn select_policy(&self, client: &ClientInfo) -> PolicyId {
        if !client.proplist.is_empty() {
            debug!(
                client = client.index,
                proplist = %serde_json::to_string(&client.proplist).unwrap_or_default(),
                "client properties"
            );
        }

        if let Some(config) = &self.shared.portal {
            if let Some(pid) = client.pid {
                if config.detector.is_confined(pid) {
                    debug!(client = client.index, pid, "client is sandboxed, choosing portal policy");
                    return config.policy;
                }
                debug!(client = client.index, pid, "client not sandboxed, choosing default policy");
            } else {
                debug!(client = client.index, "no trusted pid, assuming not sandboxed");
            }
        }
        self.shared.default_policy
    }

    /// Handle of the built-in default policy.
    #[must_use]
    pub fn default_policy(&self) -> PolicyId {
        self.shared.default_policy
    }

    /// Handle of the built-in portal policy, present on the sandbox-aware
    /// flavor.
    #[must_use]
    pub fn portal_policy(&self) -> Option<PolicyId> {
        self.shared.portal.as_ref().map(|config| config.policy)
    }

    /// The policy a linked client is currently bound to.
    #[must_use]
    pub fn client_policy(&self, client_index: u32) -> Option<PolicyId> {
        self.shared.clients.lock().unwrap().get(&client_index).map(|entry| entry.policy)
    }

    /// Whether the client has been shown the given object.
    #[must_use]
    pub fn client_has_seen(&self, client_index: u32, facility: Facility, object_index: u32) -> bool {
        self.shared
            .clients
            .lock()
            .unwrap()
            .get(&client_index)
            .is_some_and(|entry| entry.seen.contains(facility, object_index))
    }

    /// The client's cached portal verdict for one hook.
    #[must_use]
    pub fn cached_state(&self, client_index: u32, hook: AccessHook) -> Option<CacheState> {
        self.shared.clients.lock().unwrap().get(&client_index).map(|entry| entry.cache(hook))
    }

    /// Whether a portal arbitration is in flight for the client.
    #[must_use]
    pub fn arbitration_pending(&self, client_index: u32) -> bool {
        self.shared
            .clients
            .lock()
            .unwrap()
            .get(&client_index)
            .is_some_and(|entry| entry.pending.is_some())
    }
}

impl Drop for AccessBroker {
    fn drop(&mut self) {
        let mut clients = match self.shared.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, entry) in clients.drain() {
            if let Some(pending) = entry.pending {
                pending.abandon();
            }
        }
    }
}

/// Wait out one portal arbitration and deliver the verdict.
///
/// The wait is bounded by the reply timeout, which force-finalizes a stuck
/// check as granted. Whatever the outcome, the pending slot is consumed
/// under the lock and the continuation runs outside it, so a host that
/// re-enters the broker from the continuation cannot deadlock. A client
/// that unlinked in the meantime has no slot left; the verdict is dropped.
async fn await_verdict(
    shared: Arc<Shared>,
    bus: Arc<dyn PortalBus>,
    handle: RequestHandle,
    client_index: u32,
    hook: AccessHook,
    reply_timeout: Duration,
) {
    let granted = match tokio::time::timeout(reply_timeout, bus.wait_response(&handle)).await {
        Ok(Ok(code)) => {
            debug!(client = client_index, hook = %hook, code, "portal responded");
            code == RESPONSE_GRANTED
        }
        Ok(Err(err)) => {
            warn!(client = client_index, hook = %hook, %err, "portal response unusable, treating as denied");
            false
        }
        Err(_) => {
            warn!(
                client = client_index,
                hook = %hook,
                timeout = ?reply_timeout,
                "portal check timed out, finalizing as granted"
            );
            true
        }
    };

    let finished = {
        let mut clients = shared.clients.lock().unwrap();
        let Some(entry) = clients.get_mut(&client_index) else {
            return;
        };
        let Some(pending) = entry.pending.take() else {
            return;
        };
        entry.set_cache(hook, if granted { CacheState::Granted } else { CacheState::Denied });
        pending
    };

    info!(
        hook = %finished.request.hook,
        object = finished.request.object_index,
        client = client_index,
        granted,
        "async check finished"
    );
    let PendingCheck { request, finish, .. } = finished;
    finish(&request, granted);
}

/// Builder for [`AccessBroker`].
///
/// The plain flavor applies static policy only. Adding
/// [`sandbox_aware`](Self::sandbox_aware) installs the portal policy for
/// confined clients; adding [`portal`](Self::portal) on top connects the
/// arbiter to a bus. A sandbox-aware broker without a bus still classifies
/// clients but refuses portal-arbitrated hooks, mirroring a failed bus
/// connection at load time.
pub struct BrokerBuilder {
    objects: Arc<dyn HostObjects>,
    detector: Option<Arc<dyn SandboxDetector>>,
    bus: Option<Arc<dyn PortalBus>>,
    reply_timeout: Duration,
}

impl BrokerBuilder {
    /// Classify clients with the given detector and install the portal
    /// policy for confined ones.
    #[must_use]
    pub fn sandbox_aware(mut self, detector: Arc<dyn SandboxDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Connect the arbiter to a portal bus.
    #[must_use]
    pub fn portal(mut self, bus: Arc<dyn PortalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Bound the wait for portal verdicts.
    #[must_use]
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Validate the configuration and build the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroReplyTimeout`] for a zero timeout and
    /// [`BuildError::PortalWithoutSandbox`] when a bus was supplied without
    /// a sandbox detector.
    pub fn build(self) -> Result<AccessBroker, BuildError> {
        if self.reply_timeout.is_zero() {
            return Err(BuildError::ZeroReplyTimeout);
        }
        if self.bus.is_some() && self.detector.is_none() {
            return Err(BuildError::PortalWithoutSandbox);
        }

        let mut policies = PolicyTable::new();
        let default_policy = policies.insert(AccessPolicy::builtin_default());
        let portal = self.detector.map(|detector| PortalConfig {
            policy: policies.insert(AccessPolicy::builtin_portal()),
            bus: self.bus,
            detector,
            reply_timeout: self.reply_timeout,
        });

        if let Some(config) = &portal {
            if config.bus.is_none() {
                info!("no portal bus available; portal-arbitrated hooks will be refused");
            }
        }

        Ok(AccessBroker {
            shared: Arc::new(Shared {
                policies,
                default_policy,
                portal,
                objects: self.objects,
                clients: Mutex::new(HashMap::new()),
            }),
        })
    }
}
