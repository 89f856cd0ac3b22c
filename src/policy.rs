//! Rules, policies, and the policy table.
//!
//! Semantics
//! - A [`Rule`] is a pure disposition attached to one hook: allow, deny,
//!   owner-check, or portal-check. Rules are data, not closures, so they
//!   log, compare, and serialize trivially.
//! - An [`AccessPolicy`] is an immutable rule table with one slot per
//!   [`AccessHook`]. The builder fills every slot from a default
//!   [`Disposition`] and lets callers overwrite individual slots before
//!   freezing the table.
//! - A [`PolicyTable`] hands out stable [`PolicyId`] handles from a
//!   monotonically allocated id space. Handles are never reused, so a stale
//!   handle can only miss, never alias a different policy.

use crate::hooks::AccessHook;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The operation may proceed.
    Allow,
    /// The operation is refused.
    Block,
    /// The decision is deferred; the completion continuation supplied with
    /// the request will deliver the final answer.
    Defer,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Disposition of one hook under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    /// Always allow.
    Allow,
    /// Always deny.
    Deny,
    /// Allow only when the acting client owns the target object.
    OwnerCheck,
    /// Defer to the out-of-process portal.
    PortalCheck,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Default fill for a fresh policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    AllowAll,
    DenyAll,
}

impl Disposition {
    fn rule(self) -> Rule {
        match self {
            Disposition::AllowAll => Rule::Allow,
            Disposition::DenyAll => Rule::Deny,
        }
    }
}

/// Immutable per-hook rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    rules: [Rule; AccessHook::COUNT],
}

impl AccessPolicy {
    /// Start building a policy with every slot set to the disposition's rule.
    #[must_use]
    pub fn builder(disposition: Disposition) -> PolicyBuilder {
        PolicyBuilder { rules: [disposition.rule(); AccessHook::COUNT] }
    }

    /// The rule selected for `hook`.
    #[must_use]
    #[inline]
    pub fn rule(&self, hook: AccessHook) -> Rule {
        self.rules[hook.index()]
    }

    /// The built-in policy for unconfined clients: introspection of global
    /// objects and playback are open, sample playback is open, record is
    /// not, and anything touching another client's objects requires
    /// ownership.
    #[must_use]
    pub fn builtin_default() -> AccessPolicy {
        AccessPolicy::builder(Disposition::DenyAll)
            .rules(SHARED_ALLOW_HOOKS, Rule::Allow)
            .rule(AccessHook::PlaySample, Rule::Allow)
            .rule(AccessHook::ConnectPlayback, Rule::Allow)
            .rules(OWNER_CHECKED_HOOKS, Rule::OwnerCheck)
            .build()
    }

    /// The built-in policy for confined clients: identical to
    /// [`builtin_default`](Self::builtin_default) except that playback,
    /// record, and sample playback are arbitrated by the portal.
    #[must_use]
    pub fn builtin_portal() -> AccessPolicy {
        AccessPolicy::builder(Disposition::DenyAll)
            .rules(SHARED_ALLOW_HOOKS, Rule::Allow)
            .rule(AccessHook::PlaySample, Rule::PortalCheck)
            .rule(AccessHook::ConnectPlayback, Rule::PortalCheck)
            .rule(AccessHook::ConnectRecord, Rule::PortalCheck)
            .rules(OWNER_CHECKED_HOOKS, Rule::OwnerCheck)
            .build()
    }
}

/// Hooks both built-in policies allow unconditionally.
pub const SHARED_ALLOW_HOOKS: &[AccessHook] = &[
    AccessHook::GetSinkInfo,
    AccessHook::GetSourceInfo,
    AccessHook::GetServerInfo,
    AccessHook::GetModuleInfo,
    AccessHook::GetCardInfo,
    AccessHook::Stat,
    AccessHook::GetSampleInfo,
];

/// Hooks both built-in policies gate on object ownership.
pub const OWNER_CHECKED_HOOKS: &[AccessHook] = &[
    AccessHook::GetClientInfo,
    AccessHook::KillClient,
    AccessHook::GetSinkInputInfo,
    AccessHook::MoveSinkInput,
    AccessHook::SetSinkInputVolume,
    AccessHook::SetSinkInputMute,
    AccessHook::KillSinkInput,
    AccessHook::GetSourceOutputInfo,
    AccessHook::MoveSourceOutput,
    AccessHook::SetSourceOutputVolume,
    AccessHook::SetSourceOutputMute,
    AccessHook::KillSourceOutput,
];

/// Builder for [`AccessPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    rules: [Rule; AccessHook::COUNT],
}

impl PolicyBuilder {
    /// Overwrite the rule for one hook.
    #[must_use]
    pub fn rule(mut self, hook: AccessHook, rule: Rule) -> Self {
        self.rules[hook.index()] = rule;
        self
    }

    /// Overwrite the rule for a batch of hooks.
    #[must_use]
    pub fn rules(mut self, hooks: &[AccessHook], rule: Rule) -> Self {
        for hook in hooks {
            self.rules[hook.index()] = rule;
        }
        self
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self) -> AccessPolicy {
        AccessPolicy { rules: self.rules }
    }
}

/// Stable handle to a registered policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId(u32);

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy#{}", self.0)
    }
}

/// Handle-allocating container of policies.
#[derive(Debug, Default)]
pub struct PolicyTable {
    next: u32,
    entries: HashMap<u32, AccessPolicy>,
}

impl PolicyTable {
    #[must_use]
    pub fn new() -> PolicyTable {
        PolicyTable::default()
    }

    /// Register a policy, returning its handle. Handles count up and are
    /// never reused within one table.
    pub fn insert(&mut self, policy: AccessPolicy) -> PolicyId {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, policy);
        PolicyId(id)
    }

    /// Look up a policy by handle.
    #[must_use]
    pub fn get(&self, id: PolicyId) -> Option<&AccessPolicy> {
        self.entries.get(&id.0)
    }

    /// Remove a policy by handle.
    pub fn remove(&mut self, id: PolicyId) -> Option<AccessPolicy> {
        self.entries.remove(&id.0)
    }

    /// Number of registered policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
