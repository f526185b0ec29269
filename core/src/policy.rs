use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use unitary_proto::{CollectionId, EntityId, Operation, Record};

/// Denial raised by the authorization gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessDenied {
    /// Raised before any record of the group was written
    #[error("cannot {operation} records of {collection}")]
    Write { collection: CollectionId, operation: Operation, ids: Vec<EntityId> },

    #[error("cannot read records of {0}")]
    Read(CollectionId),
}

impl AccessDenied {
    pub fn collection(&self) -> Option<&CollectionId> {
        match self {
            AccessDenied::Write { collection, .. } => Some(collection),
            AccessDenied::Read(collection) => Some(collection),
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            AccessDenied::Write { operation, .. } => Some(*operation),
            AccessDenied::Read(_) => None,
        }
    }

    pub fn ids(&self) -> &[EntityId] {
        match self {
            AccessDenied::Write { ids, .. } => ids,
            AccessDenied::Read(_) => &[],
        }
    }
}

/// The acting principal, as seen by a policy agent.
pub trait ContextData: Clone + Send + Sync + 'static {}

/// Answers whether the bound principal may perform `operation` on `collection`.
///
/// Pure read of the permission model. The flush coordinator calls it once per
/// (collection, operation) pair with pending work, immediately before deciding to write.
pub trait AuthorizationGate: Send + Sync {
    fn check_permission(&self, collection: &CollectionId, operation: Operation) -> bool;
}

/// PolicyAgents decide what a principal may read and write.
pub trait PolicyAgent: Clone + Send + Sync + 'static {
    /// The context type for all requests. Typically a user or service account.
    type ContextData: ContextData;

    /// Check if a context can create, update or delete records of a collection
    fn can_write(&self, cdata: &Self::ContextData, collection: &CollectionId, operation: Operation) -> bool;

    /// Check if a context can read a collection at all
    fn can_read(&self, cdata: &Self::ContextData, collection: &CollectionId) -> bool;

    /// Row-level read filter. Records failing it are silently left out of selections.
    fn check_read_record(&self, _cdata: &Self::ContextData, _record: &Record) -> bool { true }
}

/// A policy agent bound to one principal.
pub struct Authorizer<'a, PA: PolicyAgent> {
    agent: &'a PA,
    cdata: &'a PA::ContextData,
}

impl<'a, PA: PolicyAgent> Authorizer<'a, PA> {
    pub fn new(agent: &'a PA, cdata: &'a PA::ContextData) -> Self { Self { agent, cdata } }
}

impl<PA: PolicyAgent> AuthorizationGate for Authorizer<'_, PA> {
    fn check_permission(&self, collection: &CollectionId, operation: Operation) -> bool {
        let allowed = self.agent.can_write(self.cdata, collection, operation);
        debug!("check_permission {operation} {collection}: {allowed}");
        allowed
    }
}

/// A policy agent that allows all operations
#[derive(Clone)]
pub struct PermissiveAgent {}

impl Default for PermissiveAgent {
    fn default() -> Self { Self::new() }
}

impl PermissiveAgent {
    pub fn new() -> Self { Self {} }
}

impl PolicyAgent for PermissiveAgent {
    type ContextData = &'static DefaultContext;

    fn can_write(&self, _cdata: &Self::ContextData, collection: &CollectionId, operation: Operation) -> bool {
        debug!("PermissiveAgent can_write: {operation} {collection}");
        true
    }

    fn can_read(&self, _cdata: &Self::ContextData, collection: &CollectionId) -> bool {
        debug!("PermissiveAgent can_read: {collection}");
        true
    }
}

/// A default context that is used when no principal is needed
pub struct DefaultContext {}
pub static DEFAULT_CONTEXT: &DefaultContext = &DefaultContext {};

impl Default for DefaultContext {
    fn default() -> Self { Self::new() }
}

impl DefaultContext {
    pub fn new() -> Self { Self {} }
}

impl ContextData for &'static DefaultContext {}

/// A named principal holding one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub role: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self { Self { name: name.into(), role: role.into() } }
}

impl ContextData for Principal {}

/// One entry of a role's grant list, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Collection name, or `*` for every collection
    pub collection: String,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default = "default_read")]
    pub read: bool,
}

fn default_read() -> bool { true }

const ANY_COLLECTION: &str = "*";

#[derive(Debug, Default)]
struct RoleGrants {
    read: BTreeSet<String>,
    write: BTreeMap<String, BTreeSet<Operation>>,
}

/// Role-based policy agent driven by a static grant table.
///
/// Anything not granted is denied, including principals whose role is unknown.
#[derive(Debug, Clone, Default)]
pub struct GrantPolicyAgent {
    roles: std::sync::Arc<BTreeMap<String, RoleGrants>>,
}

impl GrantPolicyAgent {
    pub fn from_grants(grants: &BTreeMap<String, Vec<Grant>>) -> Self {
        let mut roles = BTreeMap::new();
        for (role, entries) in grants {
            let role_grants: &mut RoleGrants = roles.entry(role.clone()).or_default();
            for grant in entries {
                if grant.read {
                    role_grants.read.insert(grant.collection.clone());
                }
                role_grants.write.entry(grant.collection.clone()).or_default().extend(grant.operations.iter().copied());
            }
        }
        Self { roles: std::sync::Arc::new(roles) }
    }

    fn grants(&self, role: &str) -> Option<&RoleGrants> { self.roles.get(role) }
}

impl PolicyAgent for GrantPolicyAgent {
    type ContextData = Principal;

    fn can_write(&self, cdata: &Principal, collection: &CollectionId, operation: Operation) -> bool {
        let Some(grants) = self.grants(&cdata.role) else {
            debug!("GrantPolicyAgent: unknown role {} for {}", cdata.role, cdata.name);
            return false;
        };
        [collection.as_str(), ANY_COLLECTION].iter().any(|name| grants.write.get(*name).is_some_and(|ops| ops.contains(&operation)))
    }

    fn can_read(&self, cdata: &Principal, collection: &CollectionId) -> bool {
        self.grants(&cdata.role).is_some_and(|grants| grants.read.contains(collection.as_str()) || grants.read.contains(ANY_COLLECTION))
    }
}
