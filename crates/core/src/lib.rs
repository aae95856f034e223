//! Console operator core types: identities, watch vocabulary, storage seam and errors.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod resources;

pub use resources::{
    Console, ConsoleSpec, ConsoleStatus, OAuthClient, Route, RoutePort, RouteSpec, RouteStatus,
    RouteTargetReference, TlsConfig,
};

/// Well-known object identities. Everything the operator owns is derived from these.
pub mod names {
    /// Namespace holding the desired-state record and every namespaced managed object.
    pub const TARGET_NAMESPACE: &str = "openshift-console";
    /// Name of the singleton desired-state record.
    pub const RESOURCE_NAME: &str = "console";
    /// Shared `app` label value and name of the cluster-scoped OAuth client.
    pub const CONSOLE_APP_NAME: &str = "openshift-console";
    pub const SERVICE_NAME: &str = "console";
    pub const ROUTE_NAME: &str = "console";
    pub const DEPLOYMENT_NAME: &str = "console";
    pub const CONFIG_MAP_NAME: &str = "console-config";
    pub const OAUTH_SECRET_NAME: &str = "console-oauth-config";
    pub const SERVING_CERT_SECRET_NAME: &str = "console-serving-cert";
    pub const OAUTH_CLIENT_NAME: &str = CONSOLE_APP_NAME;
    /// Version seeded into the default desired-state record.
    pub const DEFAULT_VERSION: &str = "4.0.0";

    /// Deployment annotation carrying a digest of the owned spec; equal digests skip the spec copy.
    pub const SPEC_HASH_ANNOTATION: &str = "operator.openshift.io/spec-hash";
    /// Pod-template annotation whose change rolls the workload.
    pub const ROLLOUT_MARKER_ANNOTATION: &str = "console.openshift.io/rollout-marker";
}

/// The one and only work-queue token. Being a unit type, there is exactly one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WorkKey;

impl WorkKey {
    pub const NAME: &'static str = "console-operator-queue-key";
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

/// Every kind the operator watches. A change to any of them forces a full resync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ObservedKind {
    Console,
    Secret,
    Deployment,
    ConfigMap,
    Service,
    Route,
    OAuthClient,
}

impl ObservedKind {
    pub const ALL: [ObservedKind; 7] = [
        ObservedKind::Console,
        ObservedKind::Secret,
        ObservedKind::Deployment,
        ObservedKind::ConfigMap,
        ObservedKind::Service,
        ObservedKind::Route,
        ObservedKind::OAuthClient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservedKind::Console => "Console",
            ObservedKind::Secret => "Secret",
            ObservedKind::Deployment => "Deployment",
            ObservedKind::ConfigMap => "ConfigMap",
            ObservedKind::Service => "Service",
            ObservedKind::Route => "Route",
            ObservedKind::OAuthClient => "OAuthClient",
        }
    }
}

impl fmt::Display for ObservedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventAction {
    Applied,
    Deleted,
    /// Watch (re)listed; carries no single object.
    Restarted,
}

/// A change notification from the watch subsystem. Payload-free on purpose:
/// the worker always re-reads live state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ObservedKind,
    pub action: EventAction,
    pub name: Option<String>,
}

/// Lifecycle mode of the desired-state record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManagementState {
    Managed,
    Unmanaged,
    Removed,
}

impl ManagementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagementState::Managed => "Managed",
            ManagementState::Unmanaged => "Unmanaged",
            ManagementState::Removed => "Removed",
        }
    }
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManagementState {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Managed" => Ok(ManagementState::Managed),
            "Unmanaged" => Ok(ManagementState::Unmanaged),
            "Removed" => Ok(ManagementState::Removed),
            other => Err(ReconcileError::ConfigurationInvalid(format!("unknown state: {:?}", other))),
        }
    }
}

// ----------------- Storage seam -----------------

/// Errors from the typed storage collaborator. `NotFound` is kept distinct from
/// everything else because it drives create-vs-update and removal idempotence.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Capability set for one object kind: get, create, update, delete by identity.
///
/// Implemented over `kube::Api` for live clusters and in memory for tests.
#[async_trait::async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<K, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Write the status block. Kinds without a status subresource just update.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        self.update(obj).await
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Fetch, mapping not-found to `None`.
    async fn get_opt(&self, name: &str) -> Result<Option<K>, StoreError> {
        match self.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ----------------- Reconcile errors -----------------

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// Absent dependency, expected while converging. Filtered out of aggregates.
    #[error("not found: {0}")]
    NotFoundTransient(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
    #[error("{} managed object(s) failed to apply: {}", .0.len(), join_errors(.0))]
    PartialApplyFailure(Vec<ReconcileError>),
}

fn join_errors(errs: &[ReconcileError]) -> String {
    errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

impl ReconcileError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFoundTransient(_))
    }

    pub fn is_configuration_invalid(&self) -> bool {
        matches!(self, ReconcileError::ConfigurationInvalid(_))
    }

    /// Merge a pass's collected errors into one value, dropping not-found.
    /// Nested aggregates are flattened. Returns `None` when nothing remains.
    pub fn aggregate(errs: Vec<ReconcileError>) -> Option<ReconcileError> {
        let mut flat = Vec::with_capacity(errs.len());
        for e in errs {
            match e {
                ReconcileError::PartialApplyFailure(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        flat.retain(|e| !e.is_not_found());
        if flat.is_empty() {
            None
        } else {
            Some(ReconcileError::PartialApplyFailure(flat))
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => ReconcileError::NotFoundTransient(m),
            StoreError::Conflict(m) | StoreError::Transport(m) | StoreError::Serialization(m) => {
                ReconcileError::TransportFailure(m)
            }
        }
    }
}

pub mod prelude {
    pub use super::{
        names, EventAction, ManagementState, ObjectStore, ObservedKind, ReconcileError, StoreError,
        WatchEvent, WorkKey,
    };
    pub use super::resources::{Console, ConsoleSpec, ConsoleStatus, OAuthClient, Route};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn management_state_parses_known_values() {
        assert_eq!("Managed".parse::<ManagementState>().unwrap(), ManagementState::Managed);
        assert_eq!("Unmanaged".parse::<ManagementState>().unwrap(), ManagementState::Unmanaged);
        assert_eq!("Removed".parse::<ManagementState>().unwrap(), ManagementState::Removed);
    }

    #[test]
    fn unknown_management_state_is_configuration_invalid() {
        let err = "Bogus".parse::<ManagementState>().unwrap_err();
        assert!(err.is_configuration_invalid(), "err={}", err);
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn store_not_found_maps_to_transient() {
        let e: ReconcileError = StoreError::NotFound("secrets \"x\"".into()).into();
        assert!(e.is_not_found());
        let e: ReconcileError = StoreError::Transport("connection refused".into()).into();
        assert!(matches!(e, ReconcileError::TransportFailure(_)));
    }

    #[test]
    fn aggregate_filters_not_found_and_flattens() {
        assert_eq!(ReconcileError::aggregate(vec![]), None);
        assert_eq!(
            ReconcileError::aggregate(vec![ReconcileError::NotFoundTransient("route".into())]),
            None
        );
        let agg = ReconcileError::aggregate(vec![
            ReconcileError::NotFoundTransient("route".into()),
            ReconcileError::TransportFailure("svc".into()),
            ReconcileError::PartialApplyFailure(vec![
                ReconcileError::TransportFailure("cm".into()),
                ReconcileError::NotFoundTransient("secret".into()),
            ]),
        ])
        .unwrap();
        match agg {
            ReconcileError::PartialApplyFailure(inner) => {
                assert_eq!(inner.len(), 2);
                assert!(inner.iter().all(|e| !e.is_not_found()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn work_key_renders_constant_name() {
        assert_eq!(WorkKey.to_string(), "console-operator-queue-key");
        assert_eq!(WorkKey, WorkKey::default());
    }
}
