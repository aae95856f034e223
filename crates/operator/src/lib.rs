//! Console operator: drives the live cluster toward the one `Console` record.
//!
//! A pass re-reads the record, branches on its management state and, when
//! managed, applies every owned object in dependency order (service, route,
//! config, OAuth pairing, workload), then projects the outcome into status.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};

use console_core::{names, Console, OAuthClient, ObjectStore, Route};
use console_queue::ExponentialBackoff;

mod controller;
pub mod rollout;
pub mod status;
pub mod sync;

pub use controller::Controller;
pub use sync::{recipes, select_recipe, sync_managed, Recipe, Step, SyncOutcome};

/// Everything a pass needs besides the stores. Built once by the entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    pub namespace: String,
    pub image: String,
    pub resync: Duration,
    pub backoff: ExponentialBackoff,
    /// Failed passes retried with backoff before the key is dropped.
    pub max_retries: u32,
    pub queue_cap: usize,
    /// `None` skips waiting for watchers before the first pass.
    pub wait_synced: Option<Duration>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: names::TARGET_NAMESPACE.to_string(),
            image: "quay.io/openshift/origin-console:latest".to_string(),
            resync: Duration::from_secs(600),
            backoff: ExponentialBackoff::default(),
            max_retries: 15,
            queue_cap: 1024,
            wait_synced: Some(Duration::from_secs(30)),
        }
    }
}

/// One store per kind the operator reads or writes.
#[derive(Clone)]
pub struct Stores {
    pub console: Arc<dyn ObjectStore<Console>>,
    pub service: Arc<dyn ObjectStore<Service>>,
    pub route: Arc<dyn ObjectStore<Route>>,
    pub config_map: Arc<dyn ObjectStore<ConfigMap>>,
    pub secret: Arc<dyn ObjectStore<Secret>>,
    pub oauth_client: Arc<dyn ObjectStore<OAuthClient>>,
    pub deployment: Arc<dyn ObjectStore<Deployment>>,
}

#[derive(Clone)]
pub struct OperatorContext {
    pub config: OperatorConfig,
    pub stores: Stores,
}

impl OperatorContext {
    pub fn new(config: OperatorConfig, stores: Stores) -> Self {
        Self { config, stores }
    }
}
