#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};

use console_apply::MemoryStore;
use console_core::{names, Console, OAuthClient, Route, WorkKey};
use console_operator::{Controller, OperatorConfig, OperatorContext, Stores};
use console_queue::{ExponentialBackoff, WorkQueue};

pub struct Harness {
    pub console: Arc<MemoryStore<Console>>,
    pub service: Arc<MemoryStore<Service>>,
    pub route: Arc<MemoryStore<Route>>,
    pub config_map: Arc<MemoryStore<ConfigMap>>,
    pub secret: Arc<MemoryStore<Secret>>,
    pub oauth_client: Arc<MemoryStore<OAuthClient>>,
    pub deployment: Arc<MemoryStore<Deployment>>,
    pub ctx: OperatorContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig {
            backoff: ExponentialBackoff { base: Duration::ZERO, max: Duration::ZERO },
            ..OperatorConfig::default()
        })
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let console = Arc::new(MemoryStore::new());
        let service = Arc::new(MemoryStore::new());
        let route = Arc::new(MemoryStore::new());
        let config_map = Arc::new(MemoryStore::new());
        let secret = Arc::new(MemoryStore::new());
        let oauth_client = Arc::new(MemoryStore::new());
        let deployment = Arc::new(MemoryStore::new());
        let stores = Stores {
            console: console.clone(),
            service: service.clone(),
            route: route.clone(),
            config_map: config_map.clone(),
            secret: secret.clone(),
            oauth_client: oauth_client.clone(),
            deployment: deployment.clone(),
        };
        Self {
            console,
            service,
            route,
            config_map,
            secret,
            oauth_client,
            deployment,
            ctx: OperatorContext::new(config, stores),
        }
    }

    pub fn controller(&self) -> Controller {
        Controller::new(self.ctx.clone(), WorkQueue::<WorkKey>::new(self.ctx.config.backoff)).expect("recipe table")
    }

    /// Harness with the default record already stored (and owning a uid).
    pub fn seeded() -> Self {
        let h = Self::new();
        h.console.insert(Console::default_instance());
        h
    }

    pub fn record(&self) -> Console {
        self.console.snapshot(names::RESOURCE_NAME).expect("console record")
    }

    pub fn set_spec(&self, mode: &str, version: &str) {
        let mut c = self.record();
        c.spec.management_state = mode.to_string();
        c.spec.version = version.to_string();
        self.console.insert(c);
    }

    /// Total writes across the namespaced objects other than the Secret.
    pub fn untouched_writes(&self) -> usize {
        self.service.total_writes()
            + self.route.total_writes()
            + self.config_map.total_writes()
            + self.deployment.total_writes()
    }
}
