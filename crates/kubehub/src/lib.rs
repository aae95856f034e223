//! Console kubehub: client construction, typed stores over `kube::Api`, and
//! list+watch wiring for every kind the operator observes.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::Client;
use tracing::info;

mod store;
mod watch;

pub use store::{map_kube_error, KubeStore};
pub use watch::{spawn_watchers, wait_synced, SyncedSignal};

/// Build a client from the ambient kubeconfig or in-cluster environment.
pub async fn client() -> Result<Client> {
    let client = Client::try_default().await.context("building kube client")?;
    info!(namespace = %client.default_namespace(), "kube client ready");
    Ok(client)
}
