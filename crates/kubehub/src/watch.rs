use std::fmt::Debug;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use console_core::{names, Console, EventAction, OAuthClient, ObservedKind, Route, WatchEvent};

/// Flips to true after a watcher's first complete list.
pub type SyncedSignal = watch::Receiver<bool>;

fn spawn_watcher<K>(
    api: Api<K>,
    kind: ObservedKind,
    cfg: watcher::Config,
    tx: mpsc::Sender<WatchEvent>,
) -> (JoinHandle<()>, SyncedSignal)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + 'static,
{
    let (synced_tx, synced_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let stream = watcher::watcher(api, cfg).default_backoff();
        futures::pin_mut!(stream);
        info!(kind = %kind, "watcher started");
        while let Some(item) = stream.next().await {
            let ev = match item {
                Ok(Event::Applied(o)) => WatchEvent { kind, action: EventAction::Applied, name: Some(o.name_any()) },
                Ok(Event::Deleted(o)) => WatchEvent { kind, action: EventAction::Deleted, name: Some(o.name_any()) },
                Ok(Event::Restarted(list)) => {
                    debug!(kind = %kind, count = list.len(), "watch restart");
                    synced_tx.send_replace(true);
                    WatchEvent { kind, action: EventAction::Restarted, name: None }
                }
                Err(e) => {
                    counter!("watch_errors", 1u64, "kind" => kind.as_str());
                    warn!(kind = %kind, error = %e, "watch error; backing off");
                    continue;
                }
            };
            if tx.send(ev).await.is_err() {
                debug!(kind = %kind, "event channel closed; stopping watcher");
                return;
            }
        }
        warn!(kind = %kind, "watcher stream ended");
    });
    (handle, synced_rx)
}

/// One watcher per observed kind. The desired-state record and the OAuth
/// client are narrowed to their one name; the rest to the shared app label.
pub fn spawn_watchers(
    client: Client,
    namespace: &str,
    tx: mpsc::Sender<WatchEvent>,
) -> Vec<(JoinHandle<()>, SyncedSignal)> {
    let by_label = || watcher::Config::default().labels(&format!("app={}", names::CONSOLE_APP_NAME));
    let by_name = |n: &str| watcher::Config::default().fields(&format!("metadata.name={}", n));

    ObservedKind::ALL
        .iter()
        .map(|kind| {
            let tx = tx.clone();
            let c = client.clone();
            match kind {
                ObservedKind::Console => {
                    spawn_watcher(Api::<Console>::namespaced(c, namespace), *kind, by_name(names::RESOURCE_NAME), tx)
                }
                ObservedKind::OAuthClient => {
                    spawn_watcher(Api::<OAuthClient>::all(c), *kind, by_name(names::OAUTH_CLIENT_NAME), tx)
                }
                ObservedKind::Secret => spawn_watcher(Api::<Secret>::namespaced(c, namespace), *kind, by_label(), tx),
                ObservedKind::Deployment => {
                    spawn_watcher(Api::<Deployment>::namespaced(c, namespace), *kind, by_label(), tx)
                }
                ObservedKind::ConfigMap => {
                    spawn_watcher(Api::<ConfigMap>::namespaced(c, namespace), *kind, by_label(), tx)
                }
                ObservedKind::Service => spawn_watcher(Api::<Service>::namespaced(c, namespace), *kind, by_label(), tx),
                ObservedKind::Route => spawn_watcher(Api::<Route>::namespaced(c, namespace), *kind, by_label(), tx),
            }
        })
        .collect()
}

/// Wait until every signal reports synced, or `timeout` passes. Returns
/// whether all synced in time.
pub async fn wait_synced(mut signals: Vec<SyncedSignal>, timeout: Duration) -> Result<bool> {
    let all = async {
        for s in signals.iter_mut() {
            s.wait_for(|v| *v).await?;
        }
        Ok::<_, watch::error::RecvError>(())
    };
    match tokio::time::timeout(timeout, all).await {
        Ok(res) => {
            res?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_synced_reports_timeout_and_success() {
        let (a_tx, a) = watch::channel(false);
        let (b_tx, b) = watch::channel(false);
        a_tx.send_replace(true);
        assert!(!wait_synced(vec![a.clone(), b.clone()], Duration::from_millis(20)).await.unwrap());
        b_tx.send_replace(true);
        assert!(wait_synced(vec![a, b], Duration::from_millis(20)).await.unwrap());
    }
}
