use std::time::Duration;

use console_core::WatchEvent;
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::WorkQueue;

/// Feed `key` into `queue` for every watch event and on every resync tick
/// (the first tick fires immediately). Exits when the event channel closes or
/// `shutdown` flips to true, then shuts the queue down.
pub fn spawn_dispatcher<K>(
    queue: WorkQueue<K>,
    key: K,
    mut rx: mpsc::Receiver<WatchEvent>,
    resync: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(resync);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(ev) => {
                            counter!("watch_events_total", 1u64, "kind" => ev.kind.as_str());
                            debug!(kind = %ev.kind, action = ?ev.action, name = ?ev.name, "watch event");
                            queue.add(key.clone());
                        }
                        None => {
                            debug!("watch channel closed; exiting dispatcher");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    debug!("resync tick");
                    queue.add(key.clone());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        queue.shut_down();
        info!("dispatcher stopped");
    })
}
