//! Console apply: idempotent get / create / merge-and-update for one managed object.

#![forbid(unsafe_code)]

use std::time::Instant;

use kube::{Resource, ResourceExt};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use console_core::{ObjectStore, StoreError};

mod memory;
mod merge;

pub use memory::{MemoryStore, StoreOp};
pub use merge::{ensure_object_meta, Mergeable};

/// Result of one apply: the object as it now exists and whether a write happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome<K> {
    pub object: K,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

/// Make the live object match `required`.
///
/// Absent: create it verbatim. Present: merge the owned fields over the live
/// object and issue a single update only if that changes anything. Applying
/// the same `required` twice performs no write the second time.
pub async fn apply<K, S>(store: &S, required: &K) -> Result<ApplyOutcome<K>, StoreError>
where
    S: ObjectStore<K> + ?Sized,
    K: Resource<DynamicType = ()> + Mergeable + Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    let kind = K::kind(&()).into_owned();
    let name = required.name_any();
    let t0 = Instant::now();
    counter!("apply_attempts", 1u64, "kind" => kind.clone());

    let res = apply_inner(store, required, &kind, &name).await;
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => kind.clone());
    match &res {
        Ok(out) => {
            counter!("apply_ok", 1u64, "kind" => kind.clone());
            debug!(kind = %kind, name = %name, changed = out.changed, "apply done");
        }
        Err(e) => {
            counter!("apply_err", 1u64, "kind" => kind.clone());
            debug!(kind = %kind, name = %name, error = %e, "apply failed");
        }
    }
    res
}

async fn apply_inner<K, S>(
    store: &S,
    required: &K,
    kind: &str,
    name: &str,
) -> Result<ApplyOutcome<K>, StoreError>
where
    S: ObjectStore<K> + ?Sized,
    K: Resource<DynamicType = ()> + Mergeable + Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    let existing = match store.get_opt(name).await? {
        Some(obj) => obj,
        None => {
            let created = store.create(required).await?;
            return Ok(ApplyOutcome { object: created, changed: true });
        }
    };

    let merged = K::merge(&existing, required);
    if merged == existing {
        return Ok(ApplyOutcome { object: existing, changed: false });
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        if let (Ok(a), Ok(b)) = (serde_json::to_value(&merged), serde_json::to_value(&existing)) {
            let s = diff_summary(&strip_noisy(a), &strip_noisy(b));
            debug!(kind = %kind, name = %name, adds = s.adds, updates = s.updates, removes = s.removes, "updating drifted object");
        }
    }
    let updated = store.update(&merged).await?;
    Ok(ApplyOutcome { object: updated, changed: true })
}

fn strip_noisy(mut v: Json) -> Json {
    if let Some(obj) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        obj.remove("managedFields");
        obj.remove("resourceVersion");
        obj.remove("generation");
        obj.remove("creationTimestamp");
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Count keys/elements added, changed and removed going from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        use serde_json::Value as V;
        match (a, b) {
            (V::Object(ao), V::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (V::Array(aa), V::Array(bb)) => {
                s.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
