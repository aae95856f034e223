use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use console_core::{ObjectStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

#[derive(Debug)]
struct Injected {
    err: StoreError,
    once: bool,
}

struct State<K> {
    objects: BTreeMap<String, K>,
    failures: BTreeMap<StoreOp, Injected>,
    writes: BTreeMap<StoreOp, usize>,
    next_rv: u64,
}

/// Simple in-memory store for tests. Assigns uid / resourceVersion like a
/// server would, rejects stale resourceVersions, and lets tests inject
/// per-operation failures.
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                failures: BTreeMap::new(),
                writes: BTreeMap::new(),
                next_rv: 1,
            }),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object directly, bypassing write counters and failure injection.
    pub fn insert(&self, mut obj: K) {
        let mut st = self.lock();
        let rv = st.bump();
        let meta = obj.meta_mut();
        meta.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(rv);
        meta.generation.get_or_insert(1);
        st.objects.insert(obj.name_any(), obj);
    }

    /// Make every call of `op` fail with `err` until cleared.
    pub fn fail(&self, op: StoreOp, err: StoreError) {
        self.lock().failures.insert(op, Injected { err, once: false });
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_once(&self, op: StoreOp, err: StoreError) {
        self.lock().failures.insert(op, Injected { err, once: true });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Successful calls of `op` so far.
    pub fn writes(&self, op: StoreOp) -> usize {
        self.lock().writes.get(&op).copied().unwrap_or(0)
    }

    /// Total successful mutating calls.
    pub fn total_writes(&self) -> usize {
        let st = self.lock();
        st.writes.iter().filter(|(op, _)| **op != StoreOp::Get).map(|(_, n)| n).sum()
    }

    pub fn snapshot(&self, name: &str) -> Option<K> {
        self.lock().objects.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> State<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    fn bump(&mut self) -> String {
        let rv = self.next_rv;
        self.next_rv += 1;
        rv.to_string()
    }

    fn check(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.failures.get(&op) {
            None => Ok(()),
            Some(inj) if inj.once => {
                let err = inj.err.clone();
                self.failures.remove(&op);
                Err(err)
            }
            Some(inj) => Err(inj.err.clone()),
        }
    }

    fn record(&mut self, op: StoreOp) {
        *self.writes.entry(op).or_insert(0) += 1;
    }

    fn not_found(name: &str) -> StoreError {
        StoreError::NotFound(format!("{} {:?} not found", K::kind(&()), name))
    }

    fn replace(&mut self, op: StoreOp, obj: &K) -> Result<K, StoreError> {
        self.check(op)?;
        let name = obj.name_any();
        let live = self.objects.get(&name).ok_or_else(|| Self::not_found(&name))?;
        let live_rv = live.meta().resource_version.clone();
        let live_gen = live.meta().generation;
        if let Some(rv) = obj.meta().resource_version.as_deref() {
            if live_rv.as_deref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "{} {:?}: resourceVersion {} is stale",
                    K::kind(&()),
                    name,
                    rv
                )));
            }
        }
        let mut next = obj.clone();
        let rv = self.bump();
        let meta = next.meta_mut();
        meta.resource_version = Some(rv);
        meta.generation = Some(live_gen.unwrap_or(1) + i64::from(op == StoreOp::Update));
        self.objects.insert(name, next.clone());
        self.record(op);
        Ok(next)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<K, StoreError> {
        let mut st = self.lock();
        st.check(StoreOp::Get)?;
        st.record(StoreOp::Get);
        st.objects.get(name).cloned().ok_or_else(|| State::<K>::not_found(name))
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let mut st = self.lock();
        st.check(StoreOp::Create)?;
        let name = obj.name_any();
        if st.objects.contains_key(&name) {
            return Err(StoreError::Conflict(format!("{} {:?} already exists", K::kind(&()), name)));
        }
        let mut created = obj.clone();
        let rv = st.bump();
        let meta = created.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(rv);
        meta.generation = Some(1);
        st.objects.insert(name, created.clone());
        st.record(StoreOp::Create);
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        self.lock().replace(StoreOp::Update, obj)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        self.lock().replace(StoreOp::UpdateStatus, obj)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut st = self.lock();
        st.check(StoreOp::Delete)?;
        match st.objects.remove(name) {
            Some(_) => {
                st.record(StoreOp::Delete);
                Ok(())
            }
            None => Err(State::<K>::not_found(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret { metadata: ObjectMeta { name: Some(name.into()), ..Default::default() }, ..Default::default() }
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::<Secret>::new();
        let created = store.create(&secret("s")).await.unwrap();
        let first = store.update(&created).await.unwrap();
        assert_ne!(first.metadata.resource_version, created.metadata.resource_version);
        let err = store.update(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "err={err:?}");
    }

    #[tokio::test]
    async fn fail_once_applies_to_a_single_call() {
        let store = MemoryStore::<Secret>::new();
        store.fail_once(StoreOp::Create, StoreError::Transport("boom".into()));
        assert!(store.create(&secret("s")).await.is_err());
        assert!(store.create(&secret("s")).await.is_ok());
        assert_eq!(store.writes(StoreOp::Create), 1);
    }

    #[tokio::test]
    async fn delete_of_missing_object_is_not_found() {
        let store = MemoryStore::<Secret>::new();
        let err = store.delete("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_opt("nope").await.unwrap().is_none());
    }
}
