//! In-memory [`ClusterClient`] used by the sync and worker tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::error::ErrorResponse;
use kube::runtime::events::EventType;
use serde_json::Value;

use super::client::{ClusterClient, ScopedResource};
use crate::resources::kueues::{Kueue, KueueStatus};
use crate::Result;

type ObjectKey = (String, String, String);

#[derive(Default)]
struct Store {
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    creates: Vec<String>,
    updates: Vec<String>,
    status_writes: usize,
    events: Vec<(String, String)>,
    failing_kinds: BTreeSet<String>,
    delete_kueue_on_status_write: bool,
}

impl Store {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    store: Mutex<Store>,
}

fn api_error(code: u16, reason: &str, message: String) -> crate::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    })
    .into()
}

fn key_of<K: ScopedResource>(namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        K::kind(&()).to_string(),
        namespace.unwrap_or_default().to_owned(),
        name.to_owned(),
    )
}

fn label_of<K: ScopedResource>(name: &str) -> String {
    format!("{}/{}", K::kind(&()), name)
}

impl FakeCluster {
    /// Insert an object as if it had been created out of band
    pub fn seed<K: ScopedResource>(&self, obj: K) -> K {
        let mut store = self.store.lock().unwrap();
        let mut value = serde_json::to_value(&obj).unwrap();
        let name = obj.meta().name.clone().unwrap();
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let rv = store.next_resource_version();
        value["metadata"]["uid"] = Value::String(format!("uid-{name}"));
        value["metadata"]["resourceVersion"] = Value::String(rv);
        value["metadata"]["generation"] = Value::from(1);
        store.objects.insert(key, value.clone());
        serde_json::from_value(value).unwrap()
    }

    pub fn object<K: ScopedResource>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let store = self.store.lock().unwrap();
        store
            .objects
            .get(&key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Change an object out of band, bumping its generation when the spec changes
    pub fn modify<K: ScopedResource>(&self, namespace: Option<&str>, name: &str, f: impl FnOnce(&mut K)) {
        let mut store = self.store.lock().unwrap();
        let key = key_of::<K>(namespace, name);
        let live = store.objects.get(&key).cloned().unwrap();
        let mut obj: K = serde_json::from_value(live.clone()).unwrap();
        f(&mut obj);
        let mut value = serde_json::to_value(&obj).unwrap();
        value["metadata"]["resourceVersion"] = Value::String(store.next_resource_version());
        if value.get("spec") != live.get("spec") {
            let generation = live["metadata"]["generation"].as_i64().unwrap_or(0) + 1;
            value["metadata"]["generation"] = Value::from(generation);
        }
        store.objects.insert(key, value);
    }

    /// Make every create or replace of `kind` fail with a server error
    pub fn fail_writes(&self, kind: &str) {
        self.store.lock().unwrap().failing_kinds.insert(kind.into());
    }

    /// Delete the Kueue just before its status is next written, as a concurrent delete would
    pub fn delete_kueue_on_status_write(&self) {
        self.store.lock().unwrap().delete_kueue_on_status_write = true;
    }

    pub fn heal(&self) {
        self.store.lock().unwrap().failing_kinds.clear();
    }

    pub fn creates(&self) -> Vec<String> {
        self.store.lock().unwrap().creates.clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.store.lock().unwrap().updates.clone()
    }

    pub fn status_writes(&self) -> usize {
        self.store.lock().unwrap().status_writes
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.store.lock().unwrap().events.clone()
    }

    /// Forget recorded writes, keeping the stored objects
    pub fn reset_writes(&self) {
        let mut store = self.store.lock().unwrap();
        store.creates.clear();
        store.updates.clear();
        store.status_writes = 0;
        store.events.clear();
    }

    fn check_failure<K: ScopedResource>(store: &Store) -> Result<()> {
        if store.failing_kinds.contains(K::kind(&()).as_ref()) {
            return Err(api_error(
                500,
                "InternalError",
                format!("injected failure writing {}", K::kind(&())),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get<K: ScopedResource>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        Ok(self.object(namespace, name))
    }

    async fn create<K: ScopedResource>(&self, obj: &K) -> Result<K> {
        let mut store = self.store.lock().unwrap();
        Self::check_failure::<K>(&store)?;
        let name = obj.meta().name.clone().unwrap();
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        if store.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{name} already exists")));
        }
        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["uid"] = Value::String(format!("uid-{name}"));
        value["metadata"]["resourceVersion"] = Value::String(store.next_resource_version());
        value["metadata"]["generation"] = Value::from(1);
        store.objects.insert(key, value.clone());
        store.creates.push(label_of::<K>(&name));
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: ScopedResource>(&self, obj: &K) -> Result<K> {
        let mut store = self.store.lock().unwrap();
        Self::check_failure::<K>(&store)?;
        let name = obj.meta().name.clone().unwrap();
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let Some(live) = store.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{name} not found")));
        };
        if live["metadata"]["resourceVersion"].as_str() != obj.meta().resource_version.as_deref() {
            return Err(api_error(
                409,
                "Conflict",
                format!("the object {name} has been modified"),
            ));
        }
        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["uid"] = live["metadata"]["uid"].clone();
        value["metadata"]["resourceVersion"] = Value::String(store.next_resource_version());
        let generation = live["metadata"]["generation"].as_i64().unwrap_or(0);
        let generation = if value.get("spec") != live.get("spec") {
            generation + 1
        } else {
            generation
        };
        value["metadata"]["generation"] = Value::from(generation);
        if let Some(status) = live.get("status") {
            value["status"] = status.clone();
        }
        store.objects.insert(key, value.clone());
        store.updates.push(label_of::<K>(&name));
        Ok(serde_json::from_value(value)?)
    }

    async fn apply_kueue_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KueueStatus,
    ) -> Result<Kueue> {
        let mut store = self.store.lock().unwrap();
        let key = key_of::<Kueue>(Some(namespace), name);
        if std::mem::take(&mut store.delete_kueue_on_status_write) {
            store.objects.remove(&key);
        }
        let Some(mut value) = store.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{name} not found")));
        };
        value["status"] = serde_json::to_value(status)?;
        value["metadata"]["resourceVersion"] = Value::String(store.next_resource_version());
        store.objects.insert(key, value.clone());
        store.status_writes += 1;
        Ok(serde_json::from_value(value)?)
    }

    async fn publish_event(
        &self,
        _kueue: &Kueue,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let reason = match type_ {
            EventType::Normal => reason.to_owned(),
            EventType::Warning => format!("Warning/{reason}"),
        };
        store.events.push((reason, note));
        Ok(())
    }
}
