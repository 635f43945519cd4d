use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde_json::Value;

use crate::resources::kueues::Kueue;
use crate::{Error, Result};

pub mod apply;
pub mod assets;
pub mod configmap;
pub mod services;
pub mod crds;
pub mod deployment;
pub mod rbac;
pub mod webhooks;

/// The owner reference every managed resource carries back to the Kueue
pub fn owner_reference(kueue: &Kueue) -> Result<OwnerReference> {
    Ok(OwnerReference {
        api_version: Kueue::api_version(&()).into_owned(),
        kind: Kueue::kind(&()).into_owned(),
        name: kueue.name_any(),
        uid: kueue.uid().ok_or(Error::MissingObjectKey("metadata.uid"))?,
        ..Default::default()
    })
}

/// Add `oref`, replacing any existing reference with the same uid
pub fn ensure_owner_ref(meta: &mut ObjectMeta, oref: &OwnerReference) -> bool {
    let orefs = meta.owner_references.get_or_insert_with(Vec::new);
    match orefs.iter_mut().find(|existing| existing.uid == oref.uid) {
        Some(existing) if existing == oref => false,
        Some(existing) => {
            *existing = oref.clone();
            true
        }
        None => {
            orefs.push(oref.clone());
            true
        }
    }
}

/// Stamp the Kueue's owner reference and, for namespaced kinds, its namespace
pub fn adopt<K: Resource>(obj: &mut K, kueue: &Kueue, namespaced: bool) -> Result<()> {
    let oref = owner_reference(kueue)?;
    let meta = obj.meta_mut();
    if namespaced {
        meta.namespace = kueue.namespace();
    }
    ensure_owner_ref(meta, &oref);
    Ok(())
}

/// Merge `required` into `existing`.
///
/// A key with a trailing `-` removes the key without the suffix, every other
/// key is set. Keys only present in `existing` are left alone.
pub fn merge_map(
    existing: &mut Option<BTreeMap<String, String>>,
    required: &BTreeMap<String, String>,
) -> bool {
    let mut modified = false;
    for (key, value) in required {
        if let Some(removed) = key.strip_suffix('-') {
            if let Some(map) = existing.as_mut() {
                modified |= map.remove(removed).is_some();
            }
            continue;
        }
        let map = existing.get_or_insert_with(BTreeMap::new);
        if map.get(key) != Some(value) {
            map.insert(key.clone(), value.clone());
            modified = true;
        }
    }
    modified
}

/// Fold the labels, annotations and owner references of `desired` into `live`
pub fn merge_object_meta(live: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut modified = false;
    if let Some(labels) = &desired.labels {
        modified |= merge_map(&mut live.labels, labels);
    }
    if let Some(annotations) = &desired.annotations {
        modified |= merge_map(&mut live.annotations, annotations);
    }
    for oref in desired.owner_references.iter().flatten() {
        modified |= ensure_owner_ref(live, oref);
    }
    modified
}

/// Whether every field `desired` sets is present in `live` with an equal value.
///
/// Arrays must have the same length and be element-wise subsets, so server
/// defaulted fields never count as a difference but removed entries do.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Null, _) => true,
        (Value::Object(desired), Value::Object(live)) => desired
            .iter()
            .all(|(key, value)| value.is_null() || live.get(key).is_some_and(|l| is_subset(value, l))),
        (Value::Array(desired), Value::Array(live)) => {
            desired.len() == live.len() && desired.iter().zip(live).all(|(d, l)| is_subset(d, l))
        }
        _ => desired == live,
    }
}

/// Versions of everything the controller manager depends on, keyed by resource.
///
/// Written into the deployment's pod template so that a change to any input
/// rolls the pods.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fingerprints(BTreeMap<String, String>);

impl Fingerprints {
    /// Record the `resourceVersion` of `obj`, `"0"` when it has none
    pub fn record<K: Resource>(&mut self, key: impl Into<String>, obj: &K) {
        let version = obj
            .meta()
            .resource_version
            .clone()
            .unwrap_or_else(|| "0".into());
        self.0.insert(key.into(), version);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;

    fn kueue() -> Kueue {
        let mut kueue = Kueue::new("cluster", Default::default());
        kueue.metadata.namespace = Some("kueue-system".into());
        kueue.metadata.uid = Some("1234".into());
        kueue
    }

    #[test]
    fn owner_reference_requires_uid() {
        let mut orphan = kueue();
        orphan.metadata.uid = None;
        assert!(matches!(
            owner_reference(&orphan),
            Err(Error::MissingObjectKey("metadata.uid"))
        ));

        let oref = owner_reference(&kueue()).unwrap();
        assert_eq!(oref.api_version, "operator.openshift.io/v1alpha1");
        assert_eq!(oref.kind, "Kueue");
        assert_eq!(oref.name, "cluster");
    }

    #[test]
    fn adopt_is_idempotent() {
        let mut cm = ConfigMap::default();
        adopt(&mut cm, &kueue(), true).unwrap();
        adopt(&mut cm, &kueue(), true).unwrap();
        assert_eq!(cm.metadata.owner_references.as_ref().unwrap().len(), 1);
        assert_eq!(cm.metadata.namespace.as_deref(), Some("kueue-system"));

        let mut renamed = kueue();
        renamed.metadata.name = Some("renamed".into());
        adopt(&mut cm, &renamed, true).unwrap();
        let orefs = cm.metadata.owner_references.unwrap();
        assert_eq!(orefs.len(), 1);
        assert_eq!(orefs[0].name, "renamed");
    }

    #[test]
    fn merge_map_removes_suffixed_keys() {
        let mut existing = Some(BTreeMap::from([
            ("keep".to_string(), "1".to_string()),
            ("drop".to_string(), "2".to_string()),
        ]));
        let required = BTreeMap::from([
            ("drop-".to_string(), String::new()),
            ("add".to_string(), "3".to_string()),
        ]);
        assert!(merge_map(&mut existing, &required));
        assert_eq!(
            existing.as_ref().unwrap(),
            &BTreeMap::from([
                ("add".to_string(), "3".to_string()),
                ("keep".to_string(), "1".to_string()),
            ])
        );
        assert!(!merge_map(&mut existing, &required));
    }

    #[test]
    fn subset_ignores_server_defaults() {
        let desired = json!({"ports": [{"port": 8443, "targetPort": 9443}]});
        let live = json!({
            "clusterIP": "10.0.0.1",
            "ports": [{"port": 8443, "protocol": "TCP", "targetPort": 9443}],
            "type": "ClusterIP"
        });
        assert!(is_subset(&desired, &live));
        assert!(!is_subset(&live, &desired));

        let changed = json!({"ports": [{"port": 8444, "targetPort": 9443}]});
        assert!(!is_subset(&changed, &live));

        let extra = json!({"ports": [{"port": 8443}, {"port": 8080}]});
        assert!(!is_subset(&extra, &live));
    }

    #[test]
    fn fingerprints_default_to_zero() {
        let mut fingerprints = Fingerprints::default();
        fingerprints.record("kueue/configmap", &ConfigMap::default());
        let mut cm = ConfigMap::default();
        cm.metadata.resource_version = Some("42".into());
        fingerprints.record("secret/kueue-webhook-server-cert", &cm);

        assert_eq!(fingerprints.as_map()["kueue/configmap"], "0");
        assert_eq!(fingerprints.as_map()["secret/kueue-webhook-server-cert"], "42");
    }
}
