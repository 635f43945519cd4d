//! Static manifests embedded into the operator binary.

use serde::de::DeserializeOwned;

use crate::{Error, Result};

macro_rules! assets {
    ($($name:literal),* $(,)?) => {
        &[$(
            (
                $name,
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/kueue-operator/", $name)),
            ),
        )*]
    };
}

static ASSETS: &[(&str, &str)] = assets!(
    "serviceaccount.yaml",
    "secret.yaml",
    "role-leader-election.yaml",
    "rolebinding-leader-election.yaml",
    "metrics-service.yaml",
    "visibility-service.yaml",
    "webhook-service.yaml",
    "deployment.yaml",
    "clusterrolebinding-kube-proxy.yaml",
    "clusterrolebinding-kueue-manager-role.yaml",
    "mutatingwebhook.yaml",
    "validatingwebhook.yaml",
    "clusterrole-batch-admin.yaml",
    "clusterrole-batch-user.yaml",
    "clusterrole-clusterqueue-editor.yaml",
    "clusterrole-clusterqueue-viewer.yaml",
    "clusterrole-job-editor.yaml",
    "clusterrole-job-viewer.yaml",
    "clusterrole-localqueue-editor.yaml",
    "clusterrole-localqueue-viewer.yaml",
    "clusterrole-manager.yaml",
    "clusterrole-metrics-reader.yaml",
    "clusterrole-pending-workloads-cq-viewer.yaml",
    "clusterrole-pending-workloads-lq-viewer.yaml",
    "clusterrole-proxy.yaml",
    "clusterrole-resourceflavor-editor.yaml",
    "clusterrole-resourceflavor-viewer.yaml",
    "clusterrole-workload-editor.yaml",
    "clusterrole-workload-viewer.yaml",
    "crd-admissionchecks.yaml",
    "crd-clusterqueues.yaml",
    "crd-cohorts.yaml",
    "crd-localqueues.yaml",
    "crd-multikueueclusters.yaml",
    "crd-multikueueconfigs.yaml",
    "crd-provisioningrequestconfigs.yaml",
    "crd-resourceflavors.yaml",
    "crd-topologies.yaml",
    "crd-workloadpriorityclasses.yaml",
    "crd-workloads.yaml",
);

pub const SERVICE_ACCOUNT: &str = "serviceaccount.yaml";
pub const WEBHOOK_SECRET: &str = "secret.yaml";
pub const LEADER_ELECTION_ROLE: &str = "role-leader-election.yaml";
pub const LEADER_ELECTION_ROLE_BINDING: &str = "rolebinding-leader-election.yaml";
pub const METRICS_SERVICE: &str = "metrics-service.yaml";
pub const VISIBILITY_SERVICE: &str = "visibility-service.yaml";
pub const WEBHOOK_SERVICE: &str = "webhook-service.yaml";
pub const DEPLOYMENT: &str = "deployment.yaml";
pub const KUBE_PROXY_CLUSTER_ROLE_BINDING: &str = "clusterrolebinding-kube-proxy.yaml";
pub const MANAGER_CLUSTER_ROLE_BINDING: &str = "clusterrolebinding-kueue-manager-role.yaml";
pub const MUTATING_WEBHOOK: &str = "mutatingwebhook.yaml";
pub const VALIDATING_WEBHOOK: &str = "validatingwebhook.yaml";

/// Every CustomResourceDefinition Kueue serves
pub const CUSTOM_RESOURCE_DEFINITIONS: &[&str] = &[
    "crd-admissionchecks.yaml",
    "crd-clusterqueues.yaml",
    "crd-cohorts.yaml",
    "crd-localqueues.yaml",
    "crd-multikueueclusters.yaml",
    "crd-multikueueconfigs.yaml",
    "crd-provisioningrequestconfigs.yaml",
    "crd-resourceflavors.yaml",
    "crd-topologies.yaml",
    "crd-workloadpriorityclasses.yaml",
    "crd-workloads.yaml",
];

/// Every ClusterRole Kueue ships, aggregated ones included
pub const CLUSTER_ROLES: &[&str] = &[
    "clusterrole-batch-admin.yaml",
    "clusterrole-batch-user.yaml",
    "clusterrole-clusterqueue-editor.yaml",
    "clusterrole-clusterqueue-viewer.yaml",
    "clusterrole-job-editor.yaml",
    "clusterrole-job-viewer.yaml",
    "clusterrole-localqueue-editor.yaml",
    "clusterrole-localqueue-viewer.yaml",
    "clusterrole-manager.yaml",
    "clusterrole-metrics-reader.yaml",
    "clusterrole-pending-workloads-cq-viewer.yaml",
    "clusterrole-pending-workloads-lq-viewer.yaml",
    "clusterrole-proxy.yaml",
    "clusterrole-resourceflavor-editor.yaml",
    "clusterrole-resourceflavor-viewer.yaml",
    "clusterrole-workload-editor.yaml",
    "clusterrole-workload-viewer.yaml",
];

/// Raw bytes of the named template
pub fn load(name: &str) -> Result<&'static str> {
    ASSETS
        .iter()
        .find_map(|(asset, content)| (*asset == name).then_some(*content))
        .ok_or_else(|| Error::AssetNotFound(name.into()))
}

/// Parse the named template.
///
/// Templates are compiled into the binary, so one that does not parse is a
/// packaging defect and panics.
pub fn read<K: DeserializeOwned>(name: &str) -> Result<K> {
    let raw = load(name)?;
    Ok(serde_yaml::from_str(raw)
        .unwrap_or_else(|err| panic!("embedded asset {name} is malformed: {err}")))
}
