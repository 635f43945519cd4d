use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the only Kueue object the operator reconciles.
pub const KUEUE_NAME: &str = "cluster";

/// Represents the desired installation of Kueue in the operator namespace
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "Kueue",
    group = "operator.openshift.io",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "KueueStatus")]
#[serde(rename_all = "camelCase")]
pub struct KueueSpec {
    /// managementState indicates whether and how the operator should manage the component.
    pub management_state: Option<String>,
    /// logLevel sets the verbosity of the Kueue controller manager. Defaults to Normal.
    pub log_level: Option<LogLevel>,
    /// operatorLogLevel sets the verbosity of the operator itself. Defaults to Normal.
    pub operator_log_level: Option<LogLevel>,
    /// The configuration that is persisted to the kueue-manager-config ConfigMap
    pub config: KueueConfiguration,
    /// Container image of the Kueue controller manager
    pub image: String,
}

/// Verbosity levels shared by the operator and its operand
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum LogLevel {
    #[default]
    Normal,
    Debug,
    Trace,
    TraceAll,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KueueConfiguration {
    /// waitForPodsReady configures gang admission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_pods_ready: Option<WaitForPodsReady>,
    /// integrations are the types of integrations Kueue will manage
    #[serde(default)]
    pub integrations: Integrations,
    /// featureGates are advanced features for Kueue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_gates: Option<BTreeMap<String, bool>>,
    /// resources provides additional configuration options for handling the resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

// Field order matches the key order Kueue itself emits, keep it alphabetical.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Integrations {
    /// externalFrameworks are additional GroupVersionKinds managed by external controllers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_frameworks: Option<Vec<String>>,
    /// frameworks are the names of the job frameworks Kueue manages, e.g. "batch/job" or "pod"
    #[serde(default)]
    pub frameworks: Vec<String>,
    /// podOptions restricts the pods the pod integration manages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_options: Option<PodIntegrationOptions>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodIntegrationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaitForPodsReady {
    /// blockAdmission holds admission of other workloads until the admitted one is ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_admission: Option<bool>,
    /// enable turns gang admission on
    pub enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeuing_strategy: Option<RequeuingStrategy>,
    /// timeout is a duration such as "5m" after which an unready workload is evicted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequeuingStrategy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_limit_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// excludeResourcePrefixes lists resource name prefixes Kueue ignores
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_resource_prefixes: Option<Vec<String>>,
    /// transformations convert input resources into the resources Kueue accounts for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformations: Option<Vec<ResourceTransformation>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTransformation {
    pub input: String,
    /// strategy is either Retain or Replace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, Quantity>>,
}

/// Status of the Kueue installation.
/// This is set and managed automatically.
/// Read-only.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KueueStatus {
    /// Generation of the Kueue controller manager Deployment last observed by the operator
    pub observed_generation: Option<i64>,
    /// Ready replicas of the Kueue controller manager Deployment
    pub ready_replicas: Option<i32>,
    /// Generations of the workloads the operator manages, used to detect out-of-band changes
    pub generations: Option<Vec<GenerationStatus>>,
    pub conditions: Option<Vec<KueueCondition>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    /// The generation of the workload the last time it was applied by the operator
    pub last_generation: i64,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KueueCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<Time>,

    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,

    /// Unique, one-word, CamelCase reason for the condition's last transition.
    pub reason: Option<String>,

    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,

    /// Type of the condition, known values are (`Available`).
    pub r#type: String,
}

impl KueueStatus {
    /// The generation last recorded for the named workload, if any
    pub fn last_generation(&self, group: &str, resource: &str, namespace: &str, name: &str) -> Option<i64> {
        self.generations.as_ref()?.iter().find_map(|g| {
            (g.group == group && g.resource == resource && g.namespace == namespace && g.name == name)
                .then_some(g.last_generation)
        })
    }

    /// Record `generation` for a workload, replacing a previous entry for the same workload
    pub fn set_last_generation(&mut self, entry: GenerationStatus) {
        let generations = self.generations.get_or_insert_with(Vec::new);
        match generations.iter_mut().find(|g| {
            g.group == entry.group
                && g.resource == entry.resource
                && g.namespace == entry.namespace
                && g.name == entry.name
        }) {
            Some(existing) => *existing = entry,
            None => generations.push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, generation: i64) -> GenerationStatus {
        GenerationStatus {
            group: "apps".into(),
            resource: "deployments".into(),
            namespace: "kueue-system".into(),
            name: name.into(),
            last_generation: generation,
        }
    }

    #[test]
    fn set_last_generation_replaces_existing_entry() {
        let mut status = KueueStatus::default();
        status.set_last_generation(entry("kueue-controller-manager", 1));
        status.set_last_generation(entry("kueue-controller-manager", 3));

        assert_eq!(status.generations.as_ref().unwrap().len(), 1);
        assert_eq!(
            status.last_generation("apps", "deployments", "kueue-system", "kueue-controller-manager"),
            Some(3)
        );
        assert_eq!(
            status.last_generation("apps", "deployments", "kueue-system", "other"),
            None
        );
    }

    #[test]
    fn log_level_defaults_to_normal() {
        let spec: KueueSpec = serde_json::from_value(serde_json::json!({
            "image": "registry/kueue:v1",
            "config": {"integrations": {"frameworks": ["batch/job"]}},
        }))
        .unwrap();

        assert_eq!(spec.log_level.unwrap_or_default(), LogLevel::Normal);
        assert_eq!(spec.config.integrations.frameworks, vec!["batch/job"]);

        let level: LogLevel = serde_json::from_value(serde_json::json!("TraceAll")).unwrap();
        assert_eq!(level, LogLevel::TraceAll);
    }

    #[test]
    fn pod_options_take_part_in_integration_equality() {
        let integrations: Integrations = serde_json::from_value(serde_json::json!({
            "frameworks": ["pod"],
            "podOptions": {"namespaceSelector": {"matchLabels": {"team": "a"}}},
        }))
        .unwrap();
        let mut other = integrations.clone();
        assert_eq!(integrations, other);

        other.pod_options = Some(PodIntegrationOptions::default());
        assert_ne!(integrations, other);
    }
}
