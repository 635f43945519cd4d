use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

use crate::resources::kueues::{Integrations, Kueue, KueueConfiguration, WaitForPodsReady};
use crate::Result;

use super::adopt;

pub const CONFIG_MAP_NAME: &str = "kueue-manager-config";
pub const CONFIG_KEY: &str = "controller_manager_config.yaml";

// Fields are declared in key order so that the rendered document is sorted.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Configuration<'a> {
    api_version: &'static str,
    controller: ControllerConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    feature_gates: Option<&'a BTreeMap<String, bool>>,
    health: Health,
    integrations: &'a Integrations,
    kind: &'static str,
    manage_jobs_without_queue_name: bool,
    metrics: Metrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_pods_ready: Option<&'a WaitForPodsReady>,
    webhook: Webhook,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ControllerConfiguration {
    group_kind_concurrency: BTreeMap<&'static str, i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    health_probe_bind_address: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Metrics {
    bind_address: &'static str,
    enable_cluster_queue_resources: bool,
}

#[derive(Serialize)]
struct Webhook {
    port: i32,
}

impl<'a> Configuration<'a> {
    fn new(config: &'a KueueConfiguration) -> Self {
        Self {
            api_version: "config.kueue.x-k8s.io/v1beta1",
            controller: ControllerConfiguration {
                group_kind_concurrency: BTreeMap::from([
                    ("Job.batch", 5),
                    ("Pod", 5),
                    ("Workload.kueue.x-k8s.io", 5),
                    ("LocalQueue.kueue.x-k8s.io", 1),
                    ("ClusterQueue.kueue.x-k8s.io", 1),
                    ("ResourceFlavor.kueue.x-k8s.io", 1),
                ]),
            },
            feature_gates: config.feature_gates.as_ref(),
            health: Health {
                health_probe_bind_address: ":8081",
            },
            integrations: &config.integrations,
            kind: "Configuration",
            manage_jobs_without_queue_name: false,
            metrics: Metrics {
                bind_address: ":8080",
                enable_cluster_queue_resources: true,
            },
            wait_for_pods_ready: config.wait_for_pods_ready.as_ref(),
            webhook: Webhook { port: 9443 },
        }
    }
}

/// Render the Kueue controller manager configuration file
pub fn render(config: &KueueConfiguration) -> Result<String> {
    Ok(serde_yaml::to_string(&Configuration::new(config))?)
}

pub fn config_map(kueue: &Kueue) -> Result<ConfigMap> {
    let mut cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(CONFIG_MAP_NAME.into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_owned(),
            render(&kueue.spec.config)?,
        )])),
        ..Default::default()
    };
    adopt(&mut cm, kueue, true)?;
    Ok(cm)
}
