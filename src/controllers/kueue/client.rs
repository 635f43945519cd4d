use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::*;

use crate::resources::kueues::{Kueue, KueueStatus};
use crate::{Error, Result};

/// Field manager for every write the operator makes
pub const FIELD_MANAGER: &str = "kueue-operator";

/// A kind the operator reads or writes, together with how to scope an [`Api`] for it
pub trait ScopedResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn api(client: Client, namespace: Option<&str>) -> Result<Api<Self>>;
}

macro_rules! namespaced {
    ($($kind:ty),* $(,)?) => {$(
        impl ScopedResource for $kind {
            fn api(client: Client, namespace: Option<&str>) -> Result<Api<Self>> {
                let namespace = namespace.ok_or(Error::MissingObjectKey("metadata.namespace"))?;
                Ok(Api::namespaced(client, namespace))
            }
        }
    )*};
}

macro_rules! cluster_scoped {
    ($($kind:ty),* $(,)?) => {$(
        impl ScopedResource for $kind {
            fn api(client: Client, _namespace: Option<&str>) -> Result<Api<Self>> {
                Ok(Api::all(client))
            }
        }
    )*};
}

namespaced!(
    Kueue,
    ConfigMap,
    Secret,
    ServiceAccount,
    Service,
    Deployment,
    Role,
    RoleBinding,
);

cluster_scoped!(
    ClusterRole,
    ClusterRoleBinding,
    CustomResourceDefinition,
    MutatingWebhookConfiguration,
    ValidatingWebhookConfiguration,
);

/// The cluster operations a sync pass needs
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// Fetch an object, `None` when it does not exist
    async fn get<K: ScopedResource>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    async fn create<K: ScopedResource>(&self, obj: &K) -> Result<K>;

    /// Replace an object, carrying its `resourceVersion` for optimistic concurrency
    async fn replace<K: ScopedResource>(&self, obj: &K) -> Result<K>;

    async fn apply_kueue_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KueueStatus,
    ) -> Result<Kueue>;

    async fn publish_event(
        &self,
        kueue: &Kueue,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()>;
}

/// [`ClusterClient`] backed by the API server
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    recorder: Recorder,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self {
            recorder: Recorder::new(client.clone(), FIELD_MANAGER.into()),
            client,
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.into()),
    }
}

fn name_of<K: Resource>(obj: &K) -> Result<&str> {
    obj.meta()
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey("metadata.name"))
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn get<K: ScopedResource>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        Ok(K::api(self.client.clone(), namespace)?.get_opt(name).await?)
    }

    async fn create<K: ScopedResource>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), obj.meta().namespace.as_deref())?;
        debug!("Creating {} {}", K::kind(&()), name_of(obj)?);
        Ok(api.create(&post_params(), obj).await?)
    }

    async fn replace<K: ScopedResource>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), obj.meta().namespace.as_deref())?;
        let name = name_of(obj)?;
        debug!("Replacing {} {}", K::kind(&()), name);
        Ok(api.replace(name, &post_params(), obj).await?)
    }

    async fn apply_kueue_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KueueStatus,
    ) -> Result<Kueue> {
        let kueues: Api<Kueue> = Api::namespaced(self.client.clone(), namespace);
        let patch = Patch::Apply(json!({
            "apiVersion": Kueue::api_version(&()),
            "kind": Kueue::kind(&()),
            "status": status,
        }));
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(kueues.patch_status(name, &params, &patch).await?)
    }

    async fn publish_event(
        &self,
        kueue: &Kueue,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()> {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note),
                    action: "Sync".into(),
                    secondary: None,
                },
                &kueue.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}
