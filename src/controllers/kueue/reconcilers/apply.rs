use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde::Serialize;
use tracing::*;

use crate::controllers::kueue::client::{ClusterClient, ScopedResource};
use crate::{Error, Result};

use super::configmap::CONFIG_KEY;
use super::deployment::SPEC_HASH_ANNOTATION;
use super::webhooks::Webhooks;
use super::{is_subset, merge_object_meta};

/// How a managed kind is compared with, and folded into, its live counterpart
pub trait ManagedResource: ScopedResource {
    /// Carry server populated fields of `live` over into `desired` before comparing
    fn prepare(_desired: &mut Self, _live: &Self) {}

    /// Whether the kind specific content of `live` differs from `desired`
    fn differs(live: &Self, desired: &Self) -> Result<bool>;

    /// Replace the kind specific content of `live` with that of `desired`
    fn overwrite(live: &mut Self, desired: Self);
}

fn subset<T: Serialize>(desired: &T, live: &T) -> Result<bool> {
    Ok(is_subset(
        &serde_json::to_value(desired)?,
        &serde_json::to_value(live)?,
    ))
}

fn manager_config(cm: &ConfigMap) -> Option<&String> {
    cm.data.as_ref()?.get(CONFIG_KEY)
}

// Only the manager configuration is owned, other keys are left to whoever added them.
impl ManagedResource for ConfigMap {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(manager_config(live) != manager_config(desired))
    }

    fn overwrite(live: &mut Self, desired: Self) {
        if let Some(config) = manager_config(&desired) {
            live.data
                .get_or_insert_with(BTreeMap::new)
                .insert(CONFIG_KEY.into(), config.clone());
        }
    }
}

fn secret_data(secret: &Secret) -> Option<BTreeMap<String, ByteString>> {
    if secret.data.is_none() && secret.string_data.is_none() {
        return None;
    }
    let mut data = secret.data.clone().unwrap_or_default();
    for (key, value) in secret.string_data.iter().flatten() {
        data.insert(key.clone(), ByteString(value.clone().into_bytes()));
    }
    Some(data)
}

// The secret type is immutable and its data is owned by whoever issues the
// certificate, so only data the template spells out is compared.
impl ManagedResource for Secret {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(secret_data(desired).is_some_and(|data| live.data.as_ref() != Some(&data)))
    }

    fn overwrite(live: &mut Self, desired: Self) {
        if let Some(data) = secret_data(&desired) {
            live.data = Some(data);
            live.string_data = None;
        }
    }
}

impl ManagedResource for ServiceAccount {
    fn differs(_live: &Self, _desired: &Self) -> Result<bool> {
        Ok(false)
    }

    fn overwrite(_live: &mut Self, _desired: Self) {}
}

impl ManagedResource for Service {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(!subset(&desired.spec, &live.spec)?)
    }

    fn overwrite(live: &mut Self, desired: Self) {
        let allocated = live.spec.take().unwrap_or_default();
        let mut spec = desired.spec.unwrap_or_default();
        spec.cluster_ip = allocated.cluster_ip;
        spec.cluster_ips = allocated.cluster_ips;
        live.spec = Some(spec);
    }
}

impl ManagedResource for Role {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(!subset(&desired.rules, &live.rules)?)
    }

    fn overwrite(live: &mut Self, desired: Self) {
        live.rules = desired.rules;
    }
}

impl ManagedResource for ClusterRole {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(!subset(&desired.rules, &live.rules)?
            || !subset(&desired.aggregation_rule, &live.aggregation_rule)?)
    }

    fn overwrite(live: &mut Self, desired: Self) {
        live.rules = desired.rules;
        live.aggregation_rule = desired.aggregation_rule;
    }
}

impl ManagedResource for RoleBinding {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(!subset(&desired.subjects, &live.subjects)?
            || !subset(&desired.role_ref, &live.role_ref)?)
    }

    fn overwrite(live: &mut Self, desired: Self) {
        live.subjects = desired.subjects;
        live.role_ref = desired.role_ref;
    }
}

impl ManagedResource for ClusterRoleBinding {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(!subset(&desired.subjects, &live.subjects)?
            || !subset(&desired.role_ref, &live.role_ref)?)
    }

    fn overwrite(live: &mut Self, desired: Self) {
        live.subjects = desired.subjects;
        live.role_ref = desired.role_ref;
    }
}

impl ManagedResource for CustomResourceDefinition {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(!subset(&desired.spec, &live.spec)?)
    }

    fn overwrite(live: &mut Self, desired: Self) {
        live.spec = desired.spec;
    }
}

// Compared through the spec hash annotation only, which must be read before
// the desired annotations are merged into the live object.
impl ManagedResource for Deployment {
    fn differs(live: &Self, desired: &Self) -> Result<bool> {
        Ok(live.annotations().get(SPEC_HASH_ANNOTATION)
            != desired.annotations().get(SPEC_HASH_ANNOTATION))
    }

    fn overwrite(live: &mut Self, desired: Self) {
        live.spec = desired.spec;
    }
}

macro_rules! managed_webhooks {
    ($($kind:ty),*) => {$(
        impl ManagedResource for $kind {
            fn prepare(desired: &mut Self, live: &Self) {
                for name in desired.webhook_names() {
                    if let Some(bundle) = live.ca_bundle(&name) {
                        desired.set_ca_bundle(&name, bundle);
                    }
                }
            }

            fn differs(live: &Self, desired: &Self) -> Result<bool> {
                Ok(!subset(&desired.webhooks, &live.webhooks)?)
            }

            fn overwrite(live: &mut Self, desired: Self) {
                live.webhooks = desired.webhooks;
            }
        }
    )*};
}

managed_webhooks!(MutatingWebhookConfiguration, ValidatingWebhookConfiguration);

/// Make the cluster hold `desired`, returning the live object and whether it was written
pub async fn ensure<K, C>(client: &C, desired: K) -> Result<(K, bool)>
where
    K: ManagedResource,
    C: ClusterClient,
{
    ensure_with(client, desired, |_| false).await
}

/// Why a live object needs to be replaced
#[derive(Debug, Default, PartialEq)]
pub struct Changes {
    pub forced: bool,
    pub meta: bool,
    pub content: bool,
}

impl Changes {
    pub fn any(&self) -> bool {
        self.forced || self.meta || self.content
    }
}

/// Fold `desired` into `live`, reporting what had to change.
///
/// The kind's rule sees `live` as the server returned it, metadata is merged afterwards.
pub fn compare<K: ManagedResource>(live: &mut K, desired: &mut K, forced: bool) -> Result<Changes> {
    K::prepare(desired, live);
    let content = K::differs(live, desired)?;
    let meta = merge_object_meta(live.meta_mut(), desired.meta());
    Ok(Changes {
        forced,
        meta,
        content,
    })
}

/// [`ensure`], additionally replacing the live object whenever `force` holds for it
pub async fn ensure_with<K, C, F>(client: &C, mut desired: K, force: F) -> Result<(K, bool)>
where
    K: ManagedResource,
    C: ClusterClient,
    F: Fn(&K) -> bool + Send,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;
    let namespace = desired.meta().namespace.clone();

    let Some(mut live) = client.get::<K>(namespace.as_deref(), &name).await? else {
        info!("Creating {} {}", K::kind(&()), name);
        let created = client.create(&desired).await?;
        return Ok((created, true));
    };

    let forced = force(&live);
    let changes = compare(&mut live, &mut desired, forced)?;
    if !changes.any() {
        trace!("{} {} is up to date", K::kind(&()), name);
        return Ok((live, false));
    }

    info!(
        forced = changes.forced,
        meta_changed = changes.meta,
        content_changed = changes.content,
        "Updating {} {}",
        K::kind(&()),
        name
    );
    K::overwrite(&mut live, desired);
    let updated = client.replace(&live).await?;
    Ok((updated, true))
}
