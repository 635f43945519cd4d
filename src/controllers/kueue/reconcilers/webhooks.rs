use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::ByteString;
use kube::ResourceExt;

use crate::resources::kueues::{Kueue, KueueConfiguration};
use crate::Result;

use super::{adopt, assets};

/// Integrations whose webhooks intercept every pod, deployment or statefulset
const POD_INTEGRATIONS: &[&str] = &["pod", "deployment", "statefulset"];

/// Operations shared by both admission webhook configuration kinds
pub trait Webhooks: Clone {
    /// Entries that only serve the pod lifecycle integrations
    const POD_BASED: &'static [&'static str];

    fn retain_webhooks(&mut self, keep: impl FnMut(&str) -> bool);

    /// Point every webhook at the webhook service in `namespace`
    fn retarget(&mut self, namespace: &str);

    fn ca_bundle(&self, name: &str) -> Option<ByteString>;

    fn set_ca_bundle(&mut self, name: &str, bundle: ByteString);

    fn webhook_names(&self) -> Vec<String>;
}

macro_rules! webhooks {
    ($kind:ty, [$($pod_based:literal),*]) => {
        impl Webhooks for $kind {
            const POD_BASED: &'static [&'static str] = &[$($pod_based),*];

            fn retain_webhooks(&mut self, mut keep: impl FnMut(&str) -> bool) {
                if let Some(webhooks) = self.webhooks.as_mut() {
                    webhooks.retain(|webhook| keep(&webhook.name));
                }
            }

            fn retarget(&mut self, namespace: &str) {
                for webhook in self.webhooks.iter_mut().flatten() {
                    if let Some(service) = webhook.client_config.service.as_mut() {
                        service.namespace = namespace.to_owned();
                    }
                }
            }

            fn ca_bundle(&self, name: &str) -> Option<ByteString> {
                self.webhooks
                    .iter()
                    .flatten()
                    .find(|webhook| webhook.name == name)
                    .and_then(|webhook| webhook.client_config.ca_bundle.clone())
            }

            fn set_ca_bundle(&mut self, name: &str, bundle: ByteString) {
                for webhook in self.webhooks.iter_mut().flatten() {
                    if webhook.name == name {
                        webhook.client_config.ca_bundle = Some(bundle.clone());
                    }
                }
            }

            fn webhook_names(&self) -> Vec<String> {
                self.webhooks
                    .iter()
                    .flatten()
                    .map(|webhook| webhook.name.clone())
                    .collect()
            }
        }
    };
}

webhooks!(
    MutatingWebhookConfiguration,
    ["mdeployment.kb.io", "mpod.kb.io", "mstatefulset.kb.io"]
);
webhooks!(
    ValidatingWebhookConfiguration,
    ["vdeployment.kb.io", "vpod.kb.io", "vstatefulset.kb.io"]
);

/// Drop the pod-based webhooks unless a pod lifecycle integration is enabled.
///
/// Pure and idempotent; the order of the remaining entries is preserved.
pub fn filter<W: Webhooks>(config: &KueueConfiguration, current: &W) -> W {
    let mut filtered = current.clone();
    let pod_integration_enabled = config
        .integrations
        .frameworks
        .iter()
        .any(|framework| POD_INTEGRATIONS.contains(&framework.as_str()));
    if !pod_integration_enabled {
        filtered.retain_webhooks(|name| !W::POD_BASED.contains(&name));
    }
    filtered
}

fn build<W>(kueue: &Kueue, asset: &str) -> Result<W>
where
    W: Webhooks + kube::Resource + serde::de::DeserializeOwned,
{
    let mut webhooks: W = assets::read(asset)?;
    adopt(&mut webhooks, kueue, false)?;
    webhooks.retarget(kueue.namespace().as_deref().unwrap_or_default());
    Ok(filter(&kueue.spec.config, &webhooks))
}

pub fn mutating_webhook(kueue: &Kueue) -> Result<MutatingWebhookConfiguration> {
    build(kueue, assets::MUTATING_WEBHOOK)
}

pub fn validating_webhook(kueue: &Kueue) -> Result<ValidatingWebhookConfiguration> {
    build(kueue, assets::VALIDATING_WEBHOOK)
}
