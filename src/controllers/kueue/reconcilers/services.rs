use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};

use crate::resources::kueues::Kueue;
use crate::Result;

use super::{adopt, assets};

/// Services in the order they are ensured, with the key their version is recorded under
pub const SERVICES: &[(&str, &str)] = &[
    (assets::METRICS_SERVICE, "service/metrics-service"),
    (assets::VISIBILITY_SERVICE, "service/visibility-service"),
    (assets::WEBHOOK_SERVICE, "service/webhook-service"),
];

pub fn service_account(kueue: &Kueue) -> Result<ServiceAccount> {
    let mut sa: ServiceAccount = assets::read(assets::SERVICE_ACCOUNT)?;
    adopt(&mut sa, kueue, true)?;
    Ok(sa)
}

/// The webhook serving certificate secret; its data is filled in by the service CA
pub fn webhook_secret(kueue: &Kueue) -> Result<Secret> {
    let mut secret: Secret = assets::read(assets::WEBHOOK_SECRET)?;
    adopt(&mut secret, kueue, true)?;
    Ok(secret)
}

pub fn service(kueue: &Kueue, asset: &str) -> Result<Service> {
    let mut svc: Service = assets::read(asset)?;
    adopt(&mut svc, kueue, true)?;
    Ok(svc)
}
