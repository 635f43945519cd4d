use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::events::EventType;
use kube::runtime::{metadata_watcher, watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::*;

use crate::controllers::{Diagnostics, State};
use crate::resources::kueues::{GenerationStatus, Kueue, KueueCondition, KueueStatus, KUEUE_NAME};
use crate::telemetry::{self, LogLevelHandle};
use crate::{Error, Metrics, Result};

use super::client::{ClusterClient, KubeClient};
use super::events::config_map_triggers;
use super::reconcilers::apply::{ensure, ensure_with, ManagedResource};
use super::reconcilers::{
    assets, configmap, crds, deployment, rbac, services, webhooks, Fingerprints,
};

/// Fingerprint key holding the generation of the Kueue itself
const KUEUE_GENERATION_KEY: &str = "kueueoperator.operator.openshift.io/cluster";

/// Label carried by every namespaced resource the operator manages
const MANAGED_LABEL_SELECTOR: &str = "app.kubernetes.io/name=kueue";

const BASE_RETRY_DELAY: Duration = Duration::from_millis(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1000);

// Context for our sync passes
pub struct Context<C> {
    /// Cluster access
    pub client: C,
    /// Namespace of the Kueue and of every namespaced resource we manage
    pub namespace: String,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    pub log_level: LogLevelHandle,
    /// Delay before the next pass after a successful one
    pub resync_interval: Duration,
    /// Consecutive failed passes; the controller only ever holds the one Kueue key
    failures: AtomicU32,
}

impl<C: ClusterClient> Context<C> {
    pub fn new(client: C, state: &State, metrics: Metrics) -> Self {
        Self {
            client,
            namespace: state.operator_namespace().to_owned(),
            diagnostics: state.diagnostics.clone(),
            metrics,
            log_level: state.log_level(),
            resync_interval: state.resync_interval(),
            failures: AtomicU32::new(0),
        }
    }

    /// One level-triggered pass over every managed resource
    #[instrument(skip(self), fields(trace_id))]
    pub async fn sync(&self) -> Result<()> {
        if let Some(trace_id) = telemetry::get_trace_id() {
            Span::current().record("trace_id", field::display(&trace_id));
        }
        let _timer = self.metrics.start_sync();
        self.diagnostics.write().await.last_event = Utc::now();

        let kueue: Kueue = match self.client.get(Some(&self.namespace), KUEUE_NAME).await {
            Ok(Some(kueue)) => kueue,
            Ok(None) => {
                return Err(Error::KueueNotFound {
                    namespace: self.namespace.clone(),
                    name: KUEUE_NAME.into(),
                })
            }
            Err(err) => {
                error!("Could not read Kueue: {err}");
                self.record_failure(&err).await;
                return Err(err);
            }
        };
        self.log_level.apply(kueue.spec.operator_log_level);

        info!("Syncing Kueue \"{}\"", kueue.name_any());
        match self.sync_resources(&kueue).await {
            Ok(()) => {
                self.diagnostics.write().await.last_error = None;
                Ok(())
            }
            Err(err) if err.is_kueue_not_found() => {
                info!("Kueue \"{}\" was deleted during the sync", kueue.name_any());
                Err(err)
            }
            Err(err) => {
                error!("sync failed: {err}");
                if let Err(publish_err) = self
                    .client
                    .publish_event(&kueue, EventType::Warning, "FailedSync", err.to_string())
                    .await
                {
                    warn!("Could not publish FailedSync event: {publish_err}");
                }
                self.record_failure(&err).await;
                Err(err)
            }
        }
    }

    async fn record_failure(&self, err: &Error) {
        self.metrics.sync_failure(err);
        self.diagnostics.write().await.last_error = Some(err.to_string());
    }

    async fn ensure_step<K: ManagedResource>(&self, step: &'static str, desired: Result<K>) -> Result<K> {
        let desired = desired.map_err(|err| err.during(step))?;
        let (live, _) = ensure(&self.client, desired)
            .await
            .map_err(|err| err.during(step))?;
        Ok(live)
    }

    async fn sync_resources(&self, kueue: &Kueue) -> Result<()> {
        let mut fingerprints = Fingerprints::default();
        fingerprints.insert(
            KUEUE_GENERATION_KEY,
            kueue.metadata.generation.unwrap_or_default().to_string(),
        );

        let cm = self
            .ensure_step("manage config map", configmap::config_map(kueue))
            .await?;
        fingerprints.record("kueue/configmap", &cm);

        for asset in assets::CUSTOM_RESOURCE_DEFINITIONS {
            let crd = self
                .ensure_step(
                    "manage custom resource definitions",
                    crds::custom_resource_definition(kueue, asset),
                )
                .await?;
            fingerprints.record(format!("crd/{}", crd.name_any()), &crd);
        }

        let sa = self
            .ensure_step("manage service account", services::service_account(kueue))
            .await?;
        fingerprints.record("serviceaccounts/kueue-operator", &sa);

        let secret = self
            .ensure_step("manage webhook secret", services::webhook_secret(kueue))
            .await?;
        fingerprints.record("secret/kueue-webhook-server-cert", &secret);

        let role = self
            .ensure_step("manage leader election role", rbac::leader_election_role(kueue))
            .await?;
        fingerprints.record("role/leader-election", &role);

        let binding = self
            .ensure_step(
                "bind leader election role",
                rbac::leader_election_role_binding(kueue),
            )
            .await?;
        fingerprints.record("rolebindings/leader-election", &binding);

        for (asset, key) in services::SERVICES {
            let svc = self
                .ensure_step("manage services", services::service(kueue, asset))
                .await?;
            fingerprints.record(*key, &svc);
        }

        for asset in assets::CLUSTER_ROLES {
            let desired = match rbac::cluster_role(kueue, asset) {
                Ok(None) => {
                    trace!("Skipping aggregated cluster role {asset}");
                    continue;
                }
                Ok(Some(role)) => Ok(role),
                Err(err) => Err(err),
            };
            let role = self.ensure_step("manage cluster roles", desired).await?;
            fingerprints.record(format!("clusterrole/{}", role.name_any()), &role);
        }

        let role = self
            .ensure_step(
                "manage openshift cluster role",
                rbac::openshift_cluster_role(kueue),
            )
            .await?;
        fingerprints.record("clusterrole/openshift-roles", &role);

        let binding = self
            .ensure_step(
                "bind openshift cluster role",
                rbac::openshift_cluster_role_binding(kueue),
            )
            .await?;
        fingerprints.record("clusterrolebinding/openshift-roles", &binding);

        for (asset, key) in rbac::CLUSTER_ROLE_BINDINGS {
            let binding = self
                .ensure_step(
                    "manage cluster role bindings",
                    rbac::cluster_role_binding(kueue, asset),
                )
                .await?;
            fingerprints.record(*key, &binding);
        }

        debug!("Collected {} fingerprints", fingerprints.len());
        let desired =
            deployment::deployment(kueue, &fingerprints).map_err(|err| err.during("manage deployment"))?;
        let (deployment, _) = ensure_with(&self.client, desired, |live| {
            deployment::changed_out_of_band(live, kueue.status.as_ref())
        })
        .await
        .map_err(|err| err.during("manage deployment"))?;

        self.update_status(kueue, &deployment)
            .await
            .map_err(|err| err.during("update status"))?;

        self.ensure_step("manage mutating webhook", webhooks::mutating_webhook(kueue))
            .await?;
        self.ensure_step(
            "manage validating webhook",
            webhooks::validating_webhook(kueue),
        )
        .await?;

        Ok(())
    }

    async fn update_status(&self, kueue: &Kueue, deployment: &Deployment) -> Result<()> {
        let current = kueue.status.clone().unwrap_or_default();
        let mut status = current.clone();

        status.observed_generation = deployment.metadata.generation;
        status.set_last_generation(GenerationStatus {
            group: "apps".into(),
            resource: "deployments".into(),
            namespace: deployment.namespace().unwrap_or_default(),
            name: deployment.name_any(),
            last_generation: deployment.metadata.generation.unwrap_or_default(),
        });

        let wanted = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        status.ready_replicas = Some(ready);
        set_available(&mut status, ready, wanted);

        if status == current {
            trace!("Kueue status is up to date");
            return Ok(());
        }

        debug!("Updating status of Kueue \"{}\"", kueue.name_any());
        match self
            .client
            .apply_kueue_status(&self.namespace, &kueue.name_any(), &status)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::KubeError(kube::Error::Api(resp))) if resp.code == 404 => {
                Err(Error::KueueNotFound {
                    namespace: self.namespace.clone(),
                    name: kueue.name_any(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Set the Available condition, moving its transition time only when its status flips
fn set_available(status: &mut KueueStatus, ready: i32, wanted: i32) {
    let conditions = status.conditions.get_or_insert_with(Vec::new);
    let existing = conditions.iter().find(|cond| cond.r#type == "Available");

    let (state, reason) = if ready > 0 && ready >= wanted {
        ("True", "MinimumReplicasAvailable")
    } else {
        ("False", "DeploymentUnavailable")
    };

    let last_transition_time = match existing {
        Some(cond) if cond.status == state => cond.last_transition_time.clone(),
        _ => Some(Time(Utc::now())),
    };

    let available = KueueCondition {
        last_transition_time,
        message: Some(format!(
            "{ready}/{wanted} replicas of {} are ready",
            deployment::DEPLOYMENT_NAME
        )),
        reason: Some(reason.into()),
        status: state.into(),
        r#type: "Available".into(),
    };

    match conditions.iter_mut().find(|cond| cond.r#type == "Available") {
        Some(cond) => *cond = available,
        None => conditions.push(available),
    }
}

/// Delay before the retry following `failures` earlier failures
fn backoff(failures: u32) -> Duration {
    2u32.checked_pow(failures)
        .and_then(|factor| BASE_RETRY_DELAY.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

async fn reconcile<C: ClusterClient>(kueue: Arc<Kueue>, ctx: Arc<Context<C>>) -> Result<Action> {
    match ctx.sync().await {
        Ok(()) => {
            ctx.failures.store(0, Ordering::Relaxed);
            Ok(Action::requeue(ctx.resync_interval))
        }
        Err(err) if err.is_kueue_not_found() => {
            info!("Kueue \"{}\" is gone, nothing to sync", kueue.name_any());
            ctx.failures.store(0, Ordering::Relaxed);
            Ok(Action::await_change())
        }
        Err(err) => Err(err),
    }
}

fn error_policy<C>(kueue: Arc<Kueue>, err: &Error, ctx: Arc<Context<C>>) -> Action {
    let failures = ctx.failures.fetch_add(1, Ordering::Relaxed);
    let delay = backoff(failures);
    warn!(
        requeues = failures.saturating_add(1),
        "Retrying Kueue \"{}\" in {delay:?} after error: {err}",
        kueue.name_any()
    );
    Action::requeue(delay)
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            error!("Could not create kube client: {e:?}");
            std::process::exit(1);
        }
    };

    let namespace = state.operator_namespace().to_owned();
    let kueues = Api::<Kueue>::namespaced(client.clone(), &namespace);
    if let Err(e) = kueues.list(&ListParams::default().limit(1)).await {
        error!("Kueue is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    if state.workers() > 1 {
        warn!(
            workers = state.workers(),
            "Only one worker is started, sync passes are serialized"
        );
    }

    let metrics = match Metrics::register(&state.registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Could not register metrics: {e:?}");
            std::process::exit(1);
        }
    };

    let owned = watcher::Config::default().labels(MANAGED_LABEL_SELECTOR);
    // readiness lives in the deployment status, so it is watched in full
    let deployments = watcher(Api::<Deployment>::namespaced(client.clone(), &namespace), owned.clone())
        .touched_objects()
        .default_backoff();
    let services = metadata_watcher(Api::<Service>::namespaced(client.clone(), &namespace), owned.clone())
        .touched_objects()
        .default_backoff();
    let service_accounts = metadata_watcher(
        Api::<ServiceAccount>::namespaced(client.clone(), &namespace),
        owned.clone(),
    )
    .touched_objects()
    .default_backoff();
    let secrets = metadata_watcher(Api::<Secret>::namespaced(client.clone(), &namespace), owned)
        .touched_objects()
        .default_backoff();

    let ctx = Arc::new(Context::new(KubeClient::new(client.clone()), &state, metrics));

    info!("Starting Kueue operator in namespace {namespace}");
    Controller::new(
        kueues,
        watcher::Config::default().fields(&format!("metadata.name={KUEUE_NAME}")),
    )
    .with_config(controller::Config::default().concurrency(1))
    .shutdown_on_signal()
    .owns_stream(deployments)
    .owns_stream(services)
    .owns_stream(service_accounts)
    .owns_stream(secrets)
    .reconcile_on(config_map_triggers(Api::namespaced(client, &namespace)))
    .run(reconcile::<KubeClient>, error_policy::<KubeClient>, ctx)
    .filter_map(|x| async move { Result::ok(x) })
    .for_each(|_| futures::future::ready(()))
    .await;
    info!("Controller stopped");
}
