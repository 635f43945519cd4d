use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use kube::ResourceExt;
use sha2::Digest;

use crate::resources::kueues::{Kueue, KueueStatus, LogLevel};
use crate::{Error, Result};

use super::{adopt, assets, merge_map, Fingerprints};

pub const DEPLOYMENT_NAME: &str = "kueue-controller-manager";
pub const SPEC_HASH_ANNOTATION: &str = "operator.openshift.io/spec-hash";

/// zap verbosity passed to the controller manager for each log level
pub fn zap_log_level(level: Option<LogLevel>) -> u8 {
    match level.unwrap_or_default() {
        LogLevel::Normal => 2,
        LogLevel::Debug => 4,
        LogLevel::Trace => 6,
        LogLevel::TraceAll => 8,
    }
}

pub fn spec_hash(spec: &DeploymentSpec) -> Result<String> {
    let mut hasher = sha2::Sha256::new();
    hasher.update(serde_json::to_vec(spec)?);
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

/// The controller manager deployment, with `fingerprints` merged into its pod template
pub fn deployment(kueue: &Kueue, fingerprints: &Fingerprints) -> Result<Deployment> {
    let mut deployment: Deployment = assets::read(assets::DEPLOYMENT)?;
    deployment.metadata.name = Some(DEPLOYMENT_NAME.into());
    adopt(&mut deployment, kueue, true)?;

    let spec = deployment
        .spec
        .as_mut()
        .ok_or(Error::MissingObjectKey("spec"))?;
    let manager = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut())
        .ok_or(Error::MissingObjectKey("spec.template.spec.containers"))?;
    manager.image = Some(kueue.spec.image.clone());
    manager.args.get_or_insert_with(Vec::new).push(format!(
        "--zap-log-level={}",
        zap_log_level(kueue.spec.log_level)
    ));

    let template_meta = spec.template.metadata.get_or_insert_with(Default::default);
    merge_map(&mut template_meta.annotations, fingerprints.as_map());

    let hash = spec_hash(spec)?;
    deployment
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(SPEC_HASH_ANNOTATION.into(), hash);
    Ok(deployment)
}

/// Whether the live deployment changed since its generation was last recorded on the Kueue.
///
/// A deployment with no recorded generation is always rolled.
pub fn changed_out_of_band(live: &Deployment, status: Option<&KueueStatus>) -> bool {
    let recorded = status.and_then(|s| {
        s.last_generation(
            "apps",
            "deployments",
            live.namespace().as_deref().unwrap_or_default(),
            &live.name_any(),
        )
    });
    recorded != live.metadata.generation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::kueues::{GenerationStatus, KueueSpec};

    fn kueue(log_level: Option<LogLevel>) -> Kueue {
        let mut kueue = Kueue::new(
            "cluster",
            KueueSpec {
                image: "registry/kueue:v1".into(),
                log_level,
                ..Default::default()
            },
        );
        kueue.metadata.namespace = Some("kueue-system".into());
        kueue.metadata.uid = Some("1234".into());
        kueue
    }

    fn manager_args(deployment: &Deployment) -> Vec<String> {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap()
    }

    #[test]
    fn injects_image_and_exactly_one_log_level() {
        for (level, expected) in [
            (None, "--zap-log-level=2"),
            (Some(LogLevel::Normal), "--zap-log-level=2"),
            (Some(LogLevel::Debug), "--zap-log-level=4"),
            (Some(LogLevel::Trace), "--zap-log-level=6"),
            (Some(LogLevel::TraceAll), "--zap-log-level=8"),
        ] {
            let deployment = deployment(&kueue(level), &Fingerprints::default()).unwrap();
            let args = manager_args(&deployment);
            assert_eq!(
                args.iter().filter(|a| a.starts_with("--zap-log-level")).count(),
                1
            );
            assert_eq!(args.last().map(String::as_str), Some(expected));

            let pod = deployment.spec.unwrap().template.spec.unwrap();
            assert_eq!(pod.containers[0].image.as_deref(), Some("registry/kueue:v1"));
            assert_ne!(pod.containers[1].image.as_deref(), Some("registry/kueue:v1"));
        }
    }

    #[test]
    fn fingerprints_merge_into_template_annotations() {
        let mut fingerprints = Fingerprints::default();
        fingerprints.insert("kueue/configmap", "12");
        fingerprints.insert("kueueoperator.operator.openshift.io/cluster", "3");

        let deployment = deployment(&kueue(None), &fingerprints).unwrap();
        let annotations = deployment
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .annotations
            .unwrap();
        assert_eq!(annotations["kueue/configmap"], "12");
        assert_eq!(annotations["kueueoperator.operator.openshift.io/cluster"], "3");
        assert_eq!(annotations["kubectl.kubernetes.io/default-container"], "manager");
    }

    #[test]
    fn spec_hash_tracks_the_desired_spec() {
        let first = deployment(&kueue(None), &Fingerprints::default()).unwrap();
        let again = deployment(&kueue(None), &Fingerprints::default()).unwrap();
        let debug = deployment(&kueue(Some(LogLevel::Debug)), &Fingerprints::default()).unwrap();

        let hash = |d: &Deployment| d.annotations()[SPEC_HASH_ANNOTATION].clone();
        assert_eq!(hash(&first), hash(&again));
        assert_ne!(hash(&first), hash(&debug));
        assert_eq!(hash(&first).len(), 64);
    }

    #[test]
    fn unrecorded_or_moved_generations_force_a_rollout() {
        let mut live = deployment(&kueue(None), &Fingerprints::default()).unwrap();
        live.metadata.generation = Some(2);
        assert!(changed_out_of_band(&live, None));

        let mut status = KueueStatus::default();
        status.set_last_generation(GenerationStatus {
            group: "apps".into(),
            resource: "deployments".into(),
            namespace: "kueue-system".into(),
            name: DEPLOYMENT_NAME.into(),
            last_generation: 2,
        });
        assert!(!changed_out_of_band(&live, Some(&status)));

        live.metadata.generation = Some(3);
        assert!(changed_out_of_band(&live, Some(&status)));
    }
}
