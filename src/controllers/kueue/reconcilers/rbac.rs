use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::resources::kueues::Kueue;
use crate::Result;

use super::{adopt, assets};

pub const OPENSHIFT_CLUSTER_ROLE: &str = "kueue-openshift-roles";
pub const OPENSHIFT_CLUSTER_ROLE_BINDING: &str = "kueue-openshift-cluster-role-binding";
const CONTROLLER_SERVICE_ACCOUNT: &str = "kueue-controller-manager";

/// Cluster role bindings shipped as templates, with the key their version is recorded under
pub const CLUSTER_ROLE_BINDINGS: &[(&str, &str)] = &[
    (
        assets::KUBE_PROXY_CLUSTER_ROLE_BINDING,
        "clusterrolebinding/kube-proxy",
    ),
    (
        assets::MANAGER_CLUSTER_ROLE_BINDING,
        "clusterrolebinding/kueue-manager-role",
    ),
];

fn rebind_service_accounts(subjects: Option<&mut Vec<Subject>>, namespace: Option<String>) {
    for subject in subjects.into_iter().flatten() {
        if subject.kind == "ServiceAccount" {
            subject.namespace = namespace.clone();
        }
    }
}

pub fn leader_election_role(kueue: &Kueue) -> Result<Role> {
    let mut role: Role = assets::read(assets::LEADER_ELECTION_ROLE)?;
    adopt(&mut role, kueue, true)?;
    Ok(role)
}

pub fn leader_election_role_binding(kueue: &Kueue) -> Result<RoleBinding> {
    let mut binding: RoleBinding = assets::read(assets::LEADER_ELECTION_ROLE_BINDING)?;
    adopt(&mut binding, kueue, true)?;
    rebind_service_accounts(binding.subjects.as_mut(), kueue.namespace());
    Ok(binding)
}

/// The named cluster role, or `None` when it aggregates other roles
///
/// The API server owns the rules of aggregated roles, writing them would
/// only fight the aggregation controller.
pub fn cluster_role(kueue: &Kueue, asset: &str) -> Result<Option<ClusterRole>> {
    let mut role: ClusterRole = assets::read(asset)?;
    if role.aggregation_rule.is_some() {
        return Ok(None);
    }
    adopt(&mut role, kueue, false)?;
    Ok(Some(role))
}

pub fn cluster_role_binding(kueue: &Kueue, asset: &str) -> Result<ClusterRoleBinding> {
    let mut binding: ClusterRoleBinding = assets::read(asset)?;
    adopt(&mut binding, kueue, false)?;
    rebind_service_accounts(binding.subjects.as_mut(), kueue.namespace());
    Ok(binding)
}

fn controller_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/component".into(), "controller".into()),
        ("app.kubernetes.io/name".into(), "kueue".into()),
        ("control-plane".into(), "controller-manager".into()),
    ])
}

/// Read access to the OpenShift cluster configuration Kueue inspects at startup
pub fn openshift_cluster_role(kueue: &Kueue) -> Result<ClusterRole> {
    let mut role = ClusterRole {
        metadata: ObjectMeta {
            name: Some(OPENSHIFT_CLUSTER_ROLE.into()),
            labels: Some(controller_labels()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["config.openshift.io".into()]),
            resources: Some(vec!["infrastructures".into(), "apiservers".into()]),
            verbs: vec!["get".into(), "watch".into(), "list".into()],
            ..Default::default()
        }]),
        ..Default::default()
    };
    adopt(&mut role, kueue, false)?;
    Ok(role)
}

pub fn openshift_cluster_role_binding(kueue: &Kueue) -> Result<ClusterRoleBinding> {
    let mut binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(OPENSHIFT_CLUSTER_ROLE_BINDING.into()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".into(),
            kind: "ClusterRole".into(),
            name: OPENSHIFT_CLUSTER_ROLE.into(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".into(),
            name: CONTROLLER_SERVICE_ACCOUNT.into(),
            namespace: kueue.namespace(),
            ..Default::default()
        }]),
    };
    adopt(&mut binding, kueue, false)?;
    Ok(binding)
}
