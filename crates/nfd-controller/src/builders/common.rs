//! Pieces shared by every builder: ownership, labels, tolerations, affinity
//! and security contexts.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, EnvVar, EnvVarSource, HostPathVolumeSource, NodeAffinity,
    NodeSelectorRequirement, NodeSelectorTerm, ObjectFieldSelector, PodSpec, PodTemplateSpec,
    PreferredSchedulingTerm, SeccompProfile, SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, LABEL_APP, LABEL_MANAGED_BY, LABEL_MANAGED_BY_NFD};

/// Legacy control-plane node role label
pub const MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

/// Control-plane node role label
pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

// =============================================================================
// Ownership
// =============================================================================

/// Make `owner` the controller of the object described by `meta`.
///
/// An existing reference to the same owner is replaced in place so repeated
/// calls leave the list unchanged. Fails when the owner has not been persisted
/// yet (no name or uid) or when another object already controls the target.
pub fn set_controller_reference(
    owner: &NodeFeatureDiscovery,
    meta: &mut ObjectMeta,
    kind: &str,
) -> Result<(), Error> {
    let target = meta.name.clone().unwrap_or_default();
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::owner_reference(kind, &target, "owner has no name or uid yet")
    })?;

    let refs = meta.owner_references.get_or_insert_with(Vec::new);

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner_ref.uid)
    {
        return Err(Error::owner_reference(
            kind,
            &target,
            format!("already controlled by {} {}", other.kind, other.name),
        ));
    }

    match refs.iter_mut().find(|r| r.uid == owner_ref.uid) {
        Some(existing) => *existing = owner_ref,
        None => refs.push(owner_ref),
    }
    Ok(())
}

// =============================================================================
// Labels
// =============================================================================

/// Pod selector labels for a managed workload
pub fn selector_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_APP.to_string(), app.to_string())])
}

/// Set the selector and managed-by labels, leaving other labels alone
pub fn apply_labels(meta: &mut ObjectMeta, app: &str) {
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.extend(selector_labels(app));
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_NFD.to_string(),
    );
}

/// Label selector matching the pods of `app`
pub fn label_selector(app: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(app)),
        ..Default::default()
    }
}

/// Pod template shell carrying the selector labels of `app`
pub fn pod_template(app: &str, spec: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(selector_labels(app)),
            ..Default::default()
        }),
        spec: Some(spec),
    }
}

/// Namespace of the owning NodeFeatureDiscovery
pub fn owner_namespace(nfd: &NodeFeatureDiscovery) -> String {
    nfd.namespace().unwrap_or_default()
}

// =============================================================================
// Scheduling
// =============================================================================

fn no_schedule_toleration(key: &str) -> Toleration {
    Toleration {
        key: Some(key.to_string()),
        operator: Some("Equal".to_string()),
        value: Some(String::new()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    }
}

/// Tolerations for control-plane pods: the master and control-plane
/// NoSchedule taints first, then the user's in their original order
pub fn get_pods_tolerations(nfd: &NodeFeatureDiscovery) -> Vec<Toleration> {
    let mut tolerations = vec![
        no_schedule_toleration(MASTER_ROLE_LABEL),
        no_schedule_toleration(CONTROL_PLANE_ROLE_LABEL),
    ];
    tolerations.extend(nfd.spec.tolerations.iter().cloned());
    tolerations
}

/// Tolerations for worker pods: tolerate every NoSchedule taint first, then
/// the user's in their original order
pub fn get_worker_tolerations(nfd: &NodeFeatureDiscovery) -> Vec<Toleration> {
    let mut tolerations = vec![Toleration {
        operator: Some("Exists".to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Default::default()
    }];
    tolerations.extend(nfd.spec.worker_tolerations.iter().cloned());
    tolerations
}

/// Soft preference for control-plane nodes, weight 1 on both role labels
pub fn control_plane_affinity() -> Affinity {
    let preferred = [MASTER_ROLE_LABEL, CONTROL_PLANE_ROLE_LABEL]
        .into_iter()
        .map(|key| PreferredSchedulingTerm {
            weight: 1,
            preference: NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: key.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![String::new()]),
                }]),
                ..Default::default()
            },
        })
        .collect();

    Affinity {
        node_affinity: Some(NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(preferred),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Containers
// =============================================================================

/// Non-root, read-only, no capabilities, no escalation, RuntimeDefault seccomp
pub fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(true),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `NODE_NAME` from the downward API
pub fn node_name_env() -> EnvVar {
    EnvVar {
        name: "NODE_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "spec.nodeName".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A host path volume and its read-only mount
pub fn host_path_mount(
    name: &str,
    host_path: &str,
    mount_path: &str,
    path_type: Option<&str>,
) -> (Volume, VolumeMount) {
    let volume = Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: host_path.to_string(),
            type_: path_type.map(str::to_string),
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: Some(true),
        ..Default::default()
    };
    (volume, mount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use nfd_common::crd::NodeFeatureDiscoverySpec;

    fn owner() -> NodeFeatureDiscovery {
        let mut nfd = NodeFeatureDiscovery::new("nfd-instance", NodeFeatureDiscoverySpec::default());
        nfd.metadata.namespace = Some("nfd".to_string());
        nfd.metadata.uid = Some("uid-1".to_string());
        nfd
    }

    fn user_toleration(key: &str) -> Toleration {
        Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn controller_reference_points_at_owner() {
        let mut meta = ObjectMeta::default();
        set_controller_reference(&owner(), &mut meta, "ConfigMap").unwrap();

        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "NodeFeatureDiscovery");
        assert_eq!(refs[0].api_version, "nfd.kubernetes.io/v1");
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn setting_the_reference_twice_changes_nothing() {
        let mut meta = ObjectMeta::default();
        set_controller_reference(&owner(), &mut meta, "ConfigMap").unwrap();
        let first = meta.clone();
        set_controller_reference(&owner(), &mut meta, "ConfigMap").unwrap();
        assert_eq!(meta, first);
    }

    #[test]
    fn unpersisted_owner_cannot_own_anything() {
        let mut nfd = owner();
        nfd.metadata.uid = None;
        let err = set_controller_reference(&nfd, &mut ObjectMeta::default(), "Job").unwrap_err();
        assert!(matches!(err, Error::OwnerReference { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn object_controlled_by_someone_else_is_rejected() {
        let mut meta = ObjectMeta {
            name: Some("nfd-master".to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "ReplicaSet".to_string(),
                name: "other".to_string(),
                uid: "uid-other".to_string(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let err = set_controller_reference(&owner(), &mut meta, "Deployment").unwrap_err();
        assert!(err.to_string().contains("already controlled by ReplicaSet other"));
    }

    #[test]
    fn non_controller_references_are_kept() {
        let foreign = OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "anchor".to_string(),
            uid: "uid-anchor".to_string(),
            ..Default::default()
        };
        let mut meta = ObjectMeta {
            owner_references: Some(vec![foreign.clone()]),
            ..Default::default()
        };
        set_controller_reference(&owner(), &mut meta, "ConfigMap").unwrap();
        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], foreign);
    }

    #[test]
    fn pod_tolerations_with_no_user_entries_are_the_defaults() {
        let tolerations = get_pods_tolerations(&owner());
        assert_eq!(tolerations.len(), 2);
        assert_eq!(tolerations[0].key.as_deref(), Some(MASTER_ROLE_LABEL));
        assert_eq!(tolerations[1].key.as_deref(), Some(CONTROL_PLANE_ROLE_LABEL));
    }

    #[test]
    fn pod_tolerations_put_defaults_before_user_entries_in_order() {
        let mut nfd = owner();
        nfd.spec.tolerations = vec![user_toleration("b"), user_toleration("a")];
        let keys: Vec<_> = get_pods_tolerations(&nfd)
            .into_iter()
            .map(|t| t.key.unwrap_or_default())
            .collect();
        assert_eq!(keys, [MASTER_ROLE_LABEL, CONTROL_PLANE_ROLE_LABEL, "b", "a"]);
    }

    #[test]
    fn worker_tolerations_start_with_tolerate_all_no_schedule() {
        let mut nfd = owner();
        assert_eq!(get_worker_tolerations(&nfd).len(), 1);

        nfd.spec.worker_tolerations = vec![user_toleration("z"), user_toleration("gpu")];
        let tolerations = get_worker_tolerations(&nfd);
        assert_eq!(tolerations[0].key, None);
        assert_eq!(tolerations[0].operator.as_deref(), Some("Exists"));
        assert_eq!(tolerations[0].effect.as_deref(), Some("NoSchedule"));
        assert_eq!(tolerations[1].key.as_deref(), Some("z"));
        assert_eq!(tolerations[2].key.as_deref(), Some("gpu"));
    }

    #[test]
    fn affinity_prefers_both_control_plane_labels() {
        let affinity = control_plane_affinity();
        let preferred = affinity
            .node_affinity
            .unwrap()
            .preferred_during_scheduling_ignored_during_execution
            .unwrap();
        assert_eq!(preferred.len(), 2);
        assert!(preferred.iter().all(|p| p.weight == 1));
        let keys: Vec<_> = preferred
            .iter()
            .map(|p| p.preference.match_expressions.as_ref().unwrap()[0].key.as_str())
            .collect();
        assert_eq!(keys, [MASTER_ROLE_LABEL, CONTROL_PLANE_ROLE_LABEL]);
    }

    #[test]
    fn labels_merge_without_dropping_foreign_keys() {
        let mut meta = ObjectMeta {
            labels: Some(BTreeMap::from([("team".to_string(), "infra".to_string())])),
            ..Default::default()
        };
        apply_labels(&mut meta, "nfd-worker");
        let labels = meta.labels.unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(labels.get(LABEL_APP).map(String::as_str), Some("nfd-worker"));
        assert_eq!(
            labels.get(LABEL_MANAGED_BY).map(String::as_str),
            Some(LABEL_MANAGED_BY_NFD)
        );
    }
}
