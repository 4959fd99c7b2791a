//! nfd-worker DaemonSet
//!
//! The worker inspects host hardware through a fixed set of read-only host
//! mounts and reads its configuration from the nfd-worker ConfigMap.

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, KeyToPath, PodSpec, Volume, VolumeMount,
};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, WORKER_NAME};

use super::common::{
    apply_labels, get_worker_tolerations, host_path_mount, label_selector, node_name_env,
    pod_template, restricted_security_context, set_controller_reference,
};
use super::config_map::WORKER_CONFIG_KEY;

/// Directory nfd-worker reads its configuration and hook directories from
pub const WORKER_CONFIG_DIR: &str = "/etc/kubernetes/node-feature-discovery";

/// Host paths mounted into the worker: (volume name, host path, mount path)
const HOST_MOUNTS: [(&str, &str, &str); 7] = [
    ("host-boot", "/boot", "/host-boot"),
    ("host-os-release", "/etc/os-release", "/host-etc/os-release"),
    ("host-sys", "/sys", "/host-sys"),
    ("host-usr-lib", "/usr/lib", "/host-usr/lib"),
    ("host-lib", "/lib", "/host-lib"),
    (
        "source-d",
        "/etc/kubernetes/node-feature-discovery/source.d/",
        "/etc/kubernetes/node-feature-discovery/source.d/",
    ),
    (
        "features-d",
        "/etc/kubernetes/node-feature-discovery/features.d/",
        "/etc/kubernetes/node-feature-discovery/features.d/",
    ),
];

fn worker_volumes() -> (Vec<Volume>, Vec<VolumeMount>) {
    let (mut volumes, mut mounts): (Vec<_>, Vec<_>) = HOST_MOUNTS
        .iter()
        .map(|(name, host, mount)| host_path_mount(name, host, mount, None))
        .unzip();

    volumes.push(Volume {
        name: "nfd-worker-conf".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: WORKER_NAME.to_string(),
            items: Some(vec![KeyToPath {
                key: WORKER_CONFIG_KEY.to_string(),
                path: "nfd-worker.conf".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    });
    mounts.push(VolumeMount {
        name: "nfd-worker-conf".to_string(),
        mount_path: WORKER_CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    });

    (volumes, mounts)
}

/// Populate the nfd-worker DaemonSet.
pub fn set_worker_daemonset_as_desired(
    nfd: &NodeFeatureDiscovery,
    ds: &mut DaemonSet,
) -> Result<(), Error> {
    let operand = &nfd.spec.operand;
    let (volumes, volume_mounts) = worker_volumes();

    let container = Container {
        name: WORKER_NAME.to_string(),
        image: Some(operand.image().to_string()),
        image_pull_policy: Some(operand.pull_policy().to_string()),
        command: Some(vec!["nfd-worker".to_string()]),
        args: Some(vec![format!(
            "-config={}/nfd-worker.conf",
            WORKER_CONFIG_DIR
        )]),
        env: Some(vec![node_name_env()]),
        security_context: Some(restricted_security_context()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        service_account_name: Some(WORKER_NAME.to_string()),
        containers: vec![container],
        volumes: Some(volumes),
        tolerations: Some(get_worker_tolerations(nfd)),
        ..Default::default()
    };

    apply_labels(&mut ds.metadata, WORKER_NAME);
    ds.spec = Some(DaemonSetSpec {
        selector: label_selector(WORKER_NAME),
        template: pod_template(WORKER_NAME, pod_spec),
        ..Default::default()
    });
    set_controller_reference(nfd, &mut ds.metadata, "DaemonSet")
}
