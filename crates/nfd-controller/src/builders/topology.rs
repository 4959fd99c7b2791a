//! nfd-topology-updater DaemonSet
//!
//! Runs as root with escalation allowed: the pod-resources socket and the
//! resource accounting files under /sys are not readable otherwise.

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{Capabilities, Container, PodSpec, SecurityContext};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, TOPOLOGY_UPDATER_NAME};

use super::common::{
    apply_labels, host_path_mount, label_selector, node_name_env, pod_template,
    set_controller_reference,
};

const POD_RESOURCES_SOCKET: &str = "/var/lib/kubelet/pod-resources/kubelet.sock";
const HOST_POD_RESOURCES_SOCKET: &str = "/host-var/lib/kubelet/pod-resources/kubelet.sock";

// Not configurable from the NodeFeatureDiscovery.
const SLEEP_INTERVAL: &str = "3s";

fn topology_security_context() -> SecurityContext {
    SecurityContext {
        run_as_user: Some(0),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Populate the nfd-topology-updater DaemonSet.
pub fn set_topology_daemonset_as_desired(
    nfd: &NodeFeatureDiscovery,
    ds: &mut DaemonSet,
) -> Result<(), Error> {
    let operand = &nfd.spec.operand;
    let (socket_volume, socket_mount) = host_path_mount(
        "kubelet-podresources-sock",
        POD_RESOURCES_SOCKET,
        HOST_POD_RESOURCES_SOCKET,
        Some("Socket"),
    );
    let (sys_volume, sys_mount) = host_path_mount("host-sys", "/sys", "/host-sys", None);

    let container = Container {
        name: TOPOLOGY_UPDATER_NAME.to_string(),
        image: Some(operand.image().to_string()),
        image_pull_policy: Some(operand.pull_policy().to_string()),
        command: Some(vec!["nfd-topology-updater".to_string()]),
        args: Some(vec![
            format!("-podresources-socket={}", HOST_POD_RESOURCES_SOCKET),
            format!("-sleep-interval={}", SLEEP_INTERVAL),
        ]),
        env: Some(vec![node_name_env()]),
        security_context: Some(topology_security_context()),
        volume_mounts: Some(vec![socket_mount, sys_mount]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        service_account_name: Some(TOPOLOGY_UPDATER_NAME.to_string()),
        containers: vec![container],
        volumes: Some(vec![socket_volume, sys_volume]),
        ..Default::default()
    };

    apply_labels(&mut ds.metadata, TOPOLOGY_UPDATER_NAME);
    ds.spec = Some(DaemonSetSpec {
        selector: label_selector(TOPOLOGY_UPDATER_NAME),
        template: pod_template(TOPOLOGY_UPDATER_NAME, pod_spec),
        ..Default::default()
    });
    set_controller_reference(nfd, &mut ds.metadata, "DaemonSet")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::tests::sample_nfd;

    fn container(ds: &DaemonSet) -> &Container {
        &ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn args_are_fixed() {
        let mut nfd = sample_nfd();
        nfd.spec.extra_label_ns = vec!["ignored".to_string()];
        let mut ds = DaemonSet::default();
        set_topology_daemonset_as_desired(&nfd, &mut ds).unwrap();

        assert_eq!(
            container(&ds).args.as_deref().unwrap(),
            [
                "-podresources-socket=/host-var/lib/kubelet/pod-resources/kubelet.sock",
                "-sleep-interval=3s",
            ]
        );
    }

    #[test]
    fn runs_as_root_with_escalation_but_no_capabilities() {
        let mut ds = DaemonSet::default();
        set_topology_daemonset_as_desired(&sample_nfd(), &mut ds).unwrap();

        let sc = container(&ds).security_context.as_ref().unwrap();
        assert_eq!(sc.run_as_user, Some(0));
        assert_eq!(sc.allow_privilege_escalation, Some(true));
        assert_eq!(
            sc.capabilities.as_ref().unwrap().drop.as_deref(),
            Some(&["ALL".to_string()][..])
        );
    }

    #[test]
    fn mounts_socket_and_sys() {
        let mut ds = DaemonSet::default();
        set_topology_daemonset_as_desired(&sample_nfd(), &mut ds).unwrap();

        let volumes = ds.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        let paths: Vec<_> = volumes
            .iter()
            .map(|v| v.host_path.as_ref().unwrap().path.as_str())
            .collect();
        assert_eq!(paths, [POD_RESOURCES_SOCKET, "/sys"]);
        assert_eq!(
            volumes[0].host_path.as_ref().unwrap().type_.as_deref(),
            Some("Socket")
        );
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let nfd = sample_nfd();
        let mut ds = DaemonSet::default();
        set_topology_daemonset_as_desired(&nfd, &mut ds).unwrap();
        let first = ds.clone();
        set_topology_daemonset_as_desired(&nfd, &mut ds).unwrap();
        assert_eq!(ds, first);
    }
}
