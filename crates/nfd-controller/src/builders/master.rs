//! nfd-master Deployment

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, MASTER_NAME};

use super::common::{
    apply_labels, control_plane_affinity, get_pods_tolerations, label_selector, node_name_env,
    pod_template, restricted_security_context, set_controller_reference,
};

/// Command line of nfd-master.
///
/// `--port` is always present; every other flag only when it carries a value.
pub fn master_args(nfd: &NodeFeatureDiscovery) -> Vec<String> {
    let spec = &nfd.spec;
    let mut args = vec![format!("--port={}", spec.operand.service_port())];

    if !spec.extra_label_ns.is_empty() {
        args.push(format!("--extra-label-ns={}", spec.extra_label_ns.join(",")));
    }
    if !spec.resource_labels.is_empty() {
        args.push(format!("--resource-labels={}", spec.resource_labels.join(",")));
    }
    if let Some(whitelist) = spec
        .label_white_list
        .as_deref()
        .filter(|w| !w.trim().is_empty())
    {
        args.push(format!("--label-whitelist={}", whitelist));
    }
    if spec.enable_taints {
        args.push("--enable-taints".to_string());
    }
    args
}

/// Populate the nfd-master Deployment: a single replica preferring
/// control-plane nodes.
pub fn set_master_deployment_as_desired(
    nfd: &NodeFeatureDiscovery,
    deployment: &mut Deployment,
) -> Result<(), Error> {
    let operand = &nfd.spec.operand;

    let container = Container {
        name: MASTER_NAME.to_string(),
        image: Some(operand.image().to_string()),
        image_pull_policy: Some(operand.pull_policy().to_string()),
        command: Some(vec!["nfd-master".to_string()]),
        args: Some(master_args(nfd)),
        env: Some(vec![node_name_env()]),
        ports: Some(vec![ContainerPort {
            name: Some("grpc".to_string()),
            container_port: operand.service_port(),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        service_account_name: Some(MASTER_NAME.to_string()),
        containers: vec![container],
        tolerations: Some(get_pods_tolerations(nfd)),
        affinity: Some(control_plane_affinity()),
        ..Default::default()
    };

    apply_labels(&mut deployment.metadata, MASTER_NAME);
    deployment.spec = Some(DeploymentSpec {
        replicas: Some(1),
        selector: label_selector(MASTER_NAME),
        template: pod_template(MASTER_NAME, pod_spec),
        ..Default::default()
    });
    set_controller_reference(nfd, &mut deployment.metadata, "Deployment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::tests::sample_nfd;

    fn built(nfd: &NodeFeatureDiscovery) -> Deployment {
        let mut deployment = Deployment::default();
        set_master_deployment_as_desired(nfd, &mut deployment).unwrap();
        deployment
    }

    fn container(deployment: &Deployment) -> &Container {
        &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    #[test]
    fn default_args_are_just_the_port() {
        assert_eq!(master_args(&sample_nfd()), ["--port=12000"]);
    }

    #[test]
    fn args_include_only_flags_with_values() {
        let mut nfd = sample_nfd();
        nfd.spec.extra_label_ns = vec!["a".to_string(), "b".to_string()];
        nfd.spec.resource_labels = vec![];
        nfd.spec.label_white_list = Some("  ".to_string());
        nfd.spec.enable_taints = true;

        assert_eq!(
            master_args(&nfd),
            ["--port=12000", "--extra-label-ns=a,b", "--enable-taints"]
        );
    }

    #[test]
    fn every_flag_set_renders_in_fixed_order() {
        let mut nfd = sample_nfd();
        nfd.spec.operand.service_port = Some(12001);
        nfd.spec.extra_label_ns = vec!["vendor.io".to_string()];
        nfd.spec.resource_labels = vec!["gpu".to_string(), "fpga".to_string()];
        nfd.spec.label_white_list = Some("^cpu".to_string());
        nfd.spec.enable_taints = true;

        assert_eq!(
            master_args(&nfd),
            [
                "--port=12001",
                "--extra-label-ns=vendor.io",
                "--resource-labels=gpu,fpga",
                "--label-whitelist=^cpu",
                "--enable-taints",
            ]
        );
    }

    #[test]
    fn deployment_runs_one_master_replica() {
        let deployment = built(&sample_nfd());
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));

        let c = container(&deployment);
        assert_eq!(c.image.as_deref(), Some(nfd_common::DEFAULT_OPERAND_IMAGE));
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 12000);

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.tolerations.as_ref().unwrap().len(), 2);
        assert!(pod.affinity.is_some());
    }

    #[test]
    fn selector_matches_template_labels() {
        let deployment = built(&sample_nfd());
        let spec = deployment.spec.unwrap();
        assert_eq!(
            spec.selector.match_labels,
            spec.template.metadata.unwrap().labels
        );
    }

    #[test]
    fn rebuilding_a_populated_deployment_is_idempotent() {
        let nfd = sample_nfd();
        let mut deployment = built(&nfd);
        deployment.metadata.resource_version = Some("42".to_string());
        let first = deployment.clone();
        set_master_deployment_as_desired(&nfd, &mut deployment).unwrap();
        assert_eq!(deployment, first);
    }
}
