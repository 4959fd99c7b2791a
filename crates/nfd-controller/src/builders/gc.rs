//! nfd-gc Deployment

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, GC_NAME};

use super::common::{
    apply_labels, label_selector, node_name_env, pod_template, restricted_security_context,
    set_controller_reference,
};

/// Populate the nfd-gc Deployment. Only the image and pull policy vary.
pub fn set_gc_deployment_as_desired(
    nfd: &NodeFeatureDiscovery,
    deployment: &mut Deployment,
) -> Result<(), Error> {
    let operand = &nfd.spec.operand;

    let container = Container {
        name: GC_NAME.to_string(),
        image: Some(operand.image().to_string()),
        image_pull_policy: Some(operand.pull_policy().to_string()),
        command: Some(vec!["nfd-gc".to_string()]),
        env: Some(vec![node_name_env()]),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        service_account_name: Some(GC_NAME.to_string()),
        containers: vec![container],
        ..Default::default()
    };

    apply_labels(&mut deployment.metadata, GC_NAME);
    deployment.spec = Some(DeploymentSpec {
        replicas: Some(1),
        selector: label_selector(GC_NAME),
        template: pod_template(GC_NAME, pod_spec),
        ..Default::default()
    });
    set_controller_reference(nfd, &mut deployment.metadata, "Deployment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::tests::sample_nfd;

    #[test]
    fn gc_ignores_master_settings() {
        let mut plain = Deployment::default();
        set_gc_deployment_as_desired(&sample_nfd(), &mut plain).unwrap();

        let mut nfd = sample_nfd();
        nfd.spec.enable_taints = true;
        nfd.spec.extra_label_ns = vec!["x".to_string()];
        nfd.spec.operand.service_port = Some(9999);
        let mut tuned = Deployment::default();
        set_gc_deployment_as_desired(&nfd, &mut tuned).unwrap();

        assert_eq!(plain, tuned);
    }

    #[test]
    fn image_follows_operand() {
        let mut nfd = sample_nfd();
        nfd.spec.operand.image = Some("example.com/nfd:v3".to_string());
        nfd.spec.operand.image_pull_policy = Some("Never".to_string());
        let mut deployment = Deployment::default();
        set_gc_deployment_as_desired(&nfd, &mut deployment).unwrap();

        let c = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(c.image.as_deref(), Some("example.com/nfd:v3"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("Never"));
        assert_eq!(c.command.as_deref().unwrap(), ["nfd-gc"]);
    }
}
