//! nfd-prune Job and Job state helpers
//!
//! The prune Job runs the master binary once with `-prune`, removing the
//! labels, annotations and extended resources NFD put on nodes.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, PRUNE_NAME};

use super::common::{
    apply_labels, control_plane_affinity, get_pods_tolerations, node_name_env, pod_template,
    restricted_security_context, set_controller_reference,
};

/// Upper bound on the prune Job's run time
pub const PRUNE_ACTIVE_DEADLINE_SECS: i64 = 600;

/// Populate the nfd-prune Job.
pub fn set_prune_job_as_desired(nfd: &NodeFeatureDiscovery, job: &mut Job) -> Result<(), Error> {
    let operand = &nfd.spec.operand;

    let container = Container {
        name: PRUNE_NAME.to_string(),
        image: Some(operand.image().to_string()),
        image_pull_policy: Some(operand.pull_policy().to_string()),
        command: Some(vec!["nfd-master".to_string()]),
        args: Some(vec!["-prune".to_string()]),
        env: Some(vec![node_name_env()]),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        service_account_name: Some(PRUNE_NAME.to_string()),
        containers: vec![container],
        restart_policy: Some("Never".to_string()),
        tolerations: Some(get_pods_tolerations(nfd)),
        affinity: Some(control_plane_affinity()),
        ..Default::default()
    };

    apply_labels(&mut job.metadata, PRUNE_NAME);
    job.spec = Some(JobSpec {
        completions: Some(1),
        parallelism: Some(1),
        active_deadline_seconds: Some(PRUNE_ACTIVE_DEADLINE_SECS),
        template: pod_template(PRUNE_NAME, pod_spec),
        ..Default::default()
    });
    set_controller_reference(nfd, &mut job.metadata, "Job")
}

/// Check if a Job has completed successfully
pub fn is_job_complete(job: &Job) -> bool {
    let Some(status) = job.status.as_ref() else {
        return false;
    };
    status.succeeded.unwrap_or(0) >= 1
        || status
            .conditions
            .as_ref()
            .is_some_and(|c| c.iter().any(|c| c.type_ == "Complete" && c.status == "True"))
}

/// Check if a Job has failed
pub fn is_job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|c| c.iter().any(|c| c.type_ == "Failed" && c.status == "True"))
}

/// Extract failure message from a failed Job
pub fn job_failure_message(job: &Job) -> Option<String> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
                .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
        })
}
