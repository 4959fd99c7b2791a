//! Status aggregation
//!
//! Condition sets are recomputed from the live managed resources on every
//! pass. Components are checked in a fixed order and the first one that is not
//! healthy decides the result.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use tracing::debug;

use nfd_common::crd::{Condition, ConditionStatus, ConditionType, NodeFeatureDiscovery};
use nfd_common::{GC_NAME, MASTER_NAME, TOPOLOGY_UPDATER_NAME, WORKER_NAME};

use crate::client::{ClusterApi, ManagedObject, ResourceKind};

/// Reason on every condition when all components are healthy
pub const REASON_AVAILABLE: &str = "AllComponentsAvailable";

/// Outcome of checking one component
#[derive(Clone, Debug, PartialEq, Eq)]
enum Health {
    Healthy,
    Progressing { reason: String, message: String },
    Degraded { reason: String, message: String },
}

/// A component whose live status feeds the condition set
#[derive(Clone, Copy, Debug)]
struct Check {
    subject: &'static str,
    kind: ResourceKind,
    name: &'static str,
}

const WORKER_CHECK: Check = Check {
    subject: "NFDWorkerDaemonSet",
    kind: ResourceKind::DaemonSet,
    name: WORKER_NAME,
};

const MASTER_CHECK: Check = Check {
    subject: "NFDMasterDeployment",
    kind: ResourceKind::Deployment,
    name: MASTER_NAME,
};

const GC_CHECK: Check = Check {
    subject: "NFDGCDeployment",
    kind: ResourceKind::Deployment,
    name: GC_NAME,
};

const TOPOLOGY_CHECK: Check = Check {
    subject: "NFDTopologyUpdaterDaemonSet",
    kind: ResourceKind::DaemonSet,
    name: TOPOLOGY_UPDATER_NAME,
};

// =============================================================================
// Condition sets
// =============================================================================

/// Every component is deployed and ready
pub fn available_conditions() -> Vec<Condition> {
    let message = "all NFD components are deployed and ready";
    vec![
        Condition::new(ConditionType::Available, ConditionStatus::True, REASON_AVAILABLE, message),
        Condition::new(ConditionType::Progressing, ConditionStatus::False, REASON_AVAILABLE, message),
        Condition::new(ConditionType::Degraded, ConditionStatus::False, REASON_AVAILABLE, message),
        Condition::new(ConditionType::Upgradeable, ConditionStatus::True, REASON_AVAILABLE, message),
    ]
}

/// A component is broken or could not be observed
pub fn degraded_conditions(reason: &str, message: &str) -> Vec<Condition> {
    vec![
        Condition::new(ConditionType::Available, ConditionStatus::False, reason, message),
        Condition::new(ConditionType::Progressing, ConditionStatus::False, reason, message),
        Condition::new(ConditionType::Degraded, ConditionStatus::True, reason, message),
        Condition::new(ConditionType::Upgradeable, ConditionStatus::False, reason, message),
    ]
}

/// A component is still rolling out
pub fn progressing_conditions(reason: &str, message: &str) -> Vec<Condition> {
    vec![
        Condition::new(ConditionType::Available, ConditionStatus::False, reason, message),
        Condition::new(ConditionType::Progressing, ConditionStatus::True, reason, message),
        Condition::new(ConditionType::Degraded, ConditionStatus::False, reason, message),
        Condition::new(ConditionType::Upgradeable, ConditionStatus::False, reason, message),
    ]
}

/// Compare two condition sets ignoring transition times
pub fn are_conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_state(y))
}

/// Whether the set reports Available=True
pub fn is_available(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == ConditionType::Available.as_str() && c.status == ConditionStatus::True)
}

// =============================================================================
// Health rules
// =============================================================================

fn daemonset_health(ds: &DaemonSet, subject: &str) -> Health {
    let status = ds.status.clone().unwrap_or_default();

    if status.desired_number_scheduled == 0 {
        return Health::Degraded {
            reason: format!("{}Degraded", subject),
            message: format!("{} has no desired nodes", subject),
        };
    }
    if status.current_number_scheduled == 0 {
        return Health::Degraded {
            reason: format!("{}Degraded", subject),
            message: format!("{}: 0 nodes have pods scheduled", subject),
        };
    }
    if status.number_ready == status.desired_number_scheduled {
        return Health::Healthy;
    }
    Health::Progressing {
        reason: format!("{}Progressing", subject),
        message: format!(
            "{}: {} of {} pods ready",
            subject, status.number_ready, status.desired_number_scheduled
        ),
    }
}

fn deployment_health(deployment: &Deployment, subject: &str) -> Health {
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);

    if available == 0 {
        return Health::Degraded {
            reason: format!("{}Degraded", subject),
            message: format!("{} has no available replicas", subject),
        };
    }
    Health::Healthy
}

async fn check_component(api: &dyn ClusterApi, target: Check, namespace: &str) -> Health {
    let failed_getting = |message: String| Health::Degraded {
        reason: format!("FailedGetting{}", target.subject),
        message,
    };

    match api.get(target.kind, target.name, namespace).await {
        Err(e) => failed_getting(e.to_string()),
        Ok(None) => failed_getting(format!("{} {}/{} not found", target.kind, namespace, target.name)),
        Ok(Some(ManagedObject::DaemonSet(ds))) => daemonset_health(&ds, target.subject),
        Ok(Some(ManagedObject::Deployment(d))) => deployment_health(&d, target.subject),
        Ok(Some(other)) => failed_getting(format!(
            "expected a {}, got a {}",
            target.kind,
            other.kind()
        )),
    }
}

/// Compute the condition set for `nfd` from the live managed resources.
///
/// Checks the worker DaemonSet, master Deployment, gc Deployment and, when
/// enabled, the topology updater DaemonSet. Stops at the first component that
/// is not healthy.
pub async fn get_conditions(api: &dyn ClusterApi, nfd: &NodeFeatureDiscovery) -> Vec<Condition> {
    let namespace = nfd.metadata.namespace.as_deref().unwrap_or_default();

    let mut checks = vec![WORKER_CHECK, MASTER_CHECK, GC_CHECK];
    if nfd.spec.topology_updater {
        checks.push(TOPOLOGY_CHECK);
    }

    for c in checks {
        match check_component(api, c, namespace).await {
            Health::Healthy => continue,
            Health::Progressing { reason, message } => {
                debug!(component = c.subject, %message, "progressing");
                return progressing_conditions(&reason, &message);
            }
            Health::Degraded { reason, message } => {
                debug!(component = c.subject, %message, "degraded");
                return degraded_conditions(&reason, &message);
            }
        }
    }

    available_conditions()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::apps::v1::{DaemonSetStatus, DeploymentStatus};
    use mockall::predicate::eq;

    use crate::builders::tests::sample_nfd;
    use crate::client::MockClusterApi;
    use nfd_common::Error;

    fn daemonset(desired: i32, current: i32, ready: i32) -> ManagedObject {
        ManagedObject::DaemonSet(DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                current_number_scheduled: current,
                number_ready: ready,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn deployment(available: i32) -> ManagedObject {
        ManagedObject::Deployment(Deployment {
            status: Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn condition<'a>(set: &'a [Condition], type_: ConditionType) -> &'a Condition {
        set.iter().find(|c| c.type_ == type_.as_str()).unwrap()
    }

    fn healthy_api() -> MockClusterApi {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .with(eq(ResourceKind::DaemonSet), eq(WORKER_NAME), eq("nfd"))
            .returning(|_, _, _| Ok(Some(daemonset(3, 3, 3))));
        api.expect_get()
            .with(eq(ResourceKind::Deployment), eq(MASTER_NAME), eq("nfd"))
            .returning(|_, _, _| Ok(Some(deployment(1))));
        api.expect_get()
            .with(eq(ResourceKind::Deployment), eq(GC_NAME), eq("nfd"))
            .returning(|_, _, _| Ok(Some(deployment(1))));
        api
    }

    #[test]
    fn condition_sets_always_have_four_entries_in_order() {
        for set in [
            available_conditions(),
            degraded_conditions("R", "m"),
            progressing_conditions("R", "m"),
        ] {
            let types: Vec<_> = set.iter().map(|c| c.type_.as_str()).collect();
            assert_eq!(types, ["Available", "Progressing", "Degraded", "Upgradeable"]);
        }
    }

    #[test]
    fn equality_ignores_transition_time() {
        let a = degraded_conditions("Broken", "worker broke");
        let mut b = a.clone();
        for c in &mut b {
            c.last_transition_time = c.last_transition_time - Duration::minutes(5);
        }
        assert!(are_conditions_equal(&a, &b));
        assert!(!are_conditions_equal(&a, &available_conditions()));
        assert!(!are_conditions_equal(&a, &a[..3]));
    }

    #[tokio::test]
    async fn all_healthy_is_available() {
        let api = healthy_api();
        let conditions = get_conditions(&api, &sample_nfd()).await;

        assert!(is_available(&conditions));
        assert_eq!(condition(&conditions, ConditionType::Upgradeable).status, ConditionStatus::True);
        assert_eq!(condition(&conditions, ConditionType::Progressing).status, ConditionStatus::False);
        assert_eq!(condition(&conditions, ConditionType::Degraded).status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn worker_fetch_failure_short_circuits() {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .with(eq(ResourceKind::DaemonSet), eq(WORKER_NAME), eq("nfd"))
            .times(1)
            .returning(|_, _, _| Err(Error::internal("connection refused")));

        let mut nfd = sample_nfd();
        nfd.spec.topology_updater = true;
        let conditions = get_conditions(&api, &nfd).await;

        assert!(are_conditions_equal(
            &conditions,
            &degraded_conditions(
                "FailedGettingNFDWorkerDaemonSet",
                &Error::internal("connection refused").to_string()
            )
        ));
    }

    #[tokio::test]
    async fn missing_master_is_reported_as_failed_getting() {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .with(eq(ResourceKind::DaemonSet), eq(WORKER_NAME), eq("nfd"))
            .times(1)
            .returning(|_, _, _| Ok(Some(daemonset(1, 1, 1))));
        api.expect_get()
            .with(eq(ResourceKind::Deployment), eq(MASTER_NAME), eq("nfd"))
            .times(1)
            .returning(|_, _, _| Ok(None));

        let conditions = get_conditions(&api, &sample_nfd()).await;
        let degraded = condition(&conditions, ConditionType::Degraded);
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, "FailedGettingNFDMasterDeployment");
    }

    #[tokio::test]
    async fn worker_without_desired_nodes_is_degraded() {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .times(1)
            .returning(|_, _, _| Ok(Some(daemonset(0, 0, 0))));

        let conditions = get_conditions(&api, &sample_nfd()).await;
        let degraded = condition(&conditions, ConditionType::Degraded);
        assert_eq!(degraded.status, ConditionStatus::True);
        assert!(degraded.message.contains("no desired nodes"));
    }

    #[tokio::test]
    async fn worker_with_nothing_scheduled_is_degraded() {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .times(1)
            .returning(|_, _, _| Ok(Some(daemonset(3, 0, 0))));

        let conditions = get_conditions(&api, &sample_nfd()).await;
        assert!(condition(&conditions, ConditionType::Degraded)
            .message
            .contains("0 nodes have pods scheduled"));
    }

    #[tokio::test]
    async fn partially_ready_worker_is_progressing() {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .times(1)
            .returning(|_, _, _| Ok(Some(daemonset(3, 3, 1))));

        let conditions = get_conditions(&api, &sample_nfd()).await;
        let progressing = condition(&conditions, ConditionType::Progressing);
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.reason, "NFDWorkerDaemonSetProgressing");
        assert!(!is_available(&conditions));
    }

    #[tokio::test]
    async fn gc_without_replicas_is_degraded() {
        let mut api = MockClusterApi::new();
        api.expect_get()
            .with(eq(ResourceKind::DaemonSet), eq(WORKER_NAME), eq("nfd"))
            .returning(|_, _, _| Ok(Some(daemonset(2, 2, 2))));
        api.expect_get()
            .with(eq(ResourceKind::Deployment), eq(MASTER_NAME), eq("nfd"))
            .returning(|_, _, _| Ok(Some(deployment(1))));
        api.expect_get()
            .with(eq(ResourceKind::Deployment), eq(GC_NAME), eq("nfd"))
            .times(1)
            .returning(|_, _, _| Ok(Some(deployment(0))));

        let conditions = get_conditions(&api, &sample_nfd()).await;
        assert_eq!(
            condition(&conditions, ConditionType::Degraded).reason,
            "NFDGCDeploymentDegraded"
        );
    }

    #[tokio::test]
    async fn topology_updater_is_checked_only_when_enabled() {
        let mut api = healthy_api();
        api.expect_get()
            .with(eq(ResourceKind::DaemonSet), eq(TOPOLOGY_UPDATER_NAME), eq("nfd"))
            .times(1)
            .returning(|_, _, _| Ok(Some(daemonset(3, 3, 2))));

        let mut nfd = sample_nfd();
        nfd.spec.topology_updater = true;
        let conditions = get_conditions(&api, &nfd).await;
        assert_eq!(
            condition(&conditions, ConditionType::Progressing).reason,
            "NFDTopologyUpdaterDaemonSetProgressing"
        );
    }
}
