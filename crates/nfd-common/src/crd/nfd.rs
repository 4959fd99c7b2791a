//! NodeFeatureDiscovery CRD
//!
//! A NodeFeatureDiscovery declares one deployment of the NFD operands
//! (master, worker, gc and optionally the topology updater) in its namespace.

use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::{DEFAULT_OPERAND_IMAGE, DEFAULT_SERVICE_PORT, NFD_FINALIZER};

/// Desired state of an NFD deployment.
///
/// Example:
/// ```yaml
/// apiVersion: nfd.kubernetes.io/v1
/// kind: NodeFeatureDiscovery
/// metadata:
///   name: nfd-instance
///   namespace: node-feature-discovery
/// spec:
///   operand:
///     image: registry.k8s.io/nfd/node-feature-discovery:v0.16.4
///     imagePullPolicy: IfNotPresent
///     servicePort: 12000
///   topologyUpdater: true
///   pruneOnDelete: true
///   extraLabelNs: ["vendor.example.com"]
///   workerConfig:
///     configData: |
///       core:
///         sleepInterval: 60s
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nfd.kubernetes.io",
    version = "v1",
    kind = "NodeFeatureDiscovery",
    plural = "nodefeaturediscoveries",
    shortname = "nfd",
    namespaced,
    status = "NodeFeatureDiscoveryStatus",
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Degraded","type":"string","jsonPath":".status.conditions[?(@.type==\"Degraded\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeFeatureDiscoverySpec {
    /// Operand image and networking parameters
    #[serde(default)]
    pub operand: OperandSpec,

    /// Worker configuration, copied verbatim into the nfd-worker ConfigMap
    #[serde(default)]
    pub worker_config: WorkerConfigSpec,

    /// Deploy the topology updater DaemonSet
    #[serde(default)]
    pub topology_updater: bool,

    /// Run the prune Job to remove NFD labels from nodes before deletion completes
    #[serde(default)]
    pub prune_on_delete: bool,

    /// Extra label namespaces nfd-master accepts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_label_ns: Vec<String>,

    /// Extended resources nfd-master creates from feature labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_labels: Vec<String>,

    /// Regular expression filtering the labels nfd-master publishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_white_list: Option<String>,

    /// Allow nfd-master to set node taints
    #[serde(default)]
    pub enable_taints: bool,

    /// Extra tolerations for nfd-master and the prune Job, after the control-plane defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Extra tolerations for nfd-worker, after the tolerate-all-NoSchedule default
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_tolerations: Vec<Toleration>,
}

/// Operand parameters shared by every generated pod spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandSpec {
    /// Container image of the NFD operands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy: Always, Never or IfNotPresent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// gRPC port nfd-master listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
}

impl OperandSpec {
    /// Image to run, falling back to the default operand image when unset or blank
    pub fn image(&self) -> &str {
        match self.image.as_deref() {
            Some(image) if !image.trim().is_empty() => image,
            _ => DEFAULT_OPERAND_IMAGE,
        }
    }

    /// Pull policy recognized verbatim, `Always` for anything else
    pub fn pull_policy(&self) -> &'static str {
        match self.image_pull_policy.as_deref() {
            Some("Never") => "Never",
            Some("IfNotPresent") => "IfNotPresent",
            _ => "Always",
        }
    }

    /// Master port, `12000` unless set to a positive value
    pub fn service_port(&self) -> i32 {
        match self.service_port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_SERVICE_PORT,
        }
    }
}

/// nfd-worker configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfigSpec {
    /// Raw nfd-worker.conf contents; not parsed by the operator
    #[serde(default)]
    pub config_data: String,
}

/// Observed state of an NFD deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeFeatureDiscoveryStatus {
    /// Available, Progressing, Degraded and Upgradeable, always all four
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl NodeFeatureDiscovery {
    /// Whether the operator finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == NFD_FINALIZER))
    }

    /// Whether deletion has been requested
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Current conditions, empty when no status was written yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
