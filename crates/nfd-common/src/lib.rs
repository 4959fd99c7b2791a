//! Common types for the NFD operator: CRD, conditions, errors and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod poll;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer that gates physical removal of a NodeFeatureDiscovery until
/// managed resources are torn down and the optional prune Job has finished.
pub const NFD_FINALIZER: &str = "nfd.kubernetes.io/finalizer";

/// Field manager used for server-side apply by the operator
pub const FIELD_MANAGER: &str = "nfd-operator";

// =============================================================================
// Well-known managed resource names
// =============================================================================
// External tooling depends on these names. They are always created in the
// namespace of the owning NodeFeatureDiscovery.

/// Worker ConfigMap and DaemonSet name
pub const WORKER_NAME: &str = "nfd-worker";

/// Master Deployment name
pub const MASTER_NAME: &str = "nfd-master";

/// Garbage collector Deployment name
pub const GC_NAME: &str = "nfd-gc";

/// Topology updater DaemonSet name
pub const TOPOLOGY_UPDATER_NAME: &str = "nfd-topology-updater";

/// Prune Job name
pub const PRUNE_NAME: &str = "nfd-prune";

// =============================================================================
// Labels
// =============================================================================

/// Label selecting the pods of a managed workload
pub const LABEL_APP: &str = "app";

/// Standard Kubernetes managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label for resources created by this operator
pub const LABEL_MANAGED_BY_NFD: &str = "nfd-operator";

/// Default operand image when the NodeFeatureDiscovery does not specify one
pub const DEFAULT_OPERAND_IMAGE: &str = "registry.k8s.io/nfd/node-feature-discovery:v0.16.4";

/// Default gRPC port of nfd-master
pub const DEFAULT_SERVICE_PORT: i32 = 12000;
