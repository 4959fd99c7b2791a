//! Reconciliation core of the NFD operator
//!
//! - [`builders`]: typed desired-state builders for every managed resource
//! - [`helper`]: per-component convergence, teardown and the prune Job
//! - [`status`]: condition set aggregation
//! - [`controller`]: the reconcile entry point and error policy

#![deny(missing_docs)]

pub mod builders;
pub mod client;
pub mod controller;
pub mod helper;
pub mod status;

pub use builders::Component;
pub use client::{ClusterApi, KubeClusterApi, ManagedObject, ResourceKind};
pub use controller::{error_policy, reconcile, Context, ControllerConfig};
pub use helper::{Outcome, ReconcileHelper};
