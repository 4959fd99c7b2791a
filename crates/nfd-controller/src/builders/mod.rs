//! Typed builders for every managed resource.
//!
//! Each builder fills a target object (fresh or fetched) from the
//! NodeFeatureDiscovery spec and sets the controller owner reference. Output
//! depends only on the spec, so rebuilding an already-built object is a no-op.
//! [`Component`] maps every managed resource to its name, kind and builder.

mod common;
mod config_map;
mod gc;
mod master;
mod prune;
mod topology;
mod worker;

pub use common::{
    control_plane_affinity, get_pods_tolerations, get_worker_tolerations,
    restricted_security_context, set_controller_reference, CONTROL_PLANE_ROLE_LABEL,
    MASTER_ROLE_LABEL,
};
pub use config_map::{set_config_map_as_desired, WORKER_CONFIG_KEY};
pub use gc::set_gc_deployment_as_desired;
pub use master::{master_args, set_master_deployment_as_desired};
pub use prune::{
    is_job_complete, is_job_failed, job_failure_message, set_prune_job_as_desired,
    PRUNE_ACTIVE_DEADLINE_SECS,
};
pub use topology::set_topology_daemonset_as_desired;
pub use worker::set_worker_daemonset_as_desired;

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{Error, GC_NAME, MASTER_NAME, PRUNE_NAME, TOPOLOGY_UPDATER_NAME, WORKER_NAME};

use crate::client::{ManagedObject, ResourceKind};

/// Annotation recording the hash of the content last written by the operator
pub const DESIRED_HASH_ANNOTATION: &str = "nfd.kubernetes.io/desired-hash";

/// A resource managed on behalf of a NodeFeatureDiscovery
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// nfd-worker ConfigMap
    WorkerConfig,
    /// nfd-worker DaemonSet
    Worker,
    /// nfd-master Deployment
    Master,
    /// nfd-gc Deployment
    Gc,
    /// nfd-topology-updater DaemonSet
    TopologyUpdater,
    /// nfd-prune Job
    Prune,
}

impl Component {
    /// Well-known object name
    pub const fn name(self) -> &'static str {
        match self {
            Self::WorkerConfig | Self::Worker => WORKER_NAME,
            Self::Master => MASTER_NAME,
            Self::Gc => GC_NAME,
            Self::TopologyUpdater => TOPOLOGY_UPDATER_NAME,
            Self::Prune => PRUNE_NAME,
        }
    }

    /// Object kind
    pub const fn kind(self) -> ResourceKind {
        match self {
            Self::WorkerConfig => ResourceKind::ConfigMap,
            Self::Worker | Self::TopologyUpdater => ResourceKind::DaemonSet,
            Self::Master | Self::Gc => ResourceKind::Deployment,
            Self::Prune => ResourceKind::Job,
        }
    }

    /// Human label used in logs and errors
    pub const fn label(self) -> &'static str {
        match self {
            Self::WorkerConfig => "worker ConfigMap",
            Self::Worker => "worker DaemonSet",
            Self::Master => "master Deployment",
            Self::Gc => "gc Deployment",
            Self::TopologyUpdater => "topology updater DaemonSet",
            Self::Prune => "prune Job",
        }
    }

    /// Zero-valued object for this component in `namespace`
    pub fn empty_object(self, namespace: &str) -> ManagedObject {
        ManagedObject::empty(self.kind(), self.name(), namespace)
    }

    /// Run this component's builder on `object`.
    ///
    /// Fails if `object` is of a different kind than the component manages.
    pub fn set_as_desired(
        self,
        nfd: &NodeFeatureDiscovery,
        object: &mut ManagedObject,
    ) -> Result<(), Error> {
        match (self, object) {
            (Self::WorkerConfig, ManagedObject::ConfigMap(cm)) => {
                set_config_map_as_desired(nfd, cm)
            }
            (Self::Worker, ManagedObject::DaemonSet(ds)) => set_worker_daemonset_as_desired(nfd, ds),
            (Self::TopologyUpdater, ManagedObject::DaemonSet(ds)) => {
                set_topology_daemonset_as_desired(nfd, ds)
            }
            (Self::Master, ManagedObject::Deployment(d)) => set_master_deployment_as_desired(nfd, d),
            (Self::Gc, ManagedObject::Deployment(d)) => set_gc_deployment_as_desired(nfd, d),
            (Self::Prune, ManagedObject::Job(job)) => set_prune_job_as_desired(nfd, job),
            (component, object) => Err(Error::internal_with_context(
                "set_as_desired",
                format!(
                    "{} cannot be built into a {}",
                    component.label(),
                    object.kind()
                ),
            )),
        }
    }

    /// Build this component from scratch
    pub fn desired(self, nfd: &NodeFeatureDiscovery, namespace: &str) -> Result<ManagedObject, Error> {
        let mut object = self.empty_object(namespace);
        self.set_as_desired(nfd, &mut object)?;
        Ok(object)
    }
}

fn to_json(object: &ManagedObject) -> Result<serde_json::Value, Error> {
    match object {
        ManagedObject::ConfigMap(o) => serde_json::to_value(o),
        ManagedObject::DaemonSet(o) => serde_json::to_value(o),
        ManagedObject::Deployment(o) => serde_json::to_value(o),
        ManagedObject::Job(o) => serde_json::to_value(o),
    }
    .map_err(|e| Error::serialization(format!("{} {}: {}", object.kind(), object.name(), e)))
}

/// Stable digest of a built object.
///
/// Recorded under [`DESIRED_HASH_ANNOTATION`] so a spec change is visible
/// without looking at the live content.
pub fn desired_hash(object: &ManagedObject) -> Result<String, Error> {
    let json = to_json(object)?.to_string();
    let hash = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, json.as_bytes());
    Ok(hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        }))
}

/// Whether `live` still carries every field the builder sets on `desired`.
///
/// Fields only present on `live` are ignored, which leaves room for server
/// defaults and status. Lists must match element by element. A field missing
/// from `live` matches a zero value on `desired`, as the API server omits those.
pub fn matches_desired(live: &ManagedObject, desired: &ManagedObject) -> Result<bool, Error> {
    Ok(covers(&to_json(live)?, &to_json(desired)?))
}

fn covers(live: &serde_json::Value, want: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (live, want) {
        (Value::Object(live), Value::Object(want)) => want.iter().all(|(key, w)| match live.get(key) {
            Some(l) => covers(l, w),
            None => is_zero(w),
        }),
        (Value::Array(live), Value::Array(want)) => {
            live.len() == want.len() && live.iter().zip(want).all(|(l, w)| covers(l, w))
        }
        (Value::Null, want) => is_zero(want),
        (live, want) => live == want,
    }
}

fn is_zero(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Hash recorded on a live object, if any
pub fn recorded_hash(object: &ManagedObject) -> Option<&str> {
    object
        .metadata()
        .annotations
        .as_ref()
        .and_then(|a| a.get(DESIRED_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Record `hash` on `object`
pub fn record_hash(object: &mut ManagedObject, hash: &str) {
    object
        .metadata_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(DESIRED_HASH_ANNOTATION.to_string(), hash.to_string());
}
