//! Per-component convergence, teardown and the prune Job lifecycle.
//!
//! A [`ReconcileHelper`] is built fresh for every reconcile call and borrows
//! everything it needs, so concurrent reconciles of different
//! NodeFeatureDiscovery objects share nothing.

use tracing::{debug, info, warn};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::poll::{wait_until, PollConfig};
use nfd_common::Error;

use crate::builders::{
    desired_hash, is_job_complete, is_job_failed, job_failure_message, matches_desired,
    record_hash, recorded_hash, Component,
};
use crate::client::{ClusterApi, ManagedObject};

/// What [`ReconcileHelper::ensure`] did to a component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The object did not exist and was created
    Created,
    /// The object existed with different content and was replaced
    Updated,
    /// The object already matched
    Unchanged,
}

/// Components deleted during teardown, in deletion order
const TEARDOWN: [Component; 5] = [
    Component::Worker,
    Component::WorkerConfig,
    Component::TopologyUpdater,
    Component::Master,
    Component::Gc,
];

/// Reconcile-scoped view of one NodeFeatureDiscovery and the cluster
pub struct ReconcileHelper<'a> {
    api: &'a dyn ClusterApi,
    nfd: &'a NodeFeatureDiscovery,
    namespace: &'a str,
    prune_poll: PollConfig,
}

impl<'a> ReconcileHelper<'a> {
    /// Create a helper for one reconcile pass
    pub fn new(
        api: &'a dyn ClusterApi,
        nfd: &'a NodeFeatureDiscovery,
        namespace: &'a str,
        prune_poll: PollConfig,
    ) -> Self {
        Self {
            api,
            nfd,
            namespace,
            prune_poll,
        }
    }

    fn wrap(&self, component: Component, err: Error) -> Error {
        Error::component(component.label(), component.name(), self.namespace, err)
    }

    /// Converge one component: create it when missing, replace it when the
    /// spec changed since the last write or the live object drifted from what
    /// the builder sets, otherwise leave it.
    pub async fn ensure(&self, component: Component) -> Result<Outcome, Error> {
        self.ensure_inner(component)
            .await
            .map_err(|e| self.wrap(component, e))
    }

    async fn ensure_inner(&self, component: Component) -> Result<Outcome, Error> {
        let name = component.name();
        let desired = component.desired(self.nfd, self.namespace)?;
        let hash = desired_hash(&desired)?;

        let Some(current) = self.api.get(component.kind(), name, self.namespace).await? else {
            let mut created = desired;
            record_hash(&mut created, &hash);
            self.api.create(&created).await?;
            info!(component = component.label(), name, namespace = %self.namespace, "created");
            return Ok(Outcome::Created);
        };

        if recorded_hash(&current) == Some(hash.as_str()) && matches_desired(&current, &desired)? {
            debug!(component = component.label(), name, "up to date");
            return Ok(Outcome::Unchanged);
        }

        // Build onto the fetched object so its resourceVersion guards the write
        let mut updated = current.clone();
        component.set_as_desired(self.nfd, &mut updated)?;
        record_hash(&mut updated, &hash);
        if updated == current {
            return Ok(Outcome::Unchanged);
        }

        self.api.update(&updated).await?;
        info!(component = component.label(), name, namespace = %self.namespace, "updated");
        Ok(Outcome::Updated)
    }

    /// Converge the nfd-master Deployment
    pub async fn handle_master(&self) -> Result<(), Error> {
        self.ensure(Component::Master).await.map(drop)
    }

    /// Converge the worker ConfigMap, then the worker DaemonSet
    pub async fn handle_worker(&self) -> Result<(), Error> {
        self.ensure(Component::WorkerConfig).await?;
        self.ensure(Component::Worker).await.map(drop)
    }

    /// Converge the topology updater when enabled.
    ///
    /// Disabling the flag does not delete an existing DaemonSet.
    pub async fn handle_topology(&self) -> Result<(), Error> {
        if !self.nfd.spec.topology_updater {
            return Ok(());
        }
        self.ensure(Component::TopologyUpdater).await.map(drop)
    }

    /// Converge the nfd-gc Deployment
    pub async fn handle_gc(&self) -> Result<(), Error> {
        self.ensure(Component::Gc).await.map(drop)
    }

    fn teardown_components(&self) -> impl Iterator<Item = Component> + '_ {
        TEARDOWN
            .into_iter()
            .filter(|c| *c != Component::TopologyUpdater || self.nfd.spec.topology_updater)
    }

    /// Delete every managed resource except the prune Job.
    ///
    /// All deletions are attempted; failures are joined.
    pub async fn delete_components(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        for component in self.teardown_components() {
            match self
                .api
                .delete(component.kind(), component.name(), self.namespace)
                .await
            {
                Ok(()) => debug!(component = component.label(), "delete requested"),
                Err(e) => errors.push(self.wrap(component, e)),
            }
        }
        Error::join(errors).map_or(Ok(()), Err)
    }

    /// Components from the teardown set that still exist
    pub async fn remaining_components(&self) -> Result<Vec<Component>, Error> {
        let mut remaining = Vec::new();
        for component in self.teardown_components() {
            let found = self
                .api
                .get(component.kind(), component.name(), self.namespace)
                .await
                .map_err(|e| self.wrap(component, e))?;
            if found.is_some() {
                remaining.push(component);
            }
        }
        Ok(remaining)
    }

    /// Drive the prune Job one step. Returns `true` once pruning is done.
    ///
    /// A failed Job is an error and is left in place for inspection. A
    /// completed Job counts as done as soon as its deletion is accepted; the
    /// wait for it to disappear is bounded and only logged when it expires.
    pub async fn handle_prune(&self) -> Result<bool, Error> {
        if !self.nfd.spec.prune_on_delete {
            warn!(
                namespace = %self.namespace,
                "pruneOnDelete is disabled, NFD labels stay on the nodes"
            );
            return Ok(true);
        }

        let component = Component::Prune;
        let current = self
            .api
            .get(component.kind(), component.name(), self.namespace)
            .await
            .map_err(|e| self.wrap(component, e))?;

        let job = match current {
            None => {
                let job = component
                    .desired(self.nfd, self.namespace)
                    .map_err(|e| self.wrap(component, e))?;
                self.api
                    .create(&job)
                    .await
                    .map_err(|e| self.wrap(component, e))?;
                info!(namespace = %self.namespace, "prune job created");
                return Ok(false);
            }
            Some(ManagedObject::Job(job)) => job,
            Some(other) => {
                return Err(self.wrap(
                    component,
                    Error::internal(format!("expected a Job, got a {}", other.kind())),
                ))
            }
        };

        if is_job_failed(&job) {
            let message = job_failure_message(&job).unwrap_or_else(|| "job failed".to_string());
            return Err(Error::prune_job_failed(
                self.namespace,
                component.name(),
                message,
            ));
        }

        if !is_job_complete(&job) {
            debug!(namespace = %self.namespace, "prune job still running");
            return Ok(false);
        }

        self.api
            .delete(component.kind(), component.name(), self.namespace)
            .await
            .map_err(|e| self.wrap(component, e))?;

        // Pruning has run once deletion is accepted; the wait is best effort.
        let (api, namespace) = (self.api, self.namespace);
        let gone = wait_until(&self.prune_poll, "prune job deletion", move || async move {
            Ok(api
                .get(component.kind(), component.name(), namespace)
                .await?
                .is_none())
        })
        .await;

        match gone {
            Ok(()) => info!(namespace = %self.namespace, "prune job finished and removed"),
            Err(e) => warn!(
                namespace = %self.namespace,
                error = %e,
                "prune job finished, its deletion is still in progress"
            ),
        }
        Ok(true)
    }
}
