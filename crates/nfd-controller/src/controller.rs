//! NodeFeatureDiscovery reconciler
//!
//! One pass converges master, worker, topology updater and gc, then rewrites
//! the condition set if it changed. Deletion is gated by [`NFD_FINALIZER`]:
//! managed resources are deleted first, then the optional prune Job runs, and
//! only then is the finalizer removed.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use nfd_common::crd::{NodeFeatureDiscovery, NodeFeatureDiscoveryStatus};
use nfd_common::poll::PollConfig;
use nfd_common::{Error, NFD_FINALIZER};

use crate::client::{ClusterApi, KubeClusterApi};
use crate::helper::ReconcileHelper;
use crate::status::{are_conditions_equal, get_conditions, is_available};

/// Requeue after adding the finalizer so the next pass sees the updated object
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Timing knobs for the reconciler
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Periodic resync once every component is available
    pub resync_interval: Duration,
    /// Requeue while components are progressing, degraded or being torn down
    pub progress_requeue: Duration,
    /// Requeue after a retryable error
    pub error_requeue: Duration,
    /// Wait for the prune Job to disappear after deletion
    pub prune_poll: PollConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60),
            progress_requeue: Duration::from_secs(10),
            error_requeue: Duration::from_secs(30),
            prune_poll: PollConfig::default(),
        }
    }
}

/// Controller context shared by every reconcile
pub struct Context {
    /// Cluster API (trait object for testability)
    pub api: Arc<dyn ClusterApi>,
    /// Timing configuration
    pub config: ControllerConfig,
}

impl Context {
    /// Create a context talking to the cluster through `client`
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            api: Arc::new(KubeClusterApi::new(client)),
            config,
        }
    }

    /// Create a context over any [`ClusterApi`] implementation
    pub fn with_api(api: Arc<dyn ClusterApi>, config: ControllerConfig) -> Self {
        Self { api, config }
    }

    /// Create a context for testing with a mock API and default timings
    #[cfg(test)]
    pub fn for_testing(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            api,
            config: ControllerConfig {
                prune_poll: PollConfig::new(Duration::from_millis(1), Duration::from_millis(50)),
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Finalizer helpers
// =============================================================================

async fn add_finalizer(nfd: &NodeFeatureDiscovery, ctx: &Context) -> Result<(), Error> {
    let mut updated = nfd.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(NFD_FINALIZER.to_string());
    ctx.api.update_nfd(&updated).await?;
    info!("added finalizer");
    Ok(())
}

async fn remove_finalizer(nfd: &NodeFeatureDiscovery, ctx: &Context) -> Result<(), Error> {
    let mut updated = nfd.clone();
    if let Some(finalizers) = updated.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != NFD_FINALIZER);
    }
    ctx.api.update_nfd(&updated).await?;
    info!("removed finalizer");
    Ok(())
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconcile a NodeFeatureDiscovery
#[instrument(skip(nfd, ctx), fields(nfd = %nfd.name_any(), namespace = ?nfd.namespace()))]
pub async fn reconcile(
    nfd: Arc<NodeFeatureDiscovery>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = nfd.name_any();
    let namespace = nfd.namespace().ok_or_else(|| {
        Error::internal_with_context("reconcile", "NodeFeatureDiscovery must be namespaced")
    })?;

    // The watch cache may lag behind our own finalizer writes
    let Some(nfd) = ctx.api.get_nfd(&name, &namespace).await? else {
        debug!("NodeFeatureDiscovery is gone");
        return Ok(Action::await_change());
    };

    if nfd.is_being_deleted() {
        return finalize(&nfd, &namespace, &ctx).await;
    }

    if !nfd.has_finalizer() {
        add_finalizer(&nfd, &ctx).await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let helper = ReconcileHelper::new(
        ctx.api.as_ref(),
        &nfd,
        &namespace,
        ctx.config.prune_poll.clone(),
    );

    let mut errors = Vec::new();
    if let Err(e) = helper.handle_master().await {
        errors.push(e);
    }
    if let Err(e) = helper.handle_worker().await {
        errors.push(e);
    }
    if let Err(e) = helper.handle_topology().await {
        errors.push(e);
    }
    if let Err(e) = helper.handle_gc().await {
        errors.push(e);
    }

    let available = match handle_status(&nfd, &name, &namespace, &ctx).await {
        Ok(available) => available,
        Err(e) => {
            errors.push(e);
            false
        }
    };

    if let Some(err) = Error::join(errors) {
        return Err(err);
    }

    if available {
        Ok(Action::requeue(ctx.config.resync_interval))
    } else {
        Ok(Action::requeue(ctx.config.progress_requeue))
    }
}

/// Recompute the condition set and write it when it changed.
///
/// Returns whether the deployment is available.
async fn handle_status(
    nfd: &NodeFeatureDiscovery,
    name: &str,
    namespace: &str,
    ctx: &Context,
) -> Result<bool, Error> {
    let conditions = get_conditions(ctx.api.as_ref(), nfd).await;
    let available = is_available(&conditions);

    if are_conditions_equal(nfd.conditions(), &conditions) {
        debug!("status unchanged, skipping update");
        return Ok(available);
    }

    let status = NodeFeatureDiscoveryStatus { conditions };
    ctx.api.patch_nfd_status(name, namespace, &status).await?;
    Ok(available)
}

/// Tear down a NodeFeatureDiscovery that is being deleted
async fn finalize(
    nfd: &NodeFeatureDiscovery,
    namespace: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    if !nfd.has_finalizer() {
        return Ok(Action::await_change());
    }

    let helper = ReconcileHelper::new(
        ctx.api.as_ref(),
        nfd,
        namespace,
        ctx.config.prune_poll.clone(),
    );

    helper.delete_components().await?;

    let remaining = helper.remaining_components().await?;
    if !remaining.is_empty() {
        info!(?remaining, "waiting for managed resources to be deleted");
        return Ok(Action::requeue(ctx.config.progress_requeue));
    }

    if !helper.handle_prune().await? {
        return Ok(Action::requeue(ctx.config.prune_poll.interval));
    }

    remove_finalizer(nfd, ctx).await?;
    Ok(Action::await_change())
}

/// Error policy for the NodeFeatureDiscovery controller
///
/// Retryable errors are requeued; the rest wait for the object to change.
pub fn error_policy(nfd: Arc<NodeFeatureDiscovery>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            error = %error,
            nfd = %nfd.name_any(),
            "reconcile failed, will retry"
        );
        Action::requeue(ctx.config.error_requeue)
    } else {
        error!(
            error = %error,
            nfd = %nfd.name_any(),
            "reconcile failed, waiting for a change"
        );
        Action::await_change()
    }
}
