//! Controller wiring
//!
//! Watches NodeFeatureDiscovery objects plus every kind of resource they own,
//! so a change to a managed workload triggers a reconcile of its owner.

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_NFD};
use nfd_controller::{error_policy, reconcile, Context, ControllerConfig};

/// Timeout for watch requests in seconds.
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the NodeFeatureDiscovery controller until a shutdown signal arrives
pub async fn run_controller(
    client: Client,
    watch_namespace: Option<String>,
    config: ControllerConfig,
) {
    let namespace = watch_namespace.as_deref();
    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    // Owned objects are only ever created with the managed-by label
    let owned = || {
        watcher().labels(&format!("{}={}", LABEL_MANAGED_BY, LABEL_MANAGED_BY_NFD))
    };

    let ctx = Arc::new(Context::new(client.clone(), config));

    Controller::new(
        scoped_api::<NodeFeatureDiscovery>(&client, namespace),
        watcher(),
    )
    .owns(scoped_api::<ConfigMap>(&client, namespace), owned())
    .owns(scoped_api::<DaemonSet>(&client, namespace), owned())
    .owns(scoped_api::<Deployment>(&client, namespace), owned())
    .owns(scoped_api::<Job>(&client, namespace), owned())
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("NodeFeatureDiscovery"))
    .await;
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(object) => tracing::debug!(?object, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
