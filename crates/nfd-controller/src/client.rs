//! Cluster API collaborator
//!
//! The reconciliation core only ever talks to the API server through
//! [`ClusterApi`]: get/create/update/delete by namespaced name, with not-found
//! reported as `Ok(None)` on reads and as success on deletes. Updates carry the
//! resourceVersion of the object they were built from, so a stale write fails
//! with a conflict instead of clobbering someone else's change.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use nfd_common::crd::{NodeFeatureDiscovery, NodeFeatureDiscoveryStatus};
use nfd_common::{Error, FIELD_MANAGER};

/// Kinds of managed resources the operator creates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// core/v1 ConfigMap
    ConfigMap,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 Deployment
    Deployment,
    /// batch/v1 Job
    Job,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::DaemonSet => write!(f, "DaemonSet"),
            Self::Deployment => write!(f, "Deployment"),
            Self::Job => write!(f, "Job"),
        }
    }
}

/// A managed resource of any supported kind
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    /// A ConfigMap
    ConfigMap(ConfigMap),
    /// A DaemonSet
    DaemonSet(DaemonSet),
    /// A Deployment
    Deployment(Deployment),
    /// A Job
    Job(Job),
}

impl ManagedObject {
    /// Zero-valued object of the given kind carrying only its name and namespace
    pub fn empty(kind: ResourceKind, name: &str, namespace: &str) -> Self {
        let metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        match kind {
            ResourceKind::ConfigMap => Self::ConfigMap(ConfigMap {
                metadata,
                ..Default::default()
            }),
            ResourceKind::DaemonSet => Self::DaemonSet(DaemonSet {
                metadata,
                ..Default::default()
            }),
            ResourceKind::Deployment => Self::Deployment(Deployment {
                metadata,
                ..Default::default()
            }),
            ResourceKind::Job => Self::Job(Job {
                metadata,
                ..Default::default()
            }),
        }
    }

    /// Kind of the wrapped object
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
            Self::DaemonSet(_) => ResourceKind::DaemonSet,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Job(_) => ResourceKind::Job,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ConfigMap(o) => &o.metadata,
            Self::DaemonSet(o) => &o.metadata,
            Self::Deployment(o) => &o.metadata,
            Self::Job(o) => &o.metadata,
        }
    }

    /// Mutable object metadata
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ConfigMap(o) => &mut o.metadata,
            Self::DaemonSet(o) => &mut o.metadata,
            Self::Deployment(o) => &mut o.metadata,
            Self::Job(o) => &mut o.metadata,
        }
    }

    /// Object name, empty if unset
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, empty if unset
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }
}

/// Trait abstracting the object store for the NFD operator
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a NodeFeatureDiscovery by name and namespace
    async fn get_nfd(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<NodeFeatureDiscovery>, Error>;

    /// Replace a NodeFeatureDiscovery (metadata and spec), guarded by its resourceVersion
    async fn update_nfd(&self, nfd: &NodeFeatureDiscovery) -> Result<NodeFeatureDiscovery, Error>;

    /// Overwrite the status of a NodeFeatureDiscovery
    async fn patch_nfd_status(
        &self,
        name: &str,
        namespace: &str,
        status: &NodeFeatureDiscoveryStatus,
    ) -> Result<(), Error>;

    /// Get a managed resource; `Ok(None)` when it does not exist
    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ManagedObject>, Error>;

    /// Create a managed resource
    async fn create(&self, object: &ManagedObject) -> Result<(), Error>;

    /// Replace a managed resource, guarded by its resourceVersion
    async fn update(&self, object: &ManagedObject) -> Result<(), Error>;

    /// Delete a managed resource; deleting a missing resource succeeds
    async fn delete(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_typed<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create_typed<K>(&self, object: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let namespace = object.meta().namespace.as_deref().unwrap_or_default();
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn replace_typed<K>(&self, object: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let meta = object.meta();
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn delete_typed<K>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        // Background propagation so a deleted Job takes its pods with it
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(name = %name, namespace = %namespace, "already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_nfd(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<NodeFeatureDiscovery>, Error> {
        self.get_typed::<NodeFeatureDiscovery>(name, namespace)
            .await
    }

    async fn update_nfd(&self, nfd: &NodeFeatureDiscovery) -> Result<NodeFeatureDiscovery, Error> {
        let namespace = nfd.metadata.namespace.as_deref().unwrap_or_default();
        let name = nfd.metadata.name.as_deref().unwrap_or_default();
        let updated = self
            .api::<NodeFeatureDiscovery>(namespace)
            .replace(name, &PostParams::default(), nfd)
            .await?;
        Ok(updated)
    }

    async fn patch_nfd_status(
        &self,
        name: &str,
        namespace: &str,
        status: &NodeFeatureDiscoveryStatus,
    ) -> Result<(), Error> {
        let api: Api<NodeFeatureDiscovery> = self.api(namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ManagedObject>, Error> {
        let object = match kind {
            ResourceKind::ConfigMap => self
                .get_typed::<ConfigMap>(name, namespace)
                .await?
                .map(ManagedObject::ConfigMap),
            ResourceKind::DaemonSet => self
                .get_typed::<DaemonSet>(name, namespace)
                .await?
                .map(ManagedObject::DaemonSet),
            ResourceKind::Deployment => self
                .get_typed::<Deployment>(name, namespace)
                .await?
                .map(ManagedObject::Deployment),
            ResourceKind::Job => self
                .get_typed::<Job>(name, namespace)
                .await?
                .map(ManagedObject::Job),
        };
        Ok(object)
    }

    async fn create(&self, object: &ManagedObject) -> Result<(), Error> {
        match object {
            ManagedObject::ConfigMap(o) => self.create_typed(o).await,
            ManagedObject::DaemonSet(o) => self.create_typed(o).await,
            ManagedObject::Deployment(o) => self.create_typed(o).await,
            ManagedObject::Job(o) => self.create_typed(o).await,
        }
    }

    async fn update(&self, object: &ManagedObject) -> Result<(), Error> {
        match object {
            ManagedObject::ConfigMap(o) => self.replace_typed(o).await,
            ManagedObject::DaemonSet(o) => self.replace_typed(o).await,
            ManagedObject::Deployment(o) => self.replace_typed(o).await,
            ManagedObject::Job(o) => self.replace_typed(o).await,
        }
    }

    async fn delete(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<(), Error> {
        match kind {
            ResourceKind::ConfigMap => self.delete_typed::<ConfigMap>(name, namespace).await,
            ResourceKind::DaemonSet => self.delete_typed::<DaemonSet>(name, namespace).await,
            ResourceKind::Deployment => self.delete_typed::<Deployment>(name, namespace).await,
            ResourceKind::Job => self.delete_typed::<Job>(name, namespace).await,
        }
    }
}
