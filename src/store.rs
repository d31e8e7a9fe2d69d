//! Cluster object store
//!
//! Read-only access to the two object shapes the checks need: service
//! accounts (for their annotations) and workloads (for the service account
//! their pod template runs as).

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{PodTemplateSpec, ServiceAccount};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::workload::{Workload, WorkloadKind};
use crate::{Error, Result};

/// A Kubernetes service account as seen by the checks
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceAccountIdentity {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Annotations; empty when the object has none
    pub annotations: BTreeMap<String, String>,
}

impl ServiceAccountIdentity {
    /// Create an identity without annotations
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Value of `key` if present and non-empty
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl From<ServiceAccount> for ServiceAccountIdentity {
    fn from(sa: ServiceAccount) -> Self {
        Self {
            namespace: sa.metadata.namespace.unwrap_or_default(),
            name: sa.metadata.name.unwrap_or_default(),
            annotations: sa.metadata.annotations.unwrap_or_default(),
        }
    }
}

/// Trait abstracting reads from the cluster's object store
///
/// This trait allows mocking the Kubernetes API in tests while using the
/// real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a service account; `Ok(None)` when it does not exist
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccountIdentity>>;

    /// Get the `serviceAccountName` from a workload's pod template.
    ///
    /// `Ok(None)` when the template leaves it unset. A missing workload is
    /// [`Error::NotFound`].
    async fn get_workload_service_account(&self, workload: &Workload) -> Result<Option<String>>;
}

/// [`ObjectStore`] over a kube-rs client
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_namespaced<K>(&self, workload: &Workload) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        match api.get(&workload.name).await {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::not_found(
                workload.kind.as_str(),
                &workload.namespace,
                &workload.name,
                ae.message,
            )),
            Err(e) => Err(e.into()),
        }
    }
}

fn template_service_account(template: Option<PodTemplateSpec>) -> Option<String> {
    template
        .and_then(|t| t.spec)
        .and_then(|spec| spec.service_account_name)
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    #[instrument(skip(self))]
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccountIdentity>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(sa) => Ok(Some(sa.into())),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace, name, "service account not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, workload), fields(kind = %workload.kind, namespace = %workload.namespace, name = %workload.name))]
    async fn get_workload_service_account(&self, workload: &Workload) -> Result<Option<String>> {
        let template = match workload.kind {
            WorkloadKind::Deployment => self
                .get_namespaced::<Deployment>(workload)
                .await?
                .spec
                .map(|s| s.template),
            WorkloadKind::StatefulSet => self
                .get_namespaced::<StatefulSet>(workload)
                .await?
                .spec
                .map(|s| s.template),
            WorkloadKind::DaemonSet => self
                .get_namespaced::<DaemonSet>(workload)
                .await?
                .spec
                .map(|s| s.template),
            WorkloadKind::Job => self
                .get_namespaced::<Job>(workload)
                .await?
                .spec
                .map(|s| s.template),
            WorkloadKind::CronJob => self
                .get_namespaced::<CronJob>(workload)
                .await?
                .spec
                .and_then(|s| s.job_template.spec)
                .map(|s| s.template),
        };
        Ok(template_service_account(template))
    }
}
