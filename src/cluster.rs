//! Cluster inspection
//!
//! Reads the GKE cluster record and reduces it to the federation settings the
//! checks depend on. A cluster without Workload Identity is a valid, checkable
//! state, so a missing `workloadIdentityConfig` or empty pool is reported as
//! `enabled = false` rather than an error.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::CheckConfig;
use crate::gcp::{resource_url, GoogleApiClient};
use crate::{Error, Result};

// =============================================================================
// Types
// =============================================================================

/// Cluster record as returned by the GKE control-plane service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    /// Cluster name
    #[serde(default)]
    pub name: String,
    /// Region or zone
    #[serde(default)]
    pub location: String,
    /// API server endpoint (host or IP, no scheme)
    #[serde(default)]
    pub endpoint: String,
    /// Control-plane auth material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_auth: Option<MasterAuth>,
    /// Workload Identity settings; absent when the feature is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_identity_config: Option<WorkloadIdentityConfig>,
}

/// Control-plane auth material
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAuth {
    /// Base64-encoded PEM CA certificate of the API server
    #[serde(default)]
    pub cluster_ca_certificate: String,
}

/// Workload Identity settings of a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentityConfig {
    /// Workload pool, e.g. `my-project.svc.id.goog`
    #[serde(default)]
    pub workload_pool: String,
}

/// Federation settings of one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterFederationConfig {
    /// Whether Workload Identity is enabled
    pub enabled: bool,
    /// Workload pool; empty when disabled
    pub pool_identifier: String,
}

impl ClusterFederationConfig {
    /// A cluster without federation
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            pool_identifier: String::new(),
        }
    }

    /// A cluster federated through `pool`
    pub fn enabled(pool: impl Into<String>) -> Self {
        Self {
            enabled: true,
            pool_identifier: pool.into(),
        }
    }
}

impl ClusterRecord {
    /// Reduce the record to its federation settings
    pub fn federation(&self) -> ClusterFederationConfig {
        match &self.workload_identity_config {
            Some(wi) if !wi.workload_pool.is_empty() => {
                ClusterFederationConfig::enabled(wi.workload_pool.clone())
            }
            _ => ClusterFederationConfig::disabled(),
        }
    }

    /// Base64 CA certificate, if the record carries one
    pub fn ca_certificate(&self) -> Option<&str> {
        self.master_auth
            .as_ref()
            .map(|m| m.cluster_ca_certificate.as_str())
            .filter(|c| !c.is_empty())
    }
}

// =============================================================================
// Control-plane seam
// =============================================================================

/// Trait abstracting the GKE control-plane query
///
/// This trait allows mocking the control plane in tests while using the REST
/// API in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Fetch the cluster record at the config's coordinates
    async fn get_cluster(&self, config: &CheckConfig) -> Result<ClusterRecord>;
}

/// GKE control plane over REST
#[derive(Clone, Debug)]
pub struct GkeClusterManager {
    client: GoogleApiClient,
}

impl GkeClusterManager {
    /// Create a manager using the given API client
    pub fn new(client: GoogleApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterManager for GkeClusterManager {
    #[instrument(skip(self), fields(cluster = %config.cluster_resource_name()))]
    async fn get_cluster(&self, config: &CheckConfig) -> Result<ClusterRecord> {
        let resource = config.cluster_resource_name();
        let url = resource_url(
            &self.client.endpoints().container,
            [
                "v1",
                "projects",
                config.project.as_str(),
                "locations",
                config.location.as_str(),
                "clusters",
                config.cluster.as_str(),
            ],
        )
        .map_err(|e| Error::cluster_lookup(&resource, e.to_string()))?;
        self.client
            .get_json(url)
            .await
            .map_err(|e| Error::cluster_lookup(resource, e.to_string()))
    }
}

/// A cluster record fetched earlier in the same invocation
///
/// The CLI needs the record to connect to the API server before verification
/// starts; this hands the same snapshot to the inspector instead of asking the
/// control plane twice.
#[derive(Clone, Debug)]
pub struct FetchedCluster(pub ClusterRecord);

#[async_trait]
impl ClusterManager for FetchedCluster {
    async fn get_cluster(&self, _config: &CheckConfig) -> Result<ClusterRecord> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Inspector
// =============================================================================

/// Fetch the cluster and return its federation settings.
///
/// Lookup failures propagate as [`Error::ClusterLookup`]; no default
/// configuration is inferred.
pub async fn inspect<M>(manager: &M, config: &CheckConfig) -> Result<ClusterFederationConfig>
where
    M: ClusterManager + ?Sized,
{
    let record = manager.get_cluster(config).await?;
    let federation = record.federation();
    debug!(
        cluster = %record.name,
        enabled = federation.enabled,
        pool = %federation.pool_identifier,
        "inspected cluster federation"
    );
    Ok(federation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CheckConfig {
        CheckConfig::new("acme", "us-central1", "prod")
    }

    fn record_with_pool(pool: Option<&str>) -> ClusterRecord {
        ClusterRecord {
            name: "prod".to_string(),
            location: "us-central1".to_string(),
            endpoint: "34.1.2.3".to_string(),
            master_auth: None,
            workload_identity_config: pool.map(|p| WorkloadIdentityConfig {
                workload_pool: p.to_string(),
            }),
        }
    }

    #[test]
    fn record_parses_from_gke_json() {
        let json = r#"{
            "name": "prod",
            "location": "us-central1",
            "endpoint": "34.1.2.3",
            "masterAuth": {"clusterCaCertificate": "LS0tLS1CRUdJTg=="},
            "workloadIdentityConfig": {"workloadPool": "acme.svc.id.goog"},
            "currentMasterVersion": "1.30.1-gke.100"
        }"#;
        let record: ClusterRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.endpoint, "34.1.2.3");
        assert_eq!(record.ca_certificate(), Some("LS0tLS1CRUdJTg=="));
        assert_eq!(
            record.federation(),
            ClusterFederationConfig::enabled("acme.svc.id.goog")
        );
    }

    #[test]
    fn missing_identity_config_is_disabled() {
        assert_eq!(
            record_with_pool(None).federation(),
            ClusterFederationConfig::disabled()
        );
    }

    #[test]
    fn empty_pool_is_disabled() {
        assert!(!record_with_pool(Some("")).federation().enabled);
    }

    #[test]
    fn empty_ca_is_none() {
        let mut record = record_with_pool(None);
        record.master_auth = Some(MasterAuth::default());
        assert!(record.ca_certificate().is_none());
    }

    #[tokio::test]
    async fn inspect_reports_enabled_pool() {
        let mut mock = MockClusterManager::new();
        mock.expect_get_cluster()
            .times(1)
            .returning(|_| Ok(record_with_pool(Some("acme.svc.id.goog"))));

        let fed = inspect(&mock, &config()).await.unwrap();
        assert!(fed.enabled);
        assert_eq!(fed.pool_identifier, "acme.svc.id.goog");
    }

    /// Story: A 403 from the control plane stops the check; nothing is guessed
    #[tokio::test]
    async fn story_lookup_failure_is_not_treated_as_disabled() {
        let mut mock = MockClusterManager::new();
        mock.expect_get_cluster().returning(|cfg| {
            Err(Error::cluster_lookup(
                cfg.cluster_resource_name(),
                "HTTP 403: permission denied",
            ))
        });

        let err = inspect(&mock, &config()).await.unwrap_err();
        assert!(matches!(err, Error::ClusterLookup { .. }));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn fetched_cluster_returns_its_snapshot() {
        let fetched = FetchedCluster(record_with_pool(Some("acme.svc.id.goog")));
        let fed = inspect(&fetched, &config()).await.unwrap();
        assert_eq!(fed, ClusterFederationConfig::enabled("acme.svc.id.goog"));
    }
}
