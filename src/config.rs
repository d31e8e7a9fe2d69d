//! Check configuration
//!
//! Cluster coordinates and credential settings are resolved once from CLI
//! flags and environment, then passed by reference to every component.
//!
//! Kubeconfig resolution (highest priority first):
//! 1. Explicit `--kubeconfig PATH`
//! 2. `--local-kubeconfig` → `~/.kube/config`
//! 3. None: build a client from the GKE cluster record (endpoint + CA) and
//!    the Google access token

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Environment variable holding a Google OAuth2 access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Environment variable holding an IAM inspection token
pub const INSPECTION_TOKEN_ENV: &str = "WIF_CHECK_INSPECTION_TOKEN";

const KUBE_DIR_NAME: &str = ".kube";
const KUBECONFIG_FILE_NAME: &str = "config";

/// Immutable coordinates of the cluster and project under inspection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckConfig {
    /// GCP project ID hosting the cluster and its workload pool
    pub project: String,
    /// Cluster location (region or zone)
    pub location: String,
    /// GKE cluster name
    pub cluster: String,
}

impl CheckConfig {
    /// Create a new config
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            cluster: cluster.into(),
        }
    }

    /// Reject empty coordinates
    pub fn validate(&self) -> Result<()> {
        for (flag, value) in [
            ("--project", &self.project),
            ("--location", &self.location),
            ("--cluster", &self.cluster),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{} must not be empty", flag)));
            }
        }
        Ok(())
    }

    /// `projects/{p}/locations/{l}/clusters/{c}`
    pub fn cluster_resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/clusters/{}",
            self.project, self.location, self.cluster
        )
    }
}

/// How to authenticate against Google APIs and the cluster API server
#[derive(Clone, Debug, Default)]
pub struct CredentialsConfig {
    /// OAuth2 bearer token; obtained from gcloud when absent
    pub access_token: Option<String>,
    /// Sent as `x-goog-iam-authorization-token` on Google API calls
    pub inspection_token: Option<String>,
    /// Kubeconfig to use instead of the cluster record
    pub kubeconfig: Option<PathBuf>,
}

/// Resolve which kubeconfig file to use, if any.
///
/// `explicit` wins over `local`. With `local`, `~/.kube/config` must exist.
pub fn resolve_kubeconfig(explicit: Option<&Path>, local: bool) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }
    if !local {
        return Ok(None);
    }

    let home = dirs::home_dir()
        .ok_or_else(|| Error::config("could not determine home directory"))?;
    let path = home.join(KUBE_DIR_NAME).join(KUBECONFIG_FILE_NAME);
    if !path.exists() {
        return Err(Error::config(format!(
            "failed to find local kubeconfig at {}",
            path.display()
        )));
    }
    Ok(Some(path))
}

/// Treat empty token strings as unset
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
