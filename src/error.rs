//! Error types for wif-check

use thiserror::Error;

/// Main error type for verification operations
///
/// Verdicts such as "binding missing" are not errors; they are returned as a
/// [`crate::verify::VerificationResult`]. This type covers the failures that
/// abort the pipeline before a verdict can be reached.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Workload kind outside the supported set
    #[error("unsupported workload type '{kind}' (expected deployment, statefulset, daemonset, job or cronjob)")]
    UnsupportedKind {
        /// The kind as supplied by the caller
        kind: String,
    },

    /// A named object does not exist in the cluster
    #[error("could not get {kind} '{namespace}/{name}': {message}")]
    NotFound {
        /// Object kind (e.g. `deployment`, `serviceaccount`)
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
        /// Detail from the object store
        message: String,
    },

    /// The control-plane service could not return the cluster record
    #[error("failed to get GKE cluster '{cluster}': {message}")]
    ClusterLookup {
        /// Fully qualified cluster resource name
        cluster: String,
        /// Underlying transport or API failure
        message: String,
    },

    /// A policy could not be fetched for a cloud identity or project
    #[error("failed to get IAM policy for {resource}: {message}")]
    PolicyFetch {
        /// Human-readable resource, e.g. `GSA 'x@p.iam.gserviceaccount.com' (does it exist?)`
        resource: String,
        /// Underlying transport or API failure
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP transport error talking to Google APIs
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller cancelled the check or its deadline elapsed
    #[error("check cancelled before completion")]
    Cancelled,
}

impl Error {
    /// Create an unsupported-kind error
    pub fn unsupported_kind(kind: impl Into<String>) -> Self {
        Self::UnsupportedKind { kind: kind.into() }
    }

    /// Create a not-found error carrying the missing object's coordinates
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a cluster lookup error
    pub fn cluster_lookup(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClusterLookup {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Create a policy fetch error
    pub fn policy_fetch(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyFetch {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the "resource absent" family: missing objects and unsupported kinds
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnsupportedKind { .. })
    }

    /// True for failures talking to a remote service
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::ClusterLookup { .. } | Self::PolicyFetch { .. } | Self::Kube(_) | Self::Http(_)
        )
    }
}
