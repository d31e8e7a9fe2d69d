//! wif-check - troubleshoot Workload Identity Federation for GKE
//!
//! Given a GKE cluster and a Kubernetes service account (or a workload that
//! runs as one), determines whether the account can obtain Google Cloud
//! credentials through Workload Identity and explains what is missing.
//!
//! # Modules
//!
//! - [`principal`] - IAM principal strings for a Kubernetes service account
//! - [`cluster`] - GKE cluster lookup and federation settings
//! - [`store`] - Kubernetes object reads (service accounts, workloads)
//! - [`workload`] - Workload kinds and service account resolution
//! - [`policy`] - IAM policy fetch and binding scans
//! - [`verify`] - The verification decision tree
//! - [`render`] - Human-readable report and exit codes
//! - [`gcp`] - Google REST API client
//! - [`kube_client`] - Kubernetes client construction
//! - [`config`] - Check and credential configuration
//! - [`cli`] - Command-line interface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod gcp;
pub mod kube_client;
pub mod policy;
pub mod principal;
pub mod render;
pub mod store;
pub mod verify;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known names
// =============================================================================

/// Annotation naming the Google service account a KSA impersonates
pub const GSA_ANNOTATION: &str = "iam.gke.io/gcp-service-account";

/// Role that lets a federated principal impersonate a Google service account
pub const WORKLOAD_IDENTITY_USER_ROLE: &str = "roles/iam.workloadIdentityUser";

/// Service account a pod runs as when its spec names none
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// User-Agent sent on Google API requests
pub const USER_AGENT: &str = concat!("wif-check/", env!("CARGO_PKG_VERSION"));
