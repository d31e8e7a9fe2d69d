//! Workload Identity verification
//!
//! The decision tree, in strict order with short-circuit on the first
//! terminal condition:
//!
//! 1. Resolve a workload to its service account (workload targets only)
//! 2. Inspect the cluster; no federation → [`Status::FailNoFederation`]
//! 3. Fetch the service account; absent → [`Status::FailNoIdentity`]
//! 4. Branch on the `iam.gke.io/gcp-service-account` annotation:
//!    - present: the GSA policy must grant `roles/iam.workloadIdentityUser`
//!      to the legacy-syntax principal → [`Status::PassDirectBinding`] or
//!      [`Status::FailNoBinding`]
//!    - absent: look for the principal anywhere in the project policy →
//!      [`Status::Pass`] with `direct_binding`, or the informational
//!      [`Status::InfoNoAnnotation`]
//!
//! Remote, resolution and cancellation failures abort with an [`Error`]; the
//! verdicts above are returned as values. Nothing here prints; see
//! [`crate::render`] for presentation.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cluster::{self, ClusterManager};
use crate::config::CheckConfig;
use crate::policy::{CloudIdentity, PolicyService};
use crate::principal::{self, PrincipalCandidate};
use crate::store::ObjectStore;
use crate::workload::{self, Workload};
use crate::{Error, Result, GSA_ANNOTATION, WORKLOAD_IDENTITY_USER_ROLE};

// =============================================================================
// Types
// =============================================================================

/// What to verify
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A Kubernetes service account named directly
    ServiceAccount {
        /// Namespace
        namespace: String,
        /// Name
        name: String,
    },
    /// A workload, resolved to the service account it runs as
    Workload(Workload),
}

impl Target {
    /// Target a service account directly
    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ServiceAccount {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Verdict of one check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// The principal holds a direct project-level binding (no annotation)
    Pass,
    /// Workload Identity is not enabled on the cluster
    FailNoFederation,
    /// The Kubernetes service account does not exist
    FailNoIdentity,
    /// The annotated GSA does not grant the consumer role to the principal
    FailNoBinding,
    /// The annotated GSA grants the consumer role to the principal
    PassDirectBinding,
    /// No annotation and no project-level binding; not necessarily wrong
    InfoNoAnnotation,
}

impl Status {
    /// True for verdicts that do not indicate a misconfiguration
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Status::Pass | Status::PassDirectBinding | Status::InfoNoAnnotation
        )
    }
}

/// A fact established on the way to a verdict, in the order it was learned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// A workload was resolved to its service account
    WorkloadResolved {
        /// The workload
        workload: Workload,
        /// Service account it runs as
        service_account: String,
    },
    /// The cluster has federation enabled
    FederationEnabled {
        /// Cluster name
        cluster: String,
        /// Cluster location
        location: String,
        /// Workload pool
        pool: String,
    },
    /// The cluster has federation disabled
    FederationDisabled {
        /// Cluster name
        cluster: String,
        /// Cluster location
        location: String,
    },
    /// The service account exists
    ServiceAccountFound {
        /// Namespace
        namespace: String,
        /// Name
        name: String,
    },
    /// The service account carries the GSA annotation
    Annotated {
        /// Annotated GSA
        identity: CloudIdentity,
    },
    /// The service account carries no GSA annotation
    NotAnnotated,
}

/// Outcome of one check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    /// Verdict
    pub status: Status,
    /// One-line explanation of the verdict
    pub detail: String,
    /// What to run or change, when there is something to suggest
    pub remediation: Option<String>,
    /// Project-policy member matched for a direct binding
    pub direct_binding: Option<String>,
    /// Facts established before the verdict
    pub observations: Vec<Observation>,
}

impl VerificationResult {
    fn new(status: Status, detail: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            status,
            detail: detail.into(),
            remediation: None,
            direct_binding: None,
            observations,
        }
    }

    fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}

// =============================================================================
// Remediation text
// =============================================================================

fn enable_federation_command(config: &CheckConfig) -> String {
    format!(
        "gcloud container clusters update {} \\\n  --location={} \\\n  --project={} \\\n  --workload-pool={}",
        config.cluster,
        config.location,
        config.project,
        principal::default_pool(&config.project)
    )
}

fn create_service_account_command(namespace: &str, name: &str) -> String {
    format!("kubectl create serviceaccount {} --namespace {}", name, namespace)
}

/// Command granting the consumer role on `identity` to the legacy principal
pub fn add_binding_command(identity: &CloudIdentity, candidate: &PrincipalCandidate) -> String {
    format!(
        "gcloud iam service-accounts add-iam-policy-binding {} \\\n  --role={} \\\n  --member=\"{}\"",
        identity, WORKLOAD_IDENTITY_USER_ROLE, candidate.legacy_syntax
    )
}

fn no_annotation_options(namespace: &str, name: &str, candidate: &PrincipalCandidate) -> String {
    format!(
        "If the workload needs project-level permissions, either:\n\
         1. Grant IAM roles directly to the principal '{}' on the project or resource. \
         The principal syntax is described at \
         https://cloud.google.com/kubernetes-engine/docs/concepts/workload-identity#kubernetes-resources-iam-policies\n\
         2. Annotate the KSA '{}/{}' with '{}' to impersonate a GSA.",
        candidate.current_syntax, namespace, name, GSA_ANNOTATION
    )
}

// =============================================================================
// Verifier
// =============================================================================

/// Runs the decision tree against injected remote services
pub struct Verifier<'a> {
    config: &'a CheckConfig,
    clusters: &'a dyn ClusterManager,
    store: &'a dyn ObjectStore,
    policies: &'a dyn PolicyService,
}

impl<'a> Verifier<'a> {
    /// Create a verifier for the cluster and project in `config`
    pub fn new(
        config: &'a CheckConfig,
        clusters: &'a dyn ClusterManager,
        store: &'a dyn ObjectStore,
        policies: &'a dyn PolicyService,
    ) -> Self {
        Self {
            config,
            clusters,
            store,
            policies,
        }
    }

    /// Verify the Workload Identity wiring of `target`.
    ///
    /// Each remote call is raced against `cancel`; cancellation returns
    /// [`Error::Cancelled`] with no partial verdict.
    #[instrument(skip(self, cancel), fields(project = %self.config.project, cluster = %self.config.cluster))]
    pub async fn verify(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult> {
        let mut observations = Vec::new();

        // 1. Resolve the service account
        let (namespace, ksa) = match target {
            Target::ServiceAccount { namespace, name } => (namespace.clone(), name.clone()),
            Target::Workload(w) => {
                let ksa = guarded(cancel, workload::resolve(self.store, w)).await?;
                observations.push(Observation::WorkloadResolved {
                    workload: w.clone(),
                    service_account: ksa.clone(),
                });
                (w.namespace.clone(), ksa)
            }
        };

        // 2. Cluster federation
        let federation = guarded(cancel, cluster::inspect(self.clusters, self.config)).await?;
        if !federation.enabled {
            info!("workload identity is not enabled on the cluster");
            observations.push(Observation::FederationDisabled {
                cluster: self.config.cluster.clone(),
                location: self.config.location.clone(),
            });
            return Ok(VerificationResult::new(
                Status::FailNoFederation,
                format!(
                    "Workload Identity is not enabled on cluster '{}'",
                    self.config.cluster
                ),
                observations,
            )
            .with_remediation(enable_federation_command(self.config)));
        }
        observations.push(Observation::FederationEnabled {
            cluster: self.config.cluster.clone(),
            location: self.config.location.clone(),
            pool: federation.pool_identifier.clone(),
        });

        // 3. Service account
        let Some(identity) =
            guarded(cancel, self.store.get_service_account(&namespace, &ksa)).await?
        else {
            info!(namespace = %namespace, ksa = %ksa, "service account not found");
            return Ok(VerificationResult::new(
                Status::FailNoIdentity,
                format!(
                    "Kubernetes service account '{}' not found in namespace '{}'",
                    ksa, namespace
                ),
                observations,
            )
            .with_remediation(create_service_account_command(&namespace, &ksa)));
        };
        observations.push(Observation::ServiceAccountFound {
            namespace: namespace.clone(),
            name: ksa.clone(),
        });

        let candidate = principal::candidates(
            &self.config.project,
            &namespace,
            &ksa,
            Some(&federation.pool_identifier),
        );
        debug!(legacy = %candidate.legacy_syntax, current = %candidate.current_syntax, "principal candidates");

        // 4. Annotation branch
        match identity.annotation(GSA_ANNOTATION) {
            Some(gsa) => {
                let gsa = CloudIdentity::new(gsa);
                observations.push(Observation::Annotated {
                    identity: gsa.clone(),
                });
                self.verify_impersonation(gsa, &candidate, observations, cancel)
                    .await
            }
            None => {
                observations.push(Observation::NotAnnotated);
                self.verify_direct(&namespace, &ksa, &candidate, observations, cancel)
                    .await
            }
        }
    }

    async fn verify_impersonation(
        &self,
        gsa: CloudIdentity,
        candidate: &PrincipalCandidate,
        observations: Vec<Observation>,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult> {
        let policy = guarded(cancel, self.policies.get_identity_policy(&gsa)).await?;

        match policy.find_consumer_binding(candidate) {
            Some(member) => {
                info!(gsa = %gsa, member, "found workload identity binding");
                Ok(VerificationResult::new(
                    Status::PassDirectBinding,
                    format!(
                        "Found IAM binding for member '{}' with role '{}' on GSA '{}'",
                        member, WORKLOAD_IDENTITY_USER_ROLE, gsa
                    ),
                    observations,
                ))
            }
            None => {
                info!(gsa = %gsa, "workload identity binding missing");
                Ok(VerificationResult::new(
                    Status::FailNoBinding,
                    format!(
                        "GSA '{}' does not grant '{}' to '{}'",
                        gsa, WORKLOAD_IDENTITY_USER_ROLE, candidate.legacy_syntax
                    ),
                    observations,
                )
                .with_remediation(add_binding_command(&gsa, candidate)))
            }
        }
    }

    async fn verify_direct(
        &self,
        namespace: &str,
        ksa: &str,
        candidate: &PrincipalCandidate,
        observations: Vec<Observation>,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult> {
        let policy = guarded(cancel, self.policies.get_project_policy(&self.config.project)).await?;

        match policy.find_direct_binding(candidate) {
            Some(member) => {
                info!(member, "found direct project-level binding");
                let mut result = VerificationResult::new(
                    Status::Pass,
                    format!(
                        "Found direct IAM binding for principal '{}' at the project level ('{}'), \
                         not GSA impersonation",
                        member, self.config.project
                    ),
                    observations,
                );
                result.direct_binding = Some(member.to_string());
                Ok(result)
            }
            None => Ok(VerificationResult::new(
                Status::InfoNoAnnotation,
                format!(
                    "No direct IAM bindings found for the KSA principal at the project level ('{}')",
                    self.config.project
                ),
                observations,
            )
            .with_remediation(no_annotation_options(namespace, ksa, candidate))),
        }
    }
}

/// Race `fut` against cancellation
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
