//! IAM policy inspection
//!
//! Fetches IAM policies for a Google service account or a project and scans
//! their bindings for the principals computed by [`crate::principal`].

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::gcp::{resource_url, GoogleApiClient};
use crate::principal::{self, PrincipalCandidate};
use crate::{Error, Result, WORKLOAD_IDENTITY_USER_ROLE};

// =============================================================================
// Types
// =============================================================================

/// A Google service account email naming a cloud identity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CloudIdentity(String);

impl CloudIdentity {
    /// Wrap a service account email
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into())
    }

    /// The email
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CloudIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One role grant within a policy
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    /// Role, e.g. `roles/iam.workloadIdentityUser`
    pub role: String,
    /// Members in policy order
    #[serde(default)]
    pub members: Vec<String>,
}

impl PolicyBinding {
    /// Create a binding
    pub fn new<I, S>(role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// An IAM policy: ordered bindings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Bindings in policy order; absent in JSON when the policy is empty
    #[serde(default)]
    pub bindings: Vec<PolicyBinding>,
}

impl Policy {
    /// Create a policy from bindings
    pub fn new(bindings: Vec<PolicyBinding>) -> Self {
        Self { bindings }
    }

    /// Find the legacy-syntax member under the Workload Identity User role.
    ///
    /// Only the exact legacy encoding is accepted here; a current-syntax
    /// principal on a service account policy does not count.
    pub fn find_consumer_binding(&self, candidate: &PrincipalCandidate) -> Option<&str> {
        self.bindings
            .iter()
            .filter(|b| b.role == WORKLOAD_IDENTITY_USER_ROLE)
            .find_map(|b| principal::matches_legacy(&b.members, candidate))
    }

    /// Find the first member in any binding matching either encoding
    pub fn find_direct_binding(&self, candidate: &PrincipalCandidate) -> Option<&str> {
        self.bindings
            .iter()
            .find_map(|b| principal::matches(&b.members, candidate))
    }
}

// =============================================================================
// Policy service seam
// =============================================================================

/// Trait abstracting the cloud policy service
///
/// This trait allows mocking IAM in tests while using the REST APIs in
/// production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PolicyService: Send + Sync {
    /// Policy attached to one Google service account
    async fn get_identity_policy(&self, identity: &CloudIdentity) -> Result<Policy>;

    /// Project-level policy
    async fn get_project_policy(&self, project: &str) -> Result<Policy>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetIamPolicyRequest {}

/// IAM and Cloud Resource Manager over REST
#[derive(Clone, Debug)]
pub struct GcpPolicyService {
    client: GoogleApiClient,
}

impl GcpPolicyService {
    /// Create a service using the given API client
    pub fn new(client: GoogleApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PolicyService for GcpPolicyService {
    #[instrument(skip(self), fields(identity = %identity))]
    async fn get_identity_policy(&self, identity: &CloudIdentity) -> Result<Policy> {
        let resource = format!("GSA '{}'", identity);
        let method = format!("{}:getIamPolicy", identity);
        let url = resource_url(
            &self.client.endpoints().iam,
            ["v1", "projects", "-", "serviceAccounts", method.as_str()],
        )
        .map_err(|e| Error::policy_fetch(&resource, e.to_string()))?;
        let policy: Policy = self
            .client
            .post_json(url, &GetIamPolicyRequest {})
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Error::policy_fetch(format!("{} (does it exist?)", resource), e.to_string())
                } else {
                    Error::policy_fetch(resource, e.to_string())
                }
            })?;
        debug!(bindings = policy.bindings.len(), "fetched service account policy");
        Ok(policy)
    }

    #[instrument(skip(self))]
    async fn get_project_policy(&self, project: &str) -> Result<Policy> {
        let resource = format!("project '{}'", project);
        let method = format!("{}:getIamPolicy", project);
        let url = resource_url(
            &self.client.endpoints().resource_manager,
            ["v1", "projects", method.as_str()],
        )
        .map_err(|e| Error::policy_fetch(&resource, e.to_string()))?;
        let policy: Policy = self
            .client
            .post_json(url, &GetIamPolicyRequest {})
            .await
            .map_err(|e| Error::policy_fetch(resource, e.to_string()))?;
        debug!(bindings = policy.bindings.len(), "fetched project policy");
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::candidates;

    const LEGACY: &str = "serviceAccount:acme.svc.id.goog[ns1/svc1]";
    const CURRENT: &str = "principal://iam.googleapis.com/projects/42/locations/global/workloadIdentityPools/acme.svc.id.goog/subject/ns/ns1/sa/svc1";

    fn candidate() -> PrincipalCandidate {
        candidates("acme", "ns1", "svc1", Some("acme.svc.id.goog"))
    }

    #[test]
    fn policy_parses_iam_json() {
        let json = r#"{
            "version": 1,
            "etag": "BwX=",
            "bindings": [
                {"role": "roles/iam.workloadIdentityUser",
                 "members": ["serviceAccount:acme.svc.id.goog[ns1/svc1]"]}
            ]
        }"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members, vec![LEGACY.to_string()]);
    }

    #[test]
    fn empty_policy_json_has_no_bindings() {
        let policy: Policy = serde_json::from_str(r#"{"etag": "ACAB"}"#).unwrap();
        assert!(policy.bindings.is_empty());
    }

    #[test]
    fn consumer_binding_found_under_role() {
        let policy = Policy::new(vec![PolicyBinding::new(
            WORKLOAD_IDENTITY_USER_ROLE,
            [LEGACY],
        )]);
        assert_eq!(policy.find_consumer_binding(&candidate()), Some(LEGACY));
    }

    #[test]
    fn consumer_binding_ignores_other_roles() {
        let policy = Policy::new(vec![PolicyBinding::new(
            "roles/iam.serviceAccountTokenCreator",
            [LEGACY],
        )]);
        assert!(policy.find_consumer_binding(&candidate()).is_none());
    }

    /// The service account check accepts only the legacy encoding; a
    /// current-syntax principal under the consumer role is not a match.
    #[test]
    fn consumer_binding_rejects_current_syntax() {
        let policy = Policy::new(vec![PolicyBinding::new(
            WORKLOAD_IDENTITY_USER_ROLE,
            [CURRENT],
        )]);
        assert!(policy.find_consumer_binding(&candidate()).is_none());
        assert_eq!(policy.find_direct_binding(&candidate()), Some(CURRENT));
    }

    #[test]
    fn direct_binding_matches_any_role() {
        let policy = Policy::new(vec![
            PolicyBinding::new("roles/viewer", ["user:alice@example.com"]),
            PolicyBinding::new("roles/storage.objectViewer", [LEGACY]),
        ]);
        assert_eq!(policy.find_direct_binding(&candidate()), Some(LEGACY));
    }

    #[test]
    fn direct_binding_first_hit_wins_across_bindings() {
        let policy = Policy::new(vec![
            PolicyBinding::new("roles/pubsub.subscriber", [CURRENT]),
            PolicyBinding::new("roles/storage.objectViewer", [LEGACY]),
        ]);
        assert_eq!(policy.find_direct_binding(&candidate()), Some(CURRENT));
    }

    #[test]
    fn cloud_identity_displays_email() {
        let gsa = CloudIdentity::new("gsa@acme.iam.gserviceaccount.com");
        assert_eq!(gsa.to_string(), "gsa@acme.iam.gserviceaccount.com");
        assert_eq!(gsa.as_str(), "gsa@acme.iam.gserviceaccount.com");
    }
}
