//! Principal strings for cluster-scoped identities
//!
//! A Kubernetes service account acting through a workload pool can appear in
//! IAM policies in two syntaxes:
//!
//! - legacy: `serviceAccount:<pool>[<namespace>/<name>]`
//! - current: `<pool>/subject/ns/<namespace>/sa/<name>`
//!
//! Candidates are always computed from coordinates and then tested against
//! observed policy membership, never derived from policy data.

/// Suffix of the default workload pool for a project
pub const WORKLOAD_POOL_SUFFIX: &str = ".svc.id.goog";

/// Both encodings of one namespace/name pair acting through a workload pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrincipalCandidate {
    /// `serviceAccount:<pool>[<namespace>/<name>]`, matched exactly
    pub legacy_syntax: String,
    /// `<pool>/subject/ns/<namespace>/sa/<name>`, matched as a substring
    pub current_syntax: String,
}

/// The project's default workload pool, `<project>.svc.id.goog`
pub fn default_pool(project: &str) -> String {
    format!("{}{}", project, WORKLOAD_POOL_SUFFIX)
}

/// Build both principal encodings for a service account.
///
/// `pool` overrides the project's default pool; pass `None` (or an empty
/// string) to fall back to [`default_pool`].
pub fn candidates(
    project: &str,
    namespace: &str,
    name: &str,
    pool: Option<&str>,
) -> PrincipalCandidate {
    let pool = match pool {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => default_pool(project),
    };
    PrincipalCandidate {
        legacy_syntax: format!("serviceAccount:{}[{}/{}]", pool, namespace, name),
        current_syntax: format!("{}/subject/ns/{}/sa/{}", pool, namespace, name),
    }
}

/// Return the first member matching either encoding.
///
/// The current syntax matches as a substring since policy members may further
/// qualify the subject (e.g. a `principal://iam.googleapis.com/...` prefix).
/// The legacy syntax requires an exact match. Comparison is case-sensitive.
///
/// The substring test is not anchored at the end of the member, so the
/// candidate for `sa/svc1` also matches a member naming `sa/svc10`.
pub fn matches<'a, I>(members: I, candidate: &PrincipalCandidate) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    members
        .into_iter()
        .map(String::as_str)
        .find(|m| m.contains(&candidate.current_syntax) || *m == candidate.legacy_syntax)
}

/// Return the member equal to the legacy encoding, if any.
pub fn matches_legacy<'a, I>(members: I, candidate: &PrincipalCandidate) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    members
        .into_iter()
        .map(String::as_str)
        .find(|m| *m == candidate.legacy_syntax)
}
