//! Workload resolution
//!
//! Maps a named workload to the Kubernetes service account its pods run as.
//! A pod template that names no service account runs as `default`, matching
//! the platform's own convention.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::store::ObjectStore;
use crate::{Error, Result, DEFAULT_SERVICE_ACCOUNT};

/// Supported workload kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// batch/v1 Job
    Job,
    /// batch/v1 CronJob
    CronJob,
}

impl WorkloadKind {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::Job => "job",
            WorkloadKind::CronJob => "cronjob",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    /// Case-insensitive; accepts kubectl short names
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" | "deploy" => Ok(WorkloadKind::Deployment),
            "statefulset" | "sts" => Ok(WorkloadKind::StatefulSet),
            "daemonset" | "ds" => Ok(WorkloadKind::DaemonSet),
            "job" => Ok(WorkloadKind::Job),
            "cronjob" | "cj" => Ok(WorkloadKind::CronJob),
            _ => Err(Error::unsupported_kind(s)),
        }
    }
}

/// A named workload in a namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    /// Kind of the workload
    pub kind: WorkloadKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl Workload {
    /// Create a workload reference
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a workload from a user-supplied kind string.
    ///
    /// Unsupported kinds fail here, before any object store access.
    pub fn parse(
        kind: &str,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(kind.parse()?, namespace, name))
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}/{}'", self.kind, self.namespace, self.name)
    }
}

/// Resolve the service account name a workload runs as.
///
/// Store errors (including [`Error::NotFound`]) propagate unchanged.
pub async fn resolve<S>(store: &S, workload: &Workload) -> Result<String>
where
    S: ObjectStore + ?Sized,
{
    let name = store
        .get_workload_service_account(workload)
        .await?
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());
    debug!(workload = %workload, service_account = %name, "resolved workload identity");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;
    use rstest::rstest;

    #[rstest]
    #[case("deployment", WorkloadKind::Deployment)]
    #[case("Deployment", WorkloadKind::Deployment)]
    #[case("deploy", WorkloadKind::Deployment)]
    #[case("statefulset", WorkloadKind::StatefulSet)]
    #[case("sts", WorkloadKind::StatefulSet)]
    #[case("daemonset", WorkloadKind::DaemonSet)]
    #[case("ds", WorkloadKind::DaemonSet)]
    #[case("job", WorkloadKind::Job)]
    #[case("cronjob", WorkloadKind::CronJob)]
    #[case("CJ", WorkloadKind::CronJob)]
    fn kind_parsing(#[case] input: &str, #[case] expected: WorkloadKind) {
        assert_eq!(input.parse::<WorkloadKind>().unwrap(), expected);
    }

    #[rstest]
    #[case(WorkloadKind::Deployment)]
    #[case(WorkloadKind::StatefulSet)]
    #[case(WorkloadKind::DaemonSet)]
    #[case(WorkloadKind::Job)]
    #[case(WorkloadKind::CronJob)]
    fn canonical_names_round_trip(#[case] kind: WorkloadKind) {
        assert_eq!(kind.as_str().parse::<WorkloadKind>().unwrap(), kind);
    }

    #[rstest]
    #[case("pod")]
    #[case("replicaset")]
    #[case("")]
    fn unsupported_kinds_are_rejected(#[case] input: &str) {
        let err = input.parse::<WorkloadKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind { .. }));
    }

    #[test]
    fn workload_display() {
        let w = Workload::new(WorkloadKind::StatefulSet, "ns1", "db");
        assert_eq!(w.to_string(), "statefulset 'ns1/db'");
    }

    #[tokio::test]
    async fn configured_service_account_is_returned() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_workload_service_account()
            .times(1)
            .returning(|_| Ok(Some("builder".to_string())));

        let w = Workload::new(WorkloadKind::Job, "ns1", "migrate");
        assert_eq!(resolve(&store, &w).await.unwrap(), "builder");
    }

    #[rstest]
    #[case(None)]
    #[case(Some(String::new()))]
    #[tokio::test]
    async fn unset_service_account_defaults(#[case] configured: Option<String>) {
        let mut store = MockObjectStore::new();
        store
            .expect_get_workload_service_account()
            .returning(move |_| Ok(configured.clone()));

        let w = Workload::new(WorkloadKind::CronJob, "ns1", "nightly");
        assert_eq!(resolve(&store, &w).await.unwrap(), "default");
    }

    #[tokio::test]
    async fn missing_workload_propagates_not_found() {
        let mut store = MockObjectStore::new();
        store.expect_get_workload_service_account().returning(|w| {
            Err(Error::not_found(
                w.kind.as_str(),
                &w.namespace,
                &w.name,
                "deployments.apps \"web\" not found",
            ))
        });

        let w = Workload::new(WorkloadKind::Deployment, "ns1", "web");
        let err = resolve(&store, &w).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("ns1/web"));
        assert!(err.to_string().contains("deployment"));
    }

    /// Story: An unsupported kind never reaches the cluster
    #[test]
    fn story_unsupported_kind_fails_before_fetch() {
        let err = Workload::parse("pod", "ns1", "web").unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind { ref kind } if kind == "pod"));
    }
}
