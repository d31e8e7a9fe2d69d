//! Human-readable report for a [`VerificationResult`]
//!
//! Steps are rebuilt from the result's observations, so the report always
//! reflects what the verifier actually established.

use std::fmt::Write;

use crate::verify::{Observation, Status, Target, VerificationResult};
use crate::Error;

const RULE: &str = "-------------------------------------------------------------";

/// Render the report for `target` as plain text
pub fn render(target: &Target, result: &VerificationResult) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_report(&mut out, target, result);
    out
}

fn write_report(out: &mut String, target: &Target, result: &VerificationResult) -> std::fmt::Result {
    match target {
        Target::ServiceAccount { namespace, name } => {
            writeln!(out, "Workload Identity analysis for KSA: {}/{}", namespace, name)?
        }
        Target::Workload(w) => writeln!(out, "Workload Identity analysis for {}", w)?,
    }
    writeln!(out, "{}", RULE)?;

    let mut step = 0;
    for obs in &result.observations {
        match obs {
            Observation::WorkloadResolved {
                workload,
                service_account,
            } => {
                writeln!(
                    out,
                    "Workload '{}/{}' is using Kubernetes Service Account '{}'.",
                    workload.namespace, workload.name, service_account
                )?;
            }
            Observation::FederationEnabled {
                cluster,
                location,
                pool,
            } => {
                step += 1;
                writeln!(out, "{}. Cluster '{}' in '{}'", step, cluster, location)?;
                writeln!(out, "   [ok] Workload Identity is enabled. Workload pool: {}", pool)?;
            }
            Observation::FederationDisabled { cluster, location } => {
                step += 1;
                writeln!(out, "{}. Cluster '{}' in '{}'", step, cluster, location)?;
            }
            Observation::ServiceAccountFound { namespace, name } => {
                step += 1;
                writeln!(out, "{}. Kubernetes Service Account '{}/{}'", step, namespace, name)?;
                writeln!(out, "   [ok] Found KSA '{}/{}'.", namespace, name)?;
            }
            Observation::Annotated { identity } => {
                writeln!(out, "   [ok] KSA is annotated with GSA: {}", identity)?;
            }
            Observation::NotAnnotated => {
                writeln!(
                    out,
                    "   [info] KSA has no '{}' annotation; checking direct project bindings.",
                    crate::GSA_ANNOTATION
                )?;
            }
        }
    }

    let marker = match result.status {
        Status::Pass | Status::PassDirectBinding => "[ok]",
        Status::InfoNoAnnotation => "[info]",
        Status::FailNoFederation | Status::FailNoIdentity | Status::FailNoBinding => "[fail]",
    };
    writeln!(out, "{}. Verdict", step + 1)?;
    writeln!(out, "   {} {}", marker, result.detail)?;

    if let Some(fix) = &result.remediation {
        let heading = match result.status {
            Status::InfoNoAnnotation => "This is not necessarily an error.",
            _ => "Run the following to fix:",
        };
        writeln!(out)?;
        writeln!(out, "{}", heading)?;
        writeln!(out)?;
        for line in fix.lines() {
            writeln!(out, "  {}", line)?;
        }
    }

    writeln!(out, "{}", RULE)?;
    let summary = match result.status {
        Status::PassDirectBinding => {
            "All checks passed! Workload Identity setup looks correct for this KSA."
        }
        Status::Pass => {
            "Checks passed! The KSA has direct IAM role bindings at the project level. \
             Make sure those roles cover what the workload needs."
        }
        Status::InfoNoAnnotation => "No misconfiguration detected, but no binding was found either.",
        Status::FailNoFederation | Status::FailNoIdentity | Status::FailNoBinding => {
            "Check failed."
        }
    };
    writeln!(out, "{}", summary)?;
    Ok(())
}

/// Process exit code for a verdict: 0 unless it is a failure
pub fn exit_code(status: Status) -> u8 {
    if status.is_success() {
        0
    } else {
        1
    }
}

/// Follow-up hint for an error that prevented a verdict
pub fn error_hint(err: &Error) -> Option<&'static str> {
    if err.is_not_found() {
        Some("Check the namespace, the name and --type of the target.")
    } else if err.is_remote() {
        Some(
            "Check that the credentials in use (--access-token or gcloud) can read \
             this resource and that the API is reachable.",
        )
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CloudIdentity;
    use crate::workload::{Workload, WorkloadKind};

    fn base_observations() -> Vec<Observation> {
        vec![
            Observation::FederationEnabled {
                cluster: "prod".to_string(),
                location: "us-central1".to_string(),
                pool: "acme.svc.id.goog".to_string(),
            },
            Observation::ServiceAccountFound {
                namespace: "ns1".to_string(),
                name: "svc1".to_string(),
            },
        ]
    }

    #[test]
    fn failed_binding_report_shows_fix_command() {
        let mut observations = base_observations();
        observations.push(Observation::Annotated {
            identity: CloudIdentity::new("gsa@acme.iam.gserviceaccount.com"),
        });
        let result = VerificationResult {
            status: Status::FailNoBinding,
            detail: "GSA does not grant the role".to_string(),
            remediation: Some("gcloud iam service-accounts add-iam-policy-binding x \\\n  --role=r".to_string()),
            direct_binding: None,
            observations,
        };

        let text = render(&Target::service_account("ns1", "svc1"), &result);
        assert!(text.starts_with("Workload Identity analysis for KSA: ns1/svc1"));
        assert!(text.contains("1. Cluster 'prod' in 'us-central1'"));
        assert!(text.contains("2. Kubernetes Service Account 'ns1/svc1'"));
        assert!(text.contains("annotated with GSA: gsa@acme.iam.gserviceaccount.com"));
        assert!(text.contains("3. Verdict"));
        assert!(text.contains("[fail] GSA does not grant the role"));
        assert!(text.contains("Run the following to fix:"));
        assert!(text.contains("  gcloud iam service-accounts add-iam-policy-binding x \\"));
        assert!(text.contains("Check failed."));
    }

    #[test]
    fn workload_report_names_resolved_ksa() {
        let mut observations = vec![Observation::WorkloadResolved {
            workload: Workload::new(WorkloadKind::Deployment, "ns1", "web"),
            service_account: "default".to_string(),
        }];
        observations.extend(base_observations());
        observations.push(Observation::NotAnnotated);
        let result = VerificationResult {
            status: Status::InfoNoAnnotation,
            detail: "No direct IAM bindings found".to_string(),
            remediation: Some("1. a\n2. b".to_string()),
            direct_binding: None,
            observations,
        };

        let target = Target::Workload(Workload::new(WorkloadKind::Deployment, "ns1", "web"));
        let text = render(&target, &result);
        assert!(text.contains("Workload Identity analysis for deployment 'ns1/web'"));
        assert!(text.contains("Workload 'ns1/web' is using Kubernetes Service Account 'default'."));
        assert!(text.contains("[info] No direct IAM bindings found"));
        assert!(text.contains("This is not necessarily an error."));
        assert!(text.contains("  2. b"));
    }

    #[test]
    fn disabled_federation_report() {
        let result = VerificationResult {
            status: Status::FailNoFederation,
            detail: "Workload Identity is not enabled on cluster 'prod'".to_string(),
            remediation: Some("gcloud container clusters update prod".to_string()),
            direct_binding: None,
            observations: vec![Observation::FederationDisabled {
                cluster: "prod".to_string(),
                location: "us-central1".to_string(),
            }],
        };
        let text = render(&Target::service_account("ns1", "svc1"), &result);
        assert!(text.contains("2. Verdict"));
        assert!(text.contains("[fail] Workload Identity is not enabled"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(Status::Pass), 0);
        assert_eq!(exit_code(Status::PassDirectBinding), 0);
        assert_eq!(exit_code(Status::InfoNoAnnotation), 0);
        assert_eq!(exit_code(Status::FailNoBinding), 1);
        assert_eq!(exit_code(Status::FailNoIdentity), 1);
        assert_eq!(exit_code(Status::FailNoFederation), 1);
    }

    #[test]
    fn hints_follow_error_class() {
        let missing = Error::not_found("deployment", "ns1", "web", "not found");
        assert!(error_hint(&missing).unwrap().contains("--type"));

        let remote = Error::policy_fetch("project 'acme'", "HTTP 403: denied");
        assert!(error_hint(&remote).unwrap().contains("credentials"));

        assert!(error_hint(&Error::Cancelled).is_none());
        assert!(error_hint(&Error::config("bad flag")).is_none());
    }
}
