//! Command-line interface
//!
//! `wif-check check ksa <name>` and `wif-check check workload <name>` wire the
//! real remote clients into a [`Verifier`] and print the rendered report.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::{ClusterManager, FetchedCluster, GkeClusterManager};
use crate::config::{self, CheckConfig, CredentialsConfig};
use crate::gcp::{self, GoogleApiClient};
use crate::kube_client;
use crate::policy::GcpPolicyService;
use crate::render;
use crate::store::KubeObjectStore;
use crate::verify::{guarded, Target, Verifier};
use crate::workload::Workload;
use crate::Result;

/// Troubleshoot Workload Identity Federation for GKE
#[derive(Parser, Debug)]
#[command(name = "wif-check")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the Workload Identity configuration of a resource
    #[command(subcommand)]
    Check(CheckCommand),
}

/// What to check
#[derive(Subcommand, Debug)]
pub enum CheckCommand {
    /// Check a Kubernetes Service Account (KSA)
    ///
    /// Verifies the `iam.gke.io/gcp-service-account` annotation and the
    /// matching IAM binding on the annotated GSA, or direct project-level
    /// bindings for the KSA principal when there is no annotation.
    Ksa(KsaArgs),

    /// Check a workload (deployment, statefulset, daemonset, job, cronjob)
    ///
    /// Identifies the KSA the workload runs as and checks that KSA.
    Workload(WorkloadArgs),
}

/// Arguments for `check ksa`
#[derive(Args, Debug)]
pub struct KsaArgs {
    /// Name of the Kubernetes Service Account
    pub name: String,

    /// Kubernetes namespace of the service account
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Cluster coordinates and credentials
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Arguments for `check workload`
#[derive(Args, Debug)]
pub struct WorkloadArgs {
    /// Name of the workload
    pub name: String,

    /// Kubernetes namespace of the workload
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Type of the workload (deployment, statefulset, daemonset, job, cronjob)
    #[arg(short = 't', long = "type", default_value = "deployment")]
    pub kind: String,

    /// Cluster coordinates and credentials
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Cluster coordinates and credentials shared by every check
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// GCP project ID
    #[arg(long, env = "WIF_CHECK_PROJECT")]
    pub project: String,

    /// GKE cluster location (region or zone)
    #[arg(long, env = "WIF_CHECK_LOCATION")]
    pub location: String,

    /// GKE cluster name
    #[arg(long, env = "WIF_CHECK_CLUSTER")]
    pub cluster: String,

    /// OAuth2 access token for Google APIs (defaults to gcloud credentials)
    #[arg(long, env = config::ACCESS_TOKEN_ENV, hide_env_values = true)]
    pub access_token: Option<String>,

    /// IAM inspection token sent as x-goog-iam-authorization-token
    #[arg(long, env = config::INSPECTION_TOKEN_ENV, hide_env_values = true)]
    pub inspection_token: Option<String>,

    /// Use the local kubeconfig at ~/.kube/config instead of the cluster endpoint
    #[arg(long, conflicts_with = "kubeconfig")]
    pub local_kubeconfig: bool,

    /// Path to a kubeconfig to use instead of the cluster endpoint
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Abort the check after this many seconds
    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,
}

impl CommonArgs {
    fn check_config(&self) -> CheckConfig {
        CheckConfig::new(&self.project, &self.location, &self.cluster)
    }

    fn credentials(&self) -> Result<CredentialsConfig> {
        Ok(CredentialsConfig {
            access_token: config::non_empty(self.access_token.clone()),
            inspection_token: config::non_empty(self.inspection_token.clone()),
            kubeconfig: config::resolve_kubeconfig(
                self.kubeconfig.as_deref(),
                self.local_kubeconfig,
            )?,
        })
    }
}

impl Cli {
    /// Run the command, returning the process exit code for its verdict
    pub async fn run(self) -> Result<u8> {
        match self.command {
            Commands::Check(CheckCommand::Ksa(args)) => {
                let target = Target::service_account(&args.namespace, &args.name);
                run_check(target, &args.common).await
            }
            Commands::Check(CheckCommand::Workload(args)) => {
                let workload = Workload::parse(&args.kind, &args.namespace, &args.name)?;
                run_check(Target::Workload(workload), &args.common).await
            }
        }
    }
}

async fn run_check(target: Target, common: &CommonArgs) -> Result<u8> {
    let config = common.check_config();
    config.validate()?;
    let credentials = common.credentials()?;

    let cancel = CancellationToken::new();
    let watchdog = spawn_watchdog(cancel.clone(), Duration::from_secs(common.timeout_secs));
    let outcome = check(&target, &config, credentials, &cancel).await;
    watchdog.abort();

    let result = outcome?;
    print!("{}", render::render(&target, &result));
    Ok(render::exit_code(result.status))
}

async fn check(
    target: &Target,
    config: &CheckConfig,
    credentials: CredentialsConfig,
    cancel: &CancellationToken,
) -> Result<crate::verify::VerificationResult> {
    let token = guarded(cancel, gcp::resolve_access_token(credentials.access_token)).await?;
    let google = GoogleApiClient::new(&token, credentials.inspection_token.as_deref())?;
    let gke = GkeClusterManager::new(google.clone());
    let policies = GcpPolicyService::new(google);

    let (client, clusters): (kube::Client, Box<dyn ClusterManager>) = match &credentials.kubeconfig
    {
        Some(path) => (
            guarded(cancel, kube_client::client_from_kubeconfig(path)).await?,
            Box::new(gke),
        ),
        None => {
            let record = guarded(cancel, gke.get_cluster(config)).await?;
            debug!(endpoint = %record.endpoint, "connecting through cluster endpoint");
            (
                kube_client::client_for_cluster(&record, &token)?,
                Box::new(FetchedCluster(record)),
            )
        }
    };
    let store = KubeObjectStore::new(client);

    Verifier::new(config, clusters.as_ref(), &store, &policies)
        .verify(target, cancel)
        .await
}

/// What ended the wait for a running check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    Deadline,
    Interrupt,
}

fn spawn_watchdog(cancel: CancellationToken, timeout: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        watch(cancel, timeout, tokio::signal::ctrl_c()).await;
    })
}

/// Cancel `cancel` once `timeout` elapses or `interrupt` reports a signal.
///
/// A failure to listen for the signal leaves only the deadline in force.
async fn watch<F>(cancel: CancellationToken, timeout: Duration, interrupt: F) -> Trigger
where
    F: Future<Output = std::io::Result<()>>,
{
    let interrupted = async {
        if let Err(e) = interrupt.await {
            warn!(error = %e, "cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    };
    let trigger = tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            warn!(?timeout, "check timed out");
            Trigger::Deadline
        }
        _ = interrupted => {
            warn!("interrupted");
            Trigger::Interrupt
        }
    };
    cancel.cancel();
    trigger
}
