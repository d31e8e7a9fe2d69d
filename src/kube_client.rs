//! Kubernetes client construction
//!
//! Either connects straight to the GKE API server described by the cluster
//! record, authenticating with the Google access token, or loads a kubeconfig
//! file when the operator asks for one.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use secrecy::SecretString;
use tracing::debug;

use crate::cluster::ClusterRecord;
use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Decode the record's base64 PEM CA bundle into DER certificates
pub fn decode_ca(ca_b64: &str) -> Result<Vec<Vec<u8>>> {
    let pem_bytes = STANDARD
        .decode(ca_b64.trim())
        .map_err(|e| Error::config(format!("failed to decode cluster CA certificate: {}", e)))?;
    let certs = ::pem::parse_many(&pem_bytes)
        .map_err(|e| Error::config(format!("failed to parse cluster CA certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::config("cluster CA certificate contains no PEM blocks"));
    }
    Ok(certs.into_iter().map(|p| p.contents().to_vec()).collect())
}

/// Build a client for the API server in `record`, authenticating with `access_token`
pub fn client_for_cluster(record: &ClusterRecord, access_token: &str) -> Result<Client> {
    if record.endpoint.is_empty() {
        return Err(Error::config(format!(
            "cluster '{}' has no API server endpoint",
            record.name
        )));
    }
    let ca = record.ca_certificate().ok_or_else(|| {
        Error::config(format!("cluster '{}' has no CA certificate", record.name))
    })?;

    let url: http::Uri = format!("https://{}", record.endpoint)
        .parse()
        .map_err(|e| Error::config(format!("invalid cluster endpoint '{}': {}", record.endpoint, e)))?;

    let mut config = Config::new(url);
    config.root_cert = Some(decode_ca(ca)?);
    config.auth_info.token = Some(SecretString::from(access_token.to_string()));
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    debug!(endpoint = %record.endpoint, "building kube client from cluster record");
    Ok(Client::try_from(config)?)
}

/// Build a client from a kubeconfig file (current context)
pub async fn client_from_kubeconfig(path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        Error::config(format!("failed to read kubeconfig {}: {}", path.display(), e))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::config(format!("failed to load kubeconfig {}: {}", path.display(), e))
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    debug!(path = %path.display(), "building kube client from kubeconfig");
    Ok(Client::try_from(config)?)
}
