//! Authenticated REST client for Google APIs
//!
//! Wraps a `reqwest::Client` with the bearer token, optional IAM inspection
//! token and user agent that every Google API call carries. Service-specific
//! clients ([`crate::cluster::GkeClusterManager`],
//! [`crate::policy::GcpPolicyService`]) build on top of this.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Header carrying an IAM inspection token
pub const INSPECTION_TOKEN_HEADER: &str = "x-goog-iam-authorization-token";

/// Default request timeout for Google API calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URLs of the Google services used by the checks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// GKE control-plane service
    pub container: String,
    /// IAM service (service account policies)
    pub iam: String,
    /// Cloud Resource Manager (project policies)
    pub resource_manager: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            container: "https://container.googleapis.com".to_string(),
            iam: "https://iam.googleapis.com".to_string(),
            resource_manager: "https://cloudresourcemanager.googleapis.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every service at one base URL (local test servers)
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            container: base.clone(),
            iam: base.clone(),
            resource_manager: base,
        }
    }
}

/// Build `<base>/<segments...>`, percent-encoding each segment.
///
/// Values taken from annotations or flags land in a single path segment, so
/// `/`, `?` and `#` inside them cannot change the request target.
pub fn resource_url<I, S>(base: &str, segments: I) -> std::result::Result<Url, ApiError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut url = Url::parse(base).map_err(|_| ApiError::InvalidUrl(base.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Failure of a single Google API request
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The service answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Message from the Google error body, or the status reason
        message: String,
    },

    /// The request never produced a response
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body did not have the expected shape
    #[error("invalid response: {0}")]
    Decode(String),

    /// The service base URL cannot carry a resource path
    #[error("invalid service URL '{0}'")]
    InvalidUrl(String),
}

impl ApiError {
    /// True when the service reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Google API client with credentials attached
#[derive(Clone, Debug)]
pub struct GoogleApiClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl GoogleApiClient {
    /// Create a client sending `access_token` (and `inspection_token` if set)
    pub fn new(access_token: &str, inspection_token: Option<&str>) -> Result<Self> {
        Self::with_endpoints(access_token, inspection_token, Endpoints::default())
    }

    /// Create a client against custom service endpoints
    pub fn with_endpoints(
        access_token: &str,
        inspection_token: Option<&str>,
        endpoints: Endpoints,
    ) -> Result<Self> {
        let headers = default_headers(access_token, inspection_token)?;
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, endpoints })
    }

    /// Service base URLs in use
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> std::result::Result<T, ApiError> {
        debug!(url = %url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        decode(response).await
    }

    /// POST `body` as JSON to `url` and decode the JSON response
    pub async fn post_json<B, T>(&self, url: Url, body: &B) -> std::result::Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(url = %url, "POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        decode(response).await
    }
}

fn default_headers(access_token: &str, inspection_token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .map_err(|_| Error::config("access token contains invalid header characters"))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    if let Some(token) = inspection_token {
        let mut value = HeaderValue::from_str(token)
            .map_err(|_| Error::config("inspection token contains invalid header characters"))?;
        value.set_sensitive(true);
        headers.insert(INSPECTION_TOKEN_HEADER, value);
    }

    headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
    Ok(headers)
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> std::result::Result<T, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    trace!(status = %status, bytes = body.len(), "response");

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|env| env.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Program asked for a token when none is supplied
pub const GCLOUD_PROGRAM: &str = "gcloud";

/// Resolve the Google access token.
///
/// An explicit token wins; otherwise the operator's ambient gcloud
/// credentials are used via `gcloud auth print-access-token`.
pub async fn resolve_access_token(explicit: Option<String>) -> Result<String> {
    if let Some(token) = explicit {
        return Ok(token);
    }
    debug!("no access token supplied, asking gcloud");
    print_access_token(GCLOUD_PROGRAM).await
}

/// Run `<program> auth print-access-token`.
///
/// The child is killed if the returned future is dropped, so a cancelled
/// check does not leave gcloud waiting on a prompt.
async fn print_access_token(program: impl AsRef<OsStr>) -> Result<String> {
    let output = tokio::process::Command::new(program)
        .args(["auth", "print-access-token"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            Error::config(format!(
                "no access token supplied and gcloud could not be run: {}",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(Error::config(format!(
            "gcloud auth print-access-token failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(Error::config("gcloud returned an empty access token"));
    }
    Ok(token)
}
