//! HTTP transport to an NSX manager.
//!
//! Wraps `reqwest` with basic auth and XML content negotiation. Certificate
//! verification can be turned off for lab managers with self-signed
//! certificates.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{NsxError, NsxResult};
use crate::metrics;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Default request timeout if not configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const XML_CONTENT_TYPE: &str = "application/xml";

/// Connection settings for an NSX manager.
#[derive(Clone, PartialEq, Eq)]
pub struct NsxConfig {
    /// Base URL, e.g. `https://nsxmanager.example.com`
    pub manager_url: String,
    pub username: String,
    pub password: String,
    /// Accept invalid/self-signed TLS certificates.
    pub allow_unverified_ssl: bool,
    pub request_timeout: Duration,
}

impl NsxConfig {
    pub fn new(
        manager_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            manager_url: manager_url.into(),
            username: username.into(),
            password: password.into(),
            allow_unverified_ssl: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_allow_unverified_ssl(mut self, allow: bool) -> Self {
        self.allow_unverified_ssl = allow;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check that the settings can produce a working client.
    pub fn validate(&self) -> NsxResult<()> {
        let url = self.manager_url.trim();
        if url.is_empty() {
            return Err(NsxError::Config("manager url is required".into()));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(NsxError::Config(format!(
                "manager url '{url}' must start with http:// or https://"
            )));
        }
        if self.username.is_empty() {
            return Err(NsxError::Config("username is required".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(NsxError::Config("request timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for NsxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsxConfig")
            .field("manager_url", &self.manager_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("allow_unverified_ssl", &self.allow_unverified_ssl)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// [`Transport`] backed by a real manager over HTTPS.
#[derive(Clone)]
pub struct NsxClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl NsxClient {
    pub fn new(config: NsxConfig) -> NsxResult<Self> {
        config.validate()?;
        if config.allow_unverified_ssl {
            warn!(
                manager_url = %config.manager_url,
                "TLS certificate verification disabled for NSX manager"
            );
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.allow_unverified_ssl)
            .build()
            .map_err(|e| NsxError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.manager_url.trim().trim_end_matches('/').to_owned(),
            username: config.username,
            password: config.password,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl fmt::Debug for NsxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsxClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for NsxClient {
    async fn execute(&self, request: ApiRequest) -> NsxResult<ApiResponse> {
        let method = request.method().clone();
        let url = self.url(request.path());
        debug!(%method, %url, "sending request to NSX manager");

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, XML_CONTENT_TYPE);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body_str() {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, XML_CONTENT_TYPE)
                .body(body.to_owned());
        }

        let response = builder.send().await.map_err(|e| {
            metrics::API_TRANSPORT_ERRORS.inc();
            NsxError::Transport(format!("{method} {url} failed: {e}"))
        })?;

        let status = response.status().as_u16();
        metrics::API_REQUESTS
            .with_label_values(&[method.as_str(), &status.to_string()])
            .inc();

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect::<Vec<_>>();
        let body = response.text().await.map_err(|e| {
            metrics::API_TRANSPORT_ERRORS.inc();
            NsxError::Transport(format!("failed to read response body from {url}: {e}"))
        })?;
        debug!(%method, %url, status, "NSX manager responded");

        let mut api_response = ApiResponse::new(status, body);
        for (name, value) in headers {
            api_response = api_response.with_header(name, value);
        }
        Ok(api_response)
    }
}
