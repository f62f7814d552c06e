//! reqwest-backed transport

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use url::Url;
use uuid::Uuid;

use super::{Transport, TransportRequest, TransportResponse};
use crate::error::mapping::parse_retry_after;
use crate::error::{Result, ServiceError};
use crate::util::sanitize_for_logging;

const DEFAULT_USER_AGENT: &str = concat!("guard-sdk/", env!("CARGO_PKG_VERSION"));

/// Header carrying a fresh id on every outbound request
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SENSITIVE_HEADER_MARKERS: [&str; 4] = ["secret", "authorization", "token", "api-key"];

/// Copy of `headers` with credential-bearing values replaced by `REDACTED`
pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_lowercase();
            if SENSITIVE_HEADER_MARKERS.iter().any(|m| lower.contains(m)) {
                (name.clone(), "REDACTED".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// HTTP transport rooted at a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Transport with default settings
    pub fn new(base_url: &str) -> Result<Self> {
        Self::builder(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        if path.is_empty() {
            return Ok(self.base_url.clone());
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ServiceError::configuration(format!("Invalid request path '{}': {}", path, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let url = self.url_for(&request.path)?;
        let request_id = Uuid::new_v4().to_string();

        debug!(
            "{} {} [{}] headers={:?}",
            request.method,
            sanitize_for_logging(url.as_str()),
            request_id,
            redact_headers(&request.headers)
        );

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(REQUEST_ID_HEADER, request_id.as_str());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await?;

        debug!("[{}] -> {} ({} bytes)", request_id, status, body.len());

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Builder for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    base_url: String,
    timeout: Option<Duration>,
    user_agent: String,
    headers: Vec<(String, String)>,
    bearer_token: Option<String>,
}

impl HttpTransportBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Some(Duration::from_secs(20)),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
            bearer_token: None,
        }
    }

    /// Per-request timeout enforced by the HTTP client
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Header sent with every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let mut base_url = Url::parse(&self.base_url)
            .map_err(|e| ServiceError::configuration(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ServiceError::configuration(format!(
                "Unsupported URL scheme '{}'",
                base_url.scheme()
            )));
        }
        // join() replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| ServiceError::configuration(format!("Invalid user agent: {}", e)))?,
        );
        for (name, value) in &self.headers {
            let name = HeaderName::from_str(name)
                .map_err(|e| ServiceError::configuration(format!("Invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ServiceError::configuration(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }
        if let Some(token) = &self.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ServiceError::configuration(format!("Invalid auth header: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let mut builder = Client::builder().default_headers(headers).gzip(true);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ServiceError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport { client, base_url })
    }
}
