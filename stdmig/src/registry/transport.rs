//! HTTP transport seam for the registry client.
//!
//! The client only needs "send this request, give me status and body", so
//! the wire is hidden behind [`Transport`]. Production uses reqwest; tests
//! use the in-memory [`super::MockRegistry`].

use std::future::Future;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use stdmig_common::config::{HttpSettings, RegistryEndpoint};
use thiserror::Error;

/// HTTP verbs used against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
}

impl Method {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }

    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request relative to the registry base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryRequest {
    pub method: Method,
    /// Already percent-encoded path, starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Status and raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }
}

/// The exchange never produced an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportFailure {
    /// A malformed URL will not fix itself on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}

/// Sends one request and returns the raw response.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &RegistryRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportFailure>> + Send;
}

/// reqwest-backed transport with the credential and JSON headers preset.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(endpoint: &RegistryEndpoint, http: &HttpSettings) -> Result<Self, TransportFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let name = HeaderName::from_bytes(endpoint.credential_header.as_bytes())
            .map_err(|e| TransportFailure::Other(format!("invalid credential header name: {e}")))?;
        let mut value = HeaderValue::from_str(&endpoint.token)
            .map_err(|e| TransportFailure::Other(format!("invalid credential value: {e}")))?;
        value.set_sensitive(true);
        headers.insert(name, value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(http.timeout)
            .build()
            .map_err(|e| TransportFailure::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, request: &RegistryRequest) -> Result<reqwest::Url, TransportFailure> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| {
                TransportFailure::InvalidUrl(format!("{}{}: {e}", self.base_url, request.path))
            })?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &RegistryRequest) -> Result<RawResponse, TransportFailure> {
        let url = self.url_for(request)?;
        let mut builder = self.client.request(request.method.as_reqwest(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;
        Ok(RawResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportFailure::Connect(err.to_string())
    } else {
        TransportFailure::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> ReqwestTransport {
        let endpoint = RegistryEndpoint::new("https://registry.example/api/v3/", "token-123456789");
        ReqwestTransport::new(&endpoint, &HttpSettings::default()).unwrap()
    }

    #[test]
    fn test_url_joins_base_path_and_query() {
        let request = RegistryRequest {
            method: Method::Get,
            path: "/organizations/gh/acme/coding-standards".into(),
            query: vec![("limit".into(), "100".into()), ("cursor".into(), "a b".into())],
            body: None,
        };
        let url = transport().url_for(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example/api/v3/organizations/gh/acme/coding-standards?limit=100&cursor=a+b"
        );
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let mut endpoint = RegistryEndpoint::new("https://registry.example", "token");
        endpoint.credential_header = "bad header".into();
        let err = ReqwestTransport::new(&endpoint, &HttpSettings::default()).unwrap_err();
        assert!(matches!(err, TransportFailure::Other(_)));
    }

    #[test]
    fn test_invalid_url_not_retryable() {
        assert!(!TransportFailure::InvalidUrl("x".into()).is_retryable());
        assert!(TransportFailure::Timeout("slow".into()).is_retryable());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert_eq!(Method::Get.as_reqwest(), reqwest::Method::GET);
    }
}
