//! Authenticated, retrying, paginating client for a coding-standard registry.
//!
//! One [`RegistryClient`] per registry (source and destination). Every call
//! goes through the shared [`RetryPolicy`]: transport failures, 5xx and 429
//! are retried with exponential backoff, any other 4xx fails immediately.
//! List endpoints are cursor paginated and [`RegistryClient::list_all`]
//! drains them.

pub mod endpoints;
pub mod mock;
pub mod transport;

use std::collections::HashSet;
use std::future::Future;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stdmig_common::config::{HttpSettings, RegistryEndpoint};
use stdmig_common::{ErrorCode, RetryPolicy, RetryableError, run_with_retry};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

pub use mock::{MockRegistry, RecordedCall};
pub use transport::{
    Method, RawResponse, RegistryRequest, ReqwestTransport, Transport, TransportFailure,
};

/// Response bodies longer than this are truncated in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Registry call failures, after retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{registry}: credentials rejected ({status}) for {method} {path}")]
    AuthFailure {
        registry: String,
        method: Method,
        path: String,
        status: u16,
    },

    #[error("{registry}: {method} {path} not found")]
    NotFound {
        registry: String,
        method: Method,
        path: String,
    },

    #[error("{registry}: {method} {path} rejected with {status}: {body}")]
    ClientError {
        registry: String,
        method: Method,
        path: String,
        status: u16,
        body: String,
    },

    #[error("{registry}: {method} {path} failed after {attempts} attempts: {reason}")]
    TransportExhausted {
        registry: String,
        method: Method,
        path: String,
        attempts: u32,
        reason: String,
    },

    #[error("{registry}: {method} {path} still rate limited after {attempts} attempts")]
    RateLimited {
        registry: String,
        method: Method,
        path: String,
        attempts: u32,
    },

    #[error("{registry}: undecodable response from {method} {path}: {message}")]
    Decode {
        registry: String,
        method: Method,
        path: String,
        message: String,
    },

    #[error("{registry}: {message}")]
    InvalidEndpoint { registry: String, message: String },
}

impl RegistryError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::AuthFailure { .. } => ErrorCode::RegistryAuthFailed,
            Self::NotFound { .. } => ErrorCode::RegistryNotFound,
            Self::ClientError { .. } => ErrorCode::RegistryClientError,
            Self::TransportExhausted { .. } => ErrorCode::RegistryTransportExhausted,
            Self::RateLimited { .. } => ErrorCode::RegistryRateLimited,
            Self::Decode { .. } => ErrorCode::RegistryDecodeError,
            Self::InvalidEndpoint { .. } => ErrorCode::ConfigMissingEndpoint,
        }
    }

    /// Whether resending the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportExhausted { .. } | Self::RateLimited { .. })
    }
}

/// Outcome of a single attempt, before the retry decision.
#[derive(Debug)]
enum AttemptError {
    Transport(TransportFailure),
    Server { status: u16, body: String },
    Throttled { multiplier: u32 },
    Fatal(RegistryError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(failure) => write!(f, "{failure}"),
            Self::Server { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Throttled { .. } => write!(f, "HTTP 429 Too Many Requests"),
            Self::Fatal(err) => write!(f, "{err}"),
        }
    }
}

impl RetryableError for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(failure) => failure.is_retryable(),
            Self::Server { .. } | Self::Throttled { .. } => true,
            Self::Fatal(_) => false,
        }
    }

    fn backoff_multiplier(&self) -> u32 {
        match self {
            Self::Throttled { multiplier } => *multiplier,
            _ => 1,
        }
    }
}

/// What a guarded create produced.
enum Delivery<R> {
    Response(Option<Value>),
    Landed(R),
}

/// One page of a list endpoint: `{data: [...], pagination: {cursor}}`.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<PageInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    cursor: Option<Value>,
}

impl<T> Page<T> {
    /// Cursor for the next page; absent, empty and `"0"` all mean "last page".
    fn next_cursor(&self) -> Option<String> {
        let cursor = self.pagination.as_ref()?.cursor.as_ref()?;
        let cursor = match cursor {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!cursor.is_empty() && cursor != "0").then_some(cursor)
    }
}

/// Items drained from a list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// The page cap stopped the walk while the registry still had a next page.
    pub truncated: bool,
}

/// Single-object envelope: `{data: {...}}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Client bound to one registry.
#[derive(Debug, Clone)]
pub struct RegistryClient<T = ReqwestTransport> {
    label: String,
    transport: T,
    http: HttpSettings,
}

impl RegistryClient<ReqwestTransport> {
    /// Build a reqwest-backed client. `label` names the registry in logs
    /// and errors (`source`, `destination`).
    pub fn connect(
        label: impl Into<String>,
        endpoint: &RegistryEndpoint,
        http: &HttpSettings,
    ) -> Result<Self, RegistryError> {
        let label = label.into();
        let transport =
            ReqwestTransport::new(endpoint, http).map_err(|e| RegistryError::InvalidEndpoint {
                registry: label.clone(),
                message: e.to_string(),
            })?;
        Ok(Self::with_transport(label, transport, http.clone()))
    }
}

impl<T: Transport> RegistryClient<T> {
    pub fn with_transport(label: impl Into<String>, transport: T, http: HttpSettings) -> Self {
        Self {
            label: label.into(),
            transport,
            http,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.http.retry
    }

    /// Issue a request with retries. Returns `None` for an empty 2xx body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        params: &[(&str, String)],
    ) -> Result<Option<Value>, RegistryError> {
        let request = RegistryRequest {
            method,
            path: path.to_string(),
            query: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            body,
        };
        let operation = format!("{} {} {}", self.label, method, path);
        let multiplier = self.http.retry.rate_limit_multiplier.max(1);

        let outcome = run_with_retry(&operation, &self.http.retry, || {
            self.attempt(&request, multiplier)
        })
        .await;

        outcome.map_err(|err| self.finalize_error(err, &request))
    }

    /// POST a create request whose body is `{data: R}`, without ever
    /// sending it twice for a write that took effect.
    ///
    /// Before each resend, `landed` is asked whether the previous attempt
    /// reached the registry after all; if it finds the object, that is the
    /// result.
    pub async fn create_once<R, F, Fut>(
        &self,
        path: &str,
        body: Value,
        landed: F,
    ) -> Result<R, RegistryError>
    where
        R: DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Option<R>>,
    {
        let request = RegistryRequest {
            method: Method::Post,
            path: path.to_string(),
            query: Vec::new(),
            body: Some(body),
        };
        let operation = format!("{} POST {}", self.label, path);
        let multiplier = self.http.retry.rate_limit_multiplier.max(1);
        let (request_ref, landed) = (&request, &landed);
        let mut sent = false;

        let outcome = run_with_retry(&operation, &self.http.retry, || {
            let resend = std::mem::replace(&mut sent, true);
            async move {
                if resend && let Some(found) = landed().await {
                    debug!(
                        registry = %self.label,
                        path = %request_ref.path,
                        "Earlier attempt landed, not resending"
                    );
                    return Ok(Delivery::Landed(found));
                }
                self.attempt(request_ref, multiplier).await.map(Delivery::Response)
            }
        })
        .await
        .map_err(|err| self.finalize_error(err, &request))?;

        match outcome {
            Delivery::Landed(found) => Ok(found),
            Delivery::Response(value) => {
                let value = value
                    .ok_or_else(|| self.decode_error(Method::Post, path, "empty response body"))?;
                let envelope: Envelope<R> = serde_json::from_value(value)
                    .map_err(|e| self.decode_error(Method::Post, path, e.to_string()))?;
                Ok(envelope.data)
            }
        }
    }

    /// Issue a request and decode the body as `R`.
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        params: &[(&str, String)],
    ) -> Result<R, RegistryError> {
        let value = self.request(method, path, body, params).await?;
        let value = value.ok_or_else(|| self.decode_error(method, path, "empty response body"))?;
        serde_json::from_value(value).map_err(|e| self.decode_error(method, path, e.to_string()))
    }

    /// Issue a request whose response wraps the object in `{data: ...}`.
    pub async fn request_data<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<R, RegistryError> {
        let envelope: Envelope<R> = self.request_json(method, path, body, &[]).await?;
        Ok(envelope.data)
    }

    /// Drain a cursor-paginated list endpoint.
    ///
    /// Stops on the last page (no usable cursor), on an empty page, on a
    /// repeated cursor, or after `page_cap` pages.
    pub async fn list_all<R: DeserializeOwned>(
        &self,
        path: &str,
        page_cap: Option<usize>,
    ) -> Result<Vec<R>, RegistryError> {
        Ok(self.list_pages(path, page_cap).await?.items)
    }

    /// Like [`RegistryClient::list_all`], but says whether the cap cut the
    /// listing short. A truncated listing is a prefix, never a full set.
    pub async fn list_pages<R: DeserializeOwned>(
        &self,
        path: &str,
        page_cap: Option<usize>,
    ) -> Result<Listing<R>, RegistryError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        let mut pages = 0usize;
        let mut truncated = false;

        loop {
            let mut params = vec![("limit", self.http.page_limit.to_string())];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }

            let page: Page<R> = self.request_json(Method::Get, path, None, &params).await?;
            pages += 1;
            let count = page.data.len();
            let next = page.next_cursor();
            items.extend(page.data);
            trace!(registry = %self.label, path, page = pages, count, "Fetched page");

            if count == 0 {
                break;
            }
            let Some(next) = next else {
                break;
            };
            if !seen.insert(next.clone()) {
                warn!(
                    registry = %self.label,
                    path,
                    cursor = %next,
                    "Cursor repeated, stopping pagination"
                );
                break;
            }
            if page_cap.is_some_and(|cap| pages >= cap) {
                debug!(registry = %self.label, path, pages, "Page cap reached");
                truncated = true;
                break;
            }
            if !self.http.page_pause.is_zero() {
                sleep(self.http.page_pause).await;
            }
            cursor = Some(next);
        }

        debug!(
            registry = %self.label,
            path,
            pages,
            total = items.len(),
            truncated,
            "Listing complete"
        );
        Ok(Listing { items, truncated })
    }

    async fn attempt(
        &self,
        request: &RegistryRequest,
        multiplier: u32,
    ) -> Result<Option<Value>, AttemptError> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(AttemptError::Transport)?;
        let method = request.method;
        let path = request.path.clone();

        match response.status {
            200..=299 => {
                if response.body.trim().is_empty() {
                    return Ok(None);
                }
                serde_json::from_str(&response.body)
                    .map(Some)
                    .map_err(|e| {
                        AttemptError::Fatal(self.decode_error(method, &path, e.to_string()))
                    })
            }
            429 => Err(AttemptError::Throttled { multiplier }),
            status @ 500..=599 => Err(AttemptError::Server {
                status,
                body: truncate(&response.body),
            }),
            status @ (401 | 403) => Err(AttemptError::Fatal(RegistryError::AuthFailure {
                registry: self.label.clone(),
                method,
                path,
                status,
            })),
            404 => Err(AttemptError::Fatal(RegistryError::NotFound {
                registry: self.label.clone(),
                method,
                path,
            })),
            status => Err(AttemptError::Fatal(RegistryError::ClientError {
                registry: self.label.clone(),
                method,
                path,
                status,
                body: truncate(&response.body),
            })),
        }
    }

    fn finalize_error(&self, err: AttemptError, request: &RegistryRequest) -> RegistryError {
        let attempts = self.http.retry.max_attempts();
        let registry = self.label.clone();
        let method = request.method;
        let path = request.path.clone();
        match err {
            AttemptError::Fatal(err) => err,
            AttemptError::Throttled { .. } => RegistryError::RateLimited {
                registry,
                method,
                path,
                attempts,
            },
            AttemptError::Transport(TransportFailure::InvalidUrl(message)) => {
                RegistryError::InvalidEndpoint { registry, message }
            }
            other => RegistryError::TransportExhausted {
                registry,
                method,
                path,
                attempts,
                reason: other.to_string(),
            },
        }
    }

    fn decode_error(
        &self,
        method: Method,
        path: &str,
        message: impl Into<String>,
    ) -> RegistryError {
        RegistryError::Decode {
            registry: self.label.clone(),
            method,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
