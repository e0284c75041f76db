// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Authenticated REST client.
//!
//! [`HttpClient`] injects the bearer token, applies the request timeout and
//! turns every non-2xx answer into a [`SyncError`]:
//!
//! | Response | Error | Side effect |
//! |----------|-------|-------------|
//! | 401 | `Unauthorized` | token cleared, [`AuthEvent::SessionExpired`] broadcast |
//! | 403 | `Forbidden` | none |
//! | other 4xx | `Rejected` with the server message | none |
//! | 5xx | `Server` | none |
//! | 2xx with `success: false` | `Rejected` | none |
//!
//! Retrying is the caller's business; the client makes exactly one attempt.

pub mod envelope;
pub mod memory;
pub mod reqwest_transport;
pub mod token;
pub mod transport;

pub use envelope::{ApiResponse, Paginated, Pagination};
pub use memory::InMemoryTransport;
pub use reqwest_transport::ReqwestTransport;
pub use token::{AuthEvent, FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{HttpRequest, HttpResponse, Method, Transport};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, GENERIC_ERROR_MESSAGE};

const AUTH_EVENT_CAPACITY: usize = 16;

/// Raw (non-envelope) response body, as returned by export endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// File name from `Content-Disposition`, when the server sent one
    pub file_name: Option<String>,
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    auth_events: broadcast::Sender<AuthEvent>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenStore>, timeout: Duration) -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            inner: Arc::new(ClientInner { transport, tokens, auth_events, timeout }),
        }
    }

    /// reqwest transport against `config.api_url`, with file-backed token
    /// storage when `config.token_path` is set.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.api_url, config.request_timeout())?;
        let tokens: Arc<dyn TokenStore> = match &config.token_path {
            Some(path) => Arc::new(FileTokenStore::new(path, &config.token_storage_key)),
            None => Arc::new(MemoryTokenStore::new()),
        };
        Ok(Self::new(Arc::new(transport), tokens, config.request_timeout()))
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.inner.tokens
    }

    /// Subscribe to credential side effects (redirect-to-login).
    pub fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth_events.subscribe()
    }

    pub async fn get(&self, path: &str, params: &[(String, String)]) -> Result<ApiResponse, SyncError> {
        self.request(Method::Get, path, None, params).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, SyncError> {
        self.request(Method::Post, path, Some(body), &[]).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<ApiResponse, SyncError> {
        self.request(Method::Put, path, Some(body), &[]).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse, SyncError> {
        self.request(Method::Patch, path, Some(body), &[]).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, SyncError> {
        self.request(Method::Delete, path, None, &[]).await
    }

    /// Issue a JSON request and unwrap the response envelope.
    #[tracing::instrument(skip(self, body, params), fields(status = tracing::field::Empty))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(String, String)],
    ) -> Result<ApiResponse, SyncError> {
        let response = self.send(method, path, body, params, "application/json").await?;
        tracing::Span::current().record("status", response.status);
        ApiResponse::parse(response.status, &response.body)
    }

    /// Issue a request whose successful body is not an envelope (file exports).
    pub async fn download(&self, path: &str, params: &[(String, String)]) -> Result<RawBody, SyncError> {
        let response = self.send(Method::Get, path, None, params, "*/*").await?;
        Ok(RawBody {
            content_type: response.header("content-type").map(str::to_string),
            file_name: response.header("content-disposition").and_then(disposition_file_name),
            bytes: response.body,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(String, String)],
        accept: &str,
    ) -> Result<HttpResponse, SyncError> {
        let mut request = HttpRequest::new(method, path);
        request.query = params.to_vec();
        request.headers.push(("accept".into(), accept.into()));
        if let Some(token) = self.inner.tokens.get().await? {
            request.headers.push(("authorization".into(), format!("Bearer {token}")));
        }
        if let Some(body) = body {
            request.headers.push(("content-type".into(), "application/json".into()));
            request.body = Some(serde_json::to_vec(body)?);
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.inner.timeout, self.inner.transport.send(request)).await;
        crate::metrics::record_http_latency(method.as_str(), started.elapsed());

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                crate::metrics::record_http_request(method.as_str(), err.kind());
                return Err(err);
            }
            Err(_) => {
                warn!(%method, path, timeout = ?self.inner.timeout, "Request timed out");
                crate::metrics::record_http_request(method.as_str(), "timeout");
                return Err(SyncError::Timeout(self.inner.timeout));
            }
        };
        crate::metrics::record_http_request(method.as_str(), status_class(response.status));

        if response.is_success() {
            return Ok(response);
        }
        Err(self.classify_failure(path, response).await)
    }

    async fn classify_failure(&self, path: &str, response: HttpResponse) -> SyncError {
        let message = envelope::error_message(&response.body)
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());

        match response.status {
            401 => {
                warn!(path, "Session rejected, clearing stored credentials");
                if let Err(e) = self.inner.tokens.clear().await {
                    warn!(error = %e, "Failed to clear stored token");
                }
                // No subscribers is fine
                let _ = self.inner.auth_events.send(AuthEvent::SessionExpired { path: path.to_string() });
                SyncError::Unauthorized(message)
            }
            403 => SyncError::Forbidden(message),
            status @ 500..=599 => SyncError::Server { status, message },
            status => {
                debug!(path, status, %message, "Request rejected");
                SyncError::Rejected { status, message }
            }
        }
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// `attachment; filename="contracts.csv"` → `contracts.csv`
fn disposition_file_name(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}
