// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::SyncError;

/// [`Transport`] backed by a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, timeout }
    }

    fn url_for(&self, request: &HttpRequest) -> Result<url::Url, SyncError> {
        let mut url = url::Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| SyncError::Config(format!("invalid request url for '{}': {e}", request.path)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    fn map_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout)
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        let url = self.url_for(&request)?;
        debug!(method = %request.method, %url, "Sending request");

        let mut builder = self.client.request(request.method.into(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?.to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::Method;

    #[test]
    fn test_url_joins_base_path_and_query() {
        let transport = ReqwestTransport::new("https://api.example.com/v1/", Duration::from_secs(5)).unwrap();
        let mut request = HttpRequest::new(Method::Get, "/contracts");
        request.query = vec![("page".into(), "2".into()), ("search".into(), "a b".into())];

        let url = transport.url_for(&request).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/contracts?page=2&search=a+b");
    }

    #[test]
    fn test_url_without_query_has_no_question_mark() {
        let transport = ReqwestTransport::new("http://localhost:3000/api", Duration::from_secs(5)).unwrap();
        let url = transport.url_for(&HttpRequest::new(Method::Delete, "/templates/t1")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/templates/t1");
    }
}
