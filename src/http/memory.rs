// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process API backend.
//!
//! Routes `(method, path)` pairs to async handlers and counts every call,
//! which makes it the natural backend for offline runs and for asserting
//! how many network round-trips the cache actually made.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};

use super::transport::{HttpRequest, HttpResponse, Method, Transport};
use crate::error::SyncError;

type Handler = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, SyncError>> + Send + Sync>;

#[derive(Default)]
pub struct InMemoryTransport {
    routes: RwLock<HashMap<(Method, String), Handler>>,
    log: RwLock<Vec<HttpRequest>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `method path`.
    pub fn route<F, Fut>(&self, method: Method, path: impl Into<String>, handler: F)
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, SyncError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |req| handler(req).boxed());
        self.routes.write().insert((method, path.into()), handler);
    }

    /// Always answer `status` with `body`.
    pub fn respond_json(&self, method: Method, path: impl Into<String>, status: u16, body: Value) {
        self.route(method, path, move |_| {
            let response = HttpResponse::json(status, &body);
            async move { Ok(response) }
        });
    }

    /// Always answer 200 with `{ success: true, data }`.
    pub fn respond_data(&self, method: Method, path: impl Into<String>, data: Value) {
        self.respond_json(method, path, 200, json!({ "success": true, "data": data }));
    }

    /// Number of requests received for `method path`.
    #[must_use]
    pub fn calls(&self, method: Method, path: &str) -> usize {
        self.log
            .read()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.log.read().len()
    }

    /// Every request received, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.read().clone()
    }

    pub fn clear_log(&self) {
        self.log.write().clear();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        self.log.write().push(request.clone());

        let handler = self.routes.read().get(&(request.method, request.path.clone())).cloned();
        match handler {
            Some(handler) => handler(request).await,
            None => Ok(HttpResponse::json(
                404,
                &json!({ "success": false, "message": format!("Route {} {} not found", request.method, request.path) }),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_and_counts_calls() {
        let transport = InMemoryTransport::new();
        transport.respond_data(Method::Get, "/contracts", json!([]));

        let response = transport.send(HttpRequest::new(Method::Get, "/contracts")).await.unwrap();
        assert_eq!(response.status, 200);
        transport.send(HttpRequest::new(Method::Get, "/contracts")).await.unwrap();

        assert_eq!(transport.calls(Method::Get, "/contracts"), 2);
        assert_eq!(transport.calls(Method::Post, "/contracts"), 0);
        assert_eq!(transport.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_envelope() {
        let transport = InMemoryTransport::new();
        let response = transport.send(HttpRequest::new(Method::Get, "/nowhere")).await.unwrap();

        assert_eq!(response.status, 404);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_handler_sees_request() {
        let transport = InMemoryTransport::new();
        transport.route(Method::Post, "/echo", |req: HttpRequest| async move {
            Ok(HttpResponse::json(200, &json!({ "success": true, "data": req.body_json() })))
        });

        let mut request = HttpRequest::new(Method::Post, "/echo");
        request.body = Some(br#"{"x":1}"#.to_vec());
        let response = transport.send(request).await.unwrap();

        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["data"]["x"], 1);
    }
}
