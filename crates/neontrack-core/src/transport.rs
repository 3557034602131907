//! Outbound transport for tracking requests
//!
//! Sends are fire-and-forget: nothing waits for completion and failed
//! requests are never retried.

use crate::{params::QueryParams, Error, Result};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

/// A tracking GET request: endpoint plus filtered query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingRequest {
    pub endpoint: Url,
    pub params: QueryParams,
}

impl TrackingRequest {
    pub fn new(endpoint: Url, params: QueryParams) -> Self {
        Self { endpoint, params }
    }

    /// Full request URL with the parameters query-encoded
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sends tracking requests
pub trait Transport: Send + Sync {
    fn send(&self, request: TrackingRequest);
}

/// Cross-origin GET over HTTP, spawned on the tokio runtime
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpTransport {
    /// Must be called from within a tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime("HttpTransport"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, runtime })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: TrackingRequest) {
        let client = self.client.clone();
        let url = request.url();
        self.runtime.spawn(async move {
            match client.get(url.clone()).send().await {
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "Tracking request sent");
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Tracking request failed");
                }
            }
        });
    }
}

/// Transport that keeps every request in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<TrackingRequest>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<TrackingRequest> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain recorded requests
    pub fn take(&self) -> Vec<TrackingRequest> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Action codes (`a`) of recorded requests, in send order
    pub fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.param("a").map(str::to_string))
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, request: TrackingRequest) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }
}
