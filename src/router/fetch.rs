// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network access for the router and the cacheability check.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::timeout;

use crate::connectivity::Connectivity;
use crate::error::OfflineError;
use crate::http::{HttpMethod, RequestDescriptor, Response};
use crate::transport::Transport;

/// Timeout-bounded transport handle. Cheap to clone into background tasks.
#[derive(Clone)]
pub struct NetworkFetcher {
    transport: Arc<dyn Transport>,
    connectivity: Arc<Connectivity>,
    timeout: Duration,
}

impl NetworkFetcher {
    pub fn new(transport: Arc<dyn Transport>, connectivity: Arc<Connectivity>, timeout: Duration) -> Self {
        Self {
            transport,
            connectivity,
            timeout,
        }
    }

    /// Send one request. Any HTTP status is `Ok`; a known-offline device
    /// fails without touching the transport.
    pub async fn send(&self, request: &RequestDescriptor) -> Result<Response, OfflineError> {
        if !self.connectivity.is_online() {
            return Err(OfflineError::NetworkUnavailable("device offline".into()));
        }

        let _timer = crate::metrics::NetworkTimer::start();
        match timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                crate::metrics::record_network_timeout();
                Err(OfflineError::Timeout(self.timeout))
            }
        }
    }

    /// Like [`send`](Self::send) but non-2xx answers become `ServerRejected`.
    pub async fn fetch_ok(&self, request: &RequestDescriptor) -> Result<Response, OfflineError> {
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(OfflineError::ServerRejected {
                status: response.status,
            })
        }
    }
}

/// Upstream status worth reporting in an offline body.
pub(crate) fn upstream_status(err: &OfflineError) -> Option<u16> {
    match err {
        OfflineError::ServerRejected { status } => Some(*status),
        _ => None,
    }
}

/// Decides whether a network response may be written to the cache.
///
/// Same rule for every strategy: a `GET` answered with 2xx, not marked
/// `no-store`, no larger than the size cap, and not an authentication path.
#[derive(Debug, Clone)]
pub struct Cacheability {
    max_bytes: usize,
    auth: Vec<Regex>,
}

impl Cacheability {
    pub fn new(max_bytes: usize, auth_patterns: &[String]) -> Result<Self, OfflineError> {
        let auth = auth_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| OfflineError::Config(format!("auth pattern {:?}: {}", p, e))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { max_bytes, auth })
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[must_use]
    pub fn is_auth_path(&self, request: &RequestDescriptor) -> bool {
        let path = request.path();
        self.auth.iter().any(|re| re.is_match(&path))
    }

    #[must_use]
    pub fn allows(&self, request: &RequestDescriptor, response: &Response) -> bool {
        request.method == HttpMethod::Get
            && response.is_success()
            && !no_store(response.header("cache-control"))
            && !no_store(request.header("cache-control"))
            && response.body.len() <= self.max_bytes
            && !self.is_auth_path(request)
    }
}

fn no_store(cache_control: Option<&str>) -> bool {
    cache_control.is_some_and(|v| {
        v.split(',')
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    })
}
