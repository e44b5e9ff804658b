//! Strategy router: the single entry point for application requests.
//!
//! ```text
//!                    ┌──────────────┐
//!  RequestDescriptor │   GET?       │── no ──▶ mutation path ──▶ network │ queue (202)
//!  ─────────────────▶│              │
//!                    └──────┬───────┘
//!                           │ yes
//!                  RouteTable::classify(path)
//!                           │
//!      ┌──────────────┬─────┴────────┬─────────────────────┐
//!  CacheFirst    NetworkFirst   StaleWhileRevalidate  NetworkWithFallback
//!  cache → net   net → stale    cache + bg refresh    net → any tier
//!  → placeholder → offline      → net → offline       → offline
//! ```
//!
//! [`StrategyRouter::handle`] never fails: every error path ends in a
//! degraded response (stale data, placeholder, offline body, or a
//! "queued" acknowledgment).

pub mod fetch;
pub mod responses;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::cache::{CacheTier, TieredCache};
use crate::connectivity::Connectivity;
use crate::error::OfflineError;
use crate::http::{cache_key, HttpMethod, RequestDescriptor, RequestMode, Response, ResponseSource};
use crate::queue::{DomainTable, MutationQueue, QueuedMutation};
use crate::tasks::BackgroundTasks;
use crate::transport::Transport;

pub use fetch::{Cacheability, NetworkFetcher};
pub use rules::{builtin_routes, RouteMatch, RouteSpec, RouteTable, RoutingRule, Strategy, AUTH_PATTERN};

use fetch::upstream_status;

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub network_timeout: Duration,
    pub max_cacheable_bytes: usize,
    pub offline_document_url: String,
    pub api_path_prefix: String,
    pub auth_path_patterns: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            network_timeout: Duration::from_secs(8),
            max_cacheable_bytes: 2 * 1024 * 1024,
            offline_document_url: "/offline.html".to_string(),
            api_path_prefix: "/api/".to_string(),
            auth_path_patterns: vec![AUTH_PATTERN.to_string()],
        }
    }
}

pub struct StrategyRouter {
    routes: RouteTable,
    cache: Arc<TieredCache>,
    fetcher: NetworkFetcher,
    cacheability: Arc<Cacheability>,
    queue: Arc<MutationQueue>,
    domains: Arc<DomainTable>,
    tasks: Arc<BackgroundTasks>,
    settings: RouterSettings,
}

impl StrategyRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routes: RouteTable,
        cache: Arc<TieredCache>,
        transport: Arc<dyn Transport>,
        connectivity: Arc<Connectivity>,
        queue: Arc<MutationQueue>,
        domains: Arc<DomainTable>,
        tasks: Arc<BackgroundTasks>,
        settings: RouterSettings,
    ) -> Result<Self, OfflineError> {
        let cacheability = Cacheability::new(settings.max_cacheable_bytes, &settings.auth_path_patterns)?;
        Ok(Self {
            routes,
            cache,
            fetcher: NetworkFetcher::new(transport, connectivity, settings.network_timeout),
            cacheability: Arc::new(cacheability),
            queue,
            domains,
            tasks,
            settings,
        })
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Answer one application request.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: RequestDescriptor) -> Response {
        match request.method {
            HttpMethod::Get => {
                let route = self.routes.classify(&request.url);
                let response = match route.strategy {
                    Strategy::CacheFirst => self.cache_first(&request, route.tier).await,
                    Strategy::NetworkFirst => self.network_first(&request, route.tier).await,
                    Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&request, route.tier).await,
                    Strategy::NetworkWithFallback => self.network_with_fallback(&request, route.tier).await,
                };
                crate::metrics::record_strategy_outcome(route.strategy.as_str(), response.source.label());
                debug!(strategy = %route.strategy, tier = %route.tier, source = response.source.label(), "Request routed");
                response
            }
            method if method.is_mutating() => self.mutate(&request).await,
            _ => self.pass_through(&request).await,
        }
    }

    async fn lookup(&self, tier: CacheTier, key: &str) -> Option<crate::cache::CacheEntry> {
        match self.cache.get(tier, key).await {
            Ok(entry) => entry,
            Err(err) => {
                crate::metrics::record_storage_error("cache_get");
                error!(tier = %tier, key, error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn cache_first(&self, request: &RequestDescriptor, tier: CacheTier) -> Response {
        let key = request.cache_key();
        if let Some(entry) = self.lookup(tier, &key).await {
            return Response::from_entry(&entry, ResponseSource::Cache { tier });
        }

        match self.fetcher.fetch_ok(request).await {
            Ok(response) => {
                store(&self.cache, &self.cacheability, tier, &key, request, &response).await;
                response.annotate(ResponseSource::Network)
            }
            Err(err) => {
                warn!(key, error = %err, "Cache miss and network failed");
                if tier == CacheTier::Assets || looks_like_image(request) {
                    responses::placeholder_image()
                } else {
                    self.offline_response(request, upstream_status(&err)).await
                }
            }
        }
    }

    async fn network_first(&self, request: &RequestDescriptor, tier: CacheTier) -> Response {
        let key = request.cache_key();
        match self.fetcher.fetch_ok(request).await {
            Ok(response) => {
                store(&self.cache, &self.cacheability, tier, &key, request, &response).await;
                response.annotate(ResponseSource::Network)
            }
            Err(err) => {
                warn!(key, error = %err, "Network failed, trying cache");
                match self.lookup(tier, &key).await {
                    Some(entry) => Response::from_entry(&entry, ResponseSource::Stale { tier }),
                    None => self.offline_response(request, upstream_status(&err)).await,
                }
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &RequestDescriptor, tier: CacheTier) -> Response {
        let key = request.cache_key();
        if let Some(entry) = self.lookup(tier, &key).await {
            self.spawn_revalidate(request.clone(), tier, key);
            return Response::from_entry(&entry, ResponseSource::Cache { tier });
        }

        match self.fetcher.fetch_ok(request).await {
            Ok(response) => {
                store(&self.cache, &self.cacheability, tier, &key, request, &response).await;
                response.annotate(ResponseSource::Network)
            }
            Err(err) => {
                warn!(key, error = %err, "Nothing cached and network failed");
                self.offline_response(request, upstream_status(&err)).await
            }
        }
    }

    /// Refresh `key` in the background. The caller already has its answer,
    /// so failures only reach the task registry and the logs.
    fn spawn_revalidate(&self, request: RequestDescriptor, tier: CacheTier, key: String) {
        let fetcher = self.fetcher.clone();
        let cache = Arc::clone(&self.cache);
        let cacheability = Arc::clone(&self.cacheability);
        self.tasks.spawn("revalidate", async move {
            let response = fetcher.fetch_ok(&request).await?;
            if cacheability.allows(&request, &response) {
                match cache.put(tier, &key, response.to_payload()).await {
                    Ok(()) | Err(OfflineError::StorageFull { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
            debug!(key, tier = %tier, "Revalidated cached entry");
            Ok(())
        });
    }

    async fn network_with_fallback(&self, request: &RequestDescriptor, tier: CacheTier) -> Response {
        let key = request.cache_key();
        match self.fetcher.fetch_ok(request).await {
            Ok(response) => {
                store(&self.cache, &self.cacheability, tier, &key, request, &response).await;
                response.annotate(ResponseSource::Network)
            }
            Err(err) => {
                warn!(key, error = %err, "Network failed, searching all tiers");
                match self.cache.find_any(&key, &CacheTier::FALLBACK_ORDER).await {
                    Ok(Some((found, entry))) => Response::from_entry(&entry, ResponseSource::Fallback { tier: found }),
                    Ok(None) => self.offline_response(request, upstream_status(&err)).await,
                    Err(store_err) => {
                        crate::metrics::record_storage_error("cache_get");
                        error!(key, error = %store_err, "Cache search failed");
                        self.offline_response(request, upstream_status(&err)).await
                    }
                }
            }
        }
    }

    async fn pass_through(&self, request: &RequestDescriptor) -> Response {
        match self.fetcher.send(request).await {
            Ok(response) => response.annotate(ResponseSource::Network),
            Err(err) => {
                warn!(error = %err, "Request failed");
                self.offline_response(request, None).await
            }
        }
    }

    /// Send a mutation; queue it if the network does not accept it.
    async fn mutate(&self, request: &RequestDescriptor) -> Response {
        let failure = match self.fetcher.send(request).await {
            Ok(response) if response.is_success() => {
                if let Err(err) = self.cache.invalidate_url(&request.url).await {
                    crate::metrics::record_storage_error("cache_invalidate");
                    error!(url = %request.url, error = %err, "Cache invalidation failed");
                }
                return response.annotate(ResponseSource::Network);
            }
            Ok(response) => OfflineError::ServerRejected {
                status: response.status,
            },
            Err(err) => err,
        };

        let domain = self.domains.classify(&request.url).to_string();
        let mutation = match QueuedMutation::from_request(domain.as_str(), request) {
            Ok(m) => m,
            Err(err) => {
                crate::metrics::record_mutation_dropped(&domain);
                error!(domain, url = %request.url, error = %err, "Mutation dropped, payload cannot be queued");
                return self.offline_response(request, upstream_status(&failure)).await;
            }
        };

        match self.queue.enqueue(&mutation).await {
            Ok(()) => {
                warn!(domain, id = %mutation.id, error = %failure, "Mutation failed, queued for replay");
                responses::queued(&mutation)
            }
            Err(err) => {
                crate::metrics::record_mutation_dropped(&domain);
                crate::metrics::record_storage_error("queue_enqueue");
                error!(domain, url = %request.url, error = %err, "Mutation dropped, queue write failed");
                self.offline_response(request, upstream_status(&failure)).await
            }
        }
    }

    /// Degraded answer when nothing better is available.
    async fn offline_response(&self, request: &RequestDescriptor, upstream: Option<u16>) -> Response {
        if request.mode == RequestMode::Navigate {
            let key = cache_key(HttpMethod::Get, &self.settings.offline_document_url);
            return match self.lookup(CacheTier::Static, &key).await {
                Some(entry) => Response::from_entry(&entry, ResponseSource::Offline),
                None => responses::offline_html(),
            };
        }
        if request.path().starts_with(&self.settings.api_path_prefix) || accepts_json(request) {
            return responses::offline_json(&request.url, upstream);
        }
        responses::offline_text()
    }

    /// Fetch `url` and store it in its routed tier. Returns whether it was cached.
    pub async fn warm(&self, url: &str) -> Result<bool, OfflineError> {
        let request = RequestDescriptor::get(url);
        let route = self.routes.classify(url);
        let response = self.fetcher.fetch_ok(&request).await?;
        if !self.cacheability.allows(&request, &response) {
            return Ok(false);
        }
        self.cache.put(route.tier, &request.cache_key(), response.to_payload()).await?;
        Ok(true)
    }
}

/// Best-effort write-back; a full tier or a storage error only costs a
/// future cache hit.
async fn store(
    cache: &TieredCache,
    cacheability: &Cacheability,
    tier: CacheTier,
    key: &str,
    request: &RequestDescriptor,
    response: &Response,
) {
    if !cacheability.allows(request, response) {
        return;
    }
    match cache.put(tier, key, response.to_payload()).await {
        Ok(()) => {}
        Err(OfflineError::StorageFull { size, budget, .. }) => {
            debug!(tier = %tier, key, size, budget, "Response not cached, tier full");
        }
        Err(err) => {
            crate::metrics::record_storage_error("cache_put");
            error!(tier = %tier, key, error = %err, "Cache write failed");
        }
    }
}

fn accepts_json(request: &RequestDescriptor) -> bool {
    request
        .header("accept")
        .is_some_and(|v| v.to_ascii_lowercase().contains("json"))
}

fn looks_like_image(request: &RequestDescriptor) -> bool {
    let path = request.path().to_ascii_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"]
        .iter()
        .any(|ext| path.ends_with(ext))
}
