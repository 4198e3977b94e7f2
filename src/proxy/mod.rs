//! Offline proxy.
//!
//! A local HTTP server between a client and the upstream site. Page assets
//! are served cache-first; the catalog resource is served network-first and
//! falls back to the last good copy, then to the built-in dataset.

mod cache;
mod handlers;
mod middleware;
mod responses;

pub use cache::{CacheStorage, CachedResponse};
pub use responses::{ApiError, ApiResponse};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    extract::Request,
    http::Method,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use bytes::Bytes;
use reqwest::header::{HeaderMap, CACHE_CONTROL, HOST};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::fetch::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::loader::{Notice, Notifier, TracingNotifier};
use crate::storage::FileStore;
use crate::{Result, ShelfLifeError};

/// Prefix shared by every cache this proxy creates
pub const CACHE_PREFIX: &str = "shelf-life-";

/// Path of the proxy's own status endpoint
pub const HEALTH_PATH: &str = "/__proxy/health";

/// Installation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Installing,
    Activating,
    Active,
}

/// Signals from the proxy to its clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// A new cache generation was installed over an older one
    UpdateAvailable { version: String },
}

/// Caching reverse proxy for the site and its catalog
pub struct OfflineProxy {
    transport: Arc<dyn HttpTransport>,
    upstream: Url,
    caches: CacheStorage,
    version: String,
    static_cache: String,
    data_cache: String,
    precache: Vec<String>,
    data_pattern: String,
    network_timeout: Duration,
    lifecycle: RwLock<Lifecycle>,
    events: broadcast::Sender<ProxyEvent>,
}

impl OfflineProxy {
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn HttpTransport>,
        caches: CacheStorage,
    ) -> Result<Self> {
        let version = config.proxy.cache_version.clone();
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            transport,
            upstream: config.upstream_url()?,
            caches,
            static_cache: format!("{}static-{}", CACHE_PREFIX, version),
            data_cache: format!("{}data-{}", CACHE_PREFIX, version),
            version,
            precache: config.proxy.precache.clone(),
            data_pattern: config.proxy.data_pattern.clone(),
            network_timeout: Duration::from_secs(config.proxy.network_timeout_secs),
            lifecycle: RwLock::new(Lifecycle::Installing),
            events,
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.write().unwrap_or_else(|e| e.into_inner()) = state;
        debug!(?state, "Proxy lifecycle");
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    pub fn cache_storage(&self) -> &CacheStorage {
        &self.caches
    }

    /// Names of the static and data caches of this generation
    pub fn cache_names(&self) -> (&str, &str) {
        (&self.static_cache, &self.data_cache)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    fn is_current(&self, name: &str) -> bool {
        name == self.static_cache || name == self.data_cache
    }

    /// Precache the configured assets into the static cache.
    ///
    /// Assets that fail to download are skipped. Returns how many were
    /// cached.
    #[instrument(skip(self))]
    pub async fn install(&self) -> Result<usize> {
        self.set_lifecycle(Lifecycle::Installing);

        let has_previous = self
            .caches
            .keys()
            .await
            .iter()
            .any(|name| name.starts_with(CACHE_PREFIX) && !self.is_current(name));

        self.caches.open(&self.static_cache).await?;

        let mut cached = 0;
        for path in &self.precache {
            match self.fetch_upstream(path, false).await {
                Ok(response) if response.status.is_success() => {
                    self.caches
                        .put(&self.static_cache, path, CachedResponse::from_http(&response))
                        .await?;
                    cached += 1;
                }
                Ok(response) => warn!(path = %path, status = %response.status, "Precache skipped"),
                Err(e) => warn!(path = %path, error = %e, "Precache failed"),
            }
        }

        info!(cached, total = self.precache.len(), "Proxy installed");

        if has_previous {
            info!(version = %self.version, "New cache generation over an older one");
            // No subscribers is fine
            let _ = self.events.send(ProxyEvent::UpdateAvailable {
                version: self.version.clone(),
            });
        }

        Ok(cached)
    }

    /// Delete every cache that is not part of this generation, then start
    /// serving from cache
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Result<()> {
        self.set_lifecycle(Lifecycle::Activating);

        for name in self.caches.keys().await {
            if !self.is_current(&name) {
                info!(cache = %name, "Deleting old cache");
                self.caches.delete(&name).await?;
            }
        }

        self.set_lifecycle(Lifecycle::Active);
        info!("Proxy active");
        Ok(())
    }

    /// Answer one request
    pub async fn handle(&self, request: Request) -> Response {
        let key = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        if self.lifecycle() != Lifecycle::Active || request.method() != Method::GET {
            return match self.pass_through(request, &key).await {
                Ok(response) => response,
                Err(e) => ApiError::from(e).into_response(),
            };
        }

        if request.uri().path().contains(&self.data_pattern) {
            self.network_first(&key).await
        } else {
            self.cache_first(&key).await
        }
    }

    async fn network_first(&self, key: &str) -> Response {
        match self.fetch_upstream(key, true).await {
            Ok(response) if response.status.is_success() => {
                let cached = CachedResponse::from_http(&response);
                if let Err(e) = self.caches.put(&self.data_cache, key, cached.clone()).await {
                    warn!(error = %e, "Failed to cache catalog response");
                }
                debug!(key, "Catalog from network");
                return cached.into_response();
            }
            Ok(response) => warn!(key, status = %response.status, "Catalog request failed"),
            Err(e) => warn!(key, error = %e, "Catalog request failed"),
        }

        if let Some(cached) = self.caches.get(&self.data_cache, key).await {
            debug!(key, "Catalog from cache");
            return cached.into_response();
        }

        info!(key, "Serving fallback catalog");
        responses::fallback_catalog()
    }

    async fn cache_first(&self, key: &str) -> Response {
        if let Some(cached) = self.caches.match_request(key).await {
            debug!(key, "Served from cache");
            return cached.into_response();
        }

        match self.fetch_upstream(key, false).await {
            Ok(response) => {
                let copy = CachedResponse::from_http(&response);
                if response.status.is_success() {
                    if let Err(e) = self.caches.put(&self.static_cache, key, copy.clone()).await {
                        warn!(error = %e, "Failed to cache response");
                    }
                }
                copy.into_response()
            }
            Err(e) => {
                warn!(key, error = %e, "Network unavailable");
                if key == "/" {
                    if let Some(index) = self.caches.match_request("/index.html").await {
                        return index.into_response();
                    }
                }
                responses::not_found()
            }
        }
    }

    async fn pass_through(&self, request: Request, key: &str) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let body: Bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(ShelfLifeError::internal)?;

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if name != HOST {
                headers.append(name.clone(), value.clone());
            }
        }

        let request = HttpRequest {
            method: parts.method,
            url: self.upstream_for(key)?,
            headers,
            body,
        };

        let response = self.send(request).await?;
        Ok(CachedResponse::from_http(&response).into_response())
    }

    async fn fetch_upstream(&self, key: &str, no_cache: bool) -> Result<HttpResponse> {
        let mut request = HttpRequest::get(self.upstream_for(key)?);
        if no_cache {
            request = request.header(CACHE_CONTROL, "no-cache");
        }
        self.send(request).await
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.to_string();
        tokio::time::timeout(self.network_timeout, self.transport.send(request))
            .await
            .map_err(|_| ShelfLifeError::FetchTimeout {
                url,
                timeout_secs: self.network_timeout.as_secs(),
            })?
    }

    fn upstream_for(&self, key: &str) -> Result<Url> {
        self.upstream
            .join(key.trim_start_matches('/'))
            .map_err(|e| ShelfLifeError::InvalidInput(format!("bad request path {}: {}", key, e)))
    }
}

/// Create the proxy router
pub fn create_router(proxy: Arc<OfflineProxy>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Outermost first: the request id is assigned before the trace span opens
    Router::new()
        .route(HEALTH_PATH, get(handlers::health_check))
        .fallback(handlers::proxy_request)
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(axum::middleware::from_fn(middleware::request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(middleware::request_span))
                .layer(Extension(proxy)),
        )
}

/// Install, activate and serve the proxy until Ctrl-C
pub async fn serve(config: &AppConfig) -> Result<()> {
    let transport = Arc::new(ReqwestTransport::new()?);
    let caches = match &config.proxy.cache_dir {
        Some(dir) => CacheStorage::persistent(Arc::new(FileStore::new(dir))).await?,
        None => CacheStorage::in_memory(),
    };
    let proxy = Arc::new(OfflineProxy::from_config(config, transport, caches)?);

    let mut events = proxy.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ProxyEvent::UpdateAvailable { .. }) => {
                    TracingNotifier.notify(Notice::info("Доступно обновление приложения"))
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    proxy.install().await?;
    proxy.activate().await?;

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Offline proxy listening on http://{} -> {}", addr, proxy.upstream());

    axum::serve(listener, create_router(proxy))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(ShelfLifeError::internal)?;

    Ok(())
}
