//! Catalog loading.
//!
//! [`ProductService`] decides where the catalog comes from on each load
//! cycle: the network when online, then the persisted cache, then the
//! built-in fallback dataset. Only one cycle runs at a time.

mod connectivity;
mod notify;

pub use connectivity::Connectivity;
pub use notify::{Notice, NoticeLevel, Notifier, TracingNotifier};

#[cfg(test)]
pub use notify::mock::RecordingNotifier;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::fallback::fallback_records;
use crate::fetch::SourceResolver;
use crate::models::{Catalog, Product};
use crate::storage::{CacheInfo, CacheStore};
use crate::{Result, ShelfLifeError};

const MSG_CACHED: &str = "Используются кэшированные данные";
const MSG_STALE_CACHE: &str = "Используются устаревшие кэшированные данные";
const MSG_FALLBACK: &str = "Используются резервные данные";
const MSG_LOAD_FAILED: &str = "Не удалось загрузить данные о продуктах";
const MSG_REFRESHING: &str = "Обновление данных...";
const MSG_REFRESHED: &str = "Данные успешно обновлены";
const MSG_REFRESH_FAILED: &str = "Ошибка при обновлении данных";

/// Where the current catalog came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LoadState {
    /// Fetched from the network in this cycle
    Fresh,
    /// Read from the persistent cache
    Cached { stale: bool },
    /// Built-in sample data
    Fallback,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "network"),
            Self::Cached { stale: false } => write!(f, "cache"),
            Self::Cached { stale: true } => write!(f, "stale cache"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Result of a completed load cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub state: LoadState,
    /// Number of products in the catalog
    pub products: usize,
    /// URL the data originally came from, when known
    pub source: Option<String>,
}

/// Snapshot for troubleshooting
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub current_source: Option<String>,
    pub product_count: usize,
    pub cache: Option<CacheInfo>,
    pub data_sources: Vec<String>,
    pub online: bool,
}

/// Owns the catalog and every way of filling it
pub struct ProductService {
    resolver: SourceResolver,
    cache: CacheStore,
    connectivity: Connectivity,
    notifier: Arc<dyn Notifier>,
    catalog: RwLock<Arc<Catalog>>,
    cache_ttl: chrono::Duration,
    load_gate: Mutex<()>,
    generation: AtomicU64,
    last_outcome: RwLock<Option<LoadOutcome>>,
}

impl ProductService {
    pub fn new(
        resolver: SourceResolver,
        cache: CacheStore,
        connectivity: Connectivity,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            resolver,
            cache,
            connectivity,
            notifier,
            catalog: RwLock::new(Arc::new(Catalog::new())),
            cache_ttl: chrono::Duration::hours(24),
            load_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: RwLock::new(None),
        }
    }

    /// Age after which the cache counts as stale
    pub fn with_cache_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    /// Run a load cycle.
    ///
    /// A call made while another cycle is running waits for that cycle and
    /// returns its outcome instead of starting a new one.
    #[instrument(skip(self))]
    pub async fn load_products(&self) -> Result<LoadOutcome> {
        let seen = self.generation.load(Ordering::Acquire);
        let _gate = self.load_gate.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(outcome) = self.last_outcome() {
                debug!("Joined the load cycle that just finished");
                return Ok(outcome);
            }
        }

        let result = self.run_load_cycle().await;
        self.finish_cycle(result.as_ref().ok());
        result
    }

    async fn run_load_cycle(&self) -> Result<LoadOutcome> {
        let mut network_error = None;

        if self.connectivity.is_online() {
            match self.load_from_network().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(error = %e, "Network load failed, trying cache");
                    network_error = Some(e);
                }
            }
        } else {
            info!("Offline, loading from cache");
        }

        match self.load_from_cache().await {
            Ok(outcome) => {
                match outcome.state {
                    LoadState::Cached { stale: true } => {
                        self.notifier.notify(Notice::warning(MSG_STALE_CACHE))
                    }
                    _ if network_error.is_some() => {
                        self.notifier.notify(Notice::warning(MSG_CACHED))
                    }
                    _ => {}
                }
                return Ok(outcome);
            }
            Err(ShelfLifeError::CacheEmpty) => debug!("No cached products"),
            Err(e) => warn!(error = %e, "Cache load failed"),
        }

        match self.load_fallback() {
            Ok(outcome) => {
                self.notifier.notify(Notice::warning(MSG_FALLBACK));
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Fallback data failed to load");
                self.install(Catalog::new());
                self.notifier.notify(Notice::error(MSG_LOAD_FAILED));
                Err(network_error.unwrap_or(e))
            }
        }
    }

    async fn load_from_network(&self) -> Result<LoadOutcome> {
        let payload = self.resolver.fetch().await?;
        let products = payload.catalog.len();
        self.install(payload.catalog);

        Ok(LoadOutcome {
            state: LoadState::Fresh,
            products,
            source: Some(payload.source),
        })
    }

    async fn load_from_cache(&self) -> Result<LoadOutcome> {
        let record = self.cache.load().await?;
        let now = Utc::now();
        let stale = record.is_stale(self.cache_ttl, now);
        if stale {
            warn!(age_hours = record.age(now).num_hours(), "Cached products are stale");
        }

        let mut catalog = Catalog::new();
        catalog.process_products_data(&record.data, now)?;
        let products = catalog.len();
        self.install(catalog);

        Ok(LoadOutcome {
            state: LoadState::Cached { stale },
            products,
            source: record.source,
        })
    }

    fn load_fallback(&self) -> Result<LoadOutcome> {
        let records = fallback_records()?;
        let mut catalog = Catalog::new();
        catalog.process_products_data(&records, Utc::now())?;
        let products = catalog.len();
        self.install(catalog);

        Ok(LoadOutcome {
            state: LoadState::Fallback,
            products,
            source: None,
        })
    }

    fn install(&self, catalog: Catalog) {
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(catalog);
    }

    fn finish_cycle(&self, outcome: Option<&LoadOutcome>) {
        *self.last_outcome.write().unwrap_or_else(|e| e.into_inner()) = outcome.cloned();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn last_outcome(&self) -> Option<LoadOutcome> {
        self.last_outcome
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the cached copy and reload from the network, whatever the
    /// connectivity flag says. Failure is returned, not papered over.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) -> Result<LoadOutcome> {
        let _gate = self.load_gate.lock().await;
        self.notifier.notify(Notice::info(MSG_REFRESHING));

        self.resolver.cancel_pending_save().await;
        if let Err(e) = self.cache.clear().await {
            warn!(error = %e, "Failed to clear cache before refresh");
        }

        let result = self.load_from_network().await;
        match &result {
            Ok(outcome) => {
                info!(products = outcome.products, "Data refreshed");
                self.notifier.notify(Notice::success(MSG_REFRESHED));
            }
            Err(e) => {
                error!(error = %e, "Forced refresh failed");
                self.notifier.notify(Notice::error(MSG_REFRESH_FAILED));
            }
        }

        self.finish_cycle(result.as_ref().ok());
        result
    }

    /// Reload from the network when online.
    ///
    /// Returns whether fresh data was installed. Never falls back.
    #[instrument(skip(self))]
    pub async fn synchronize(&self) -> bool {
        if !self.connectivity.is_online() {
            info!("Offline, skipping synchronization");
            return false;
        }

        let _gate = self.load_gate.lock().await;
        let result = self.load_from_network().await;
        self.finish_cycle(result.as_ref().ok());

        match result {
            Ok(_) => {
                info!("Data synchronized");
                true
            }
            Err(e) => {
                warn!(error = %e, "Synchronization failed");
                false
            }
        }
    }

    /// Remove the cached copy and empty the catalog.
    ///
    /// A cache write still pending from the last fetch is cancelled first.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<()> {
        let _gate = self.load_gate.lock().await;
        self.resolver.cancel_pending_save().await;
        self.cache.clear().await?;
        self.install(Catalog::new());
        Ok(())
    }

    /// Current catalog, shared
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn product_by_code(&self, code: &str) -> Option<Product> {
        self.snapshot().get(code).cloned()
    }

    /// Every product, sorted by name
    pub fn all_products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self.snapshot().iter().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.code.cmp(&b.code)));
        products
    }

    pub fn product_count(&self) -> usize {
        self.snapshot().len()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            current_source: self.resolver.current_source(),
            product_count: self.product_count(),
            cache: self.cache.info().await,
            data_sources: self
                .resolver
                .sources()
                .candidates()
                .iter()
                .map(|u| u.to_string())
                .collect(),
            online: self.connectivity.is_online(),
        }
    }
}

/// Resynchronize after connectivity returns.
///
/// On every offline to online transition, waits `delay`, synchronizes and
/// reloads the catalog if synchronization succeeded.
pub fn spawn_reconnect_watcher(service: Arc<ProductService>, delay: Duration) -> JoinHandle<()> {
    let mut rx = service.connectivity.subscribe();

    tokio::spawn(async move {
        let mut was_online = *rx.borrow_and_update();

        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            if online && !was_online {
                info!(delay_ms = delay.as_millis() as u64, "Back online, scheduling sync");
                tokio::time::sleep(delay).await;
                if service.synchronize().await {
                    if let Err(e) = service.load_products().await {
                        warn!(error = %e, "Reload after reconnect failed");
                    }
                }
            }
            was_online = online;
        }
    })
}
