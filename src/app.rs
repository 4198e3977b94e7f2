//! Application controller.
//!
//! Wires configuration into the loader, search and calculator, and turns
//! their results into what a front end shows: counts, notices, results.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::fetch::{DataSources, HttpTransport, ProbeResult, ReqwestTransport, SourceResolver};
use crate::loader::{
    spawn_reconnect_watcher, Connectivity, Diagnostics, LoadOutcome, Notice, Notifier,
    ProductService, TracingNotifier,
};
use crate::models::{CalculationResult, Product};
use crate::search::{Debouncer, SearchIndex};
use crate::storage::{CacheStore, FileStore, KeyValueStore};
use crate::{Result, ShelfLifeError};

/// What the front end shows after a load
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub product_count: usize,
    pub last_update: Option<DateTime<Utc>>,
    /// Set when the load succeeded
    pub outcome: Option<LoadOutcome>,
    /// User-facing message when it did not
    pub error: Option<String>,
}

/// The catalog application
pub struct App {
    service: Arc<ProductService>,
    index: SearchIndex,
    notifier: Arc<dyn Notifier>,
    debouncer: Debouncer,
    reconnect_delay: Duration,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl App {
    /// Build the application with the real network and on-disk cache
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        let store = Arc::new(FileStore::new(&config.cache.dir));
        Self::with_parts(config, transport, store, Arc::new(TracingNotifier))
    }

    /// Build the application over explicit collaborators
    pub fn with_parts(
        config: &AppConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let cache = CacheStore::new(store, config.version.clone());
        let resolver = SourceResolver::new(transport, DataSources::from_site(&config.site)?)
            .with_timeout(config.fetch_timeout())
            .with_probe_timeout(config.probe_timeout())
            .with_cache(cache.clone());

        let service = ProductService::new(
            resolver,
            cache,
            Connectivity::new(config.sync.start_online),
            notifier.clone(),
        )
        .with_cache_ttl(config.cache_ttl());

        Ok(Self {
            service: Arc::new(service),
            index: SearchIndex::from_config(&config.search),
            notifier,
            debouncer: Debouncer::new(config.debounce()),
            reconnect_delay: config.reconnect_delay(),
            last_update: RwLock::new(None),
        })
    }

    pub fn service(&self) -> &Arc<ProductService> {
        &self.service
    }

    /// Probe the sources, then load the catalog.
    ///
    /// Always returns a status; on failure the error is reported as a notice
    /// and the status reflects whatever the catalog holds.
    #[instrument(skip(self))]
    pub async fn load_products_data(&self) -> AppStatus {
        let probes = self.service.resolver().probe().await;
        match probes.iter().find(|p| p.ok) {
            Some(working) => info!(url = %working.url, "Working data source"),
            None => warn!("No working data source, expecting cache or fallback"),
        }

        match self.service.load_products().await {
            Ok(outcome) => {
                let now = Utc::now();
                *self.last_update.write().unwrap_or_else(|e| e.into_inner()) = Some(now);
                info!(
                    products = outcome.products,
                    state = %outcome.state,
                    "Application data loaded"
                );
                AppStatus {
                    product_count: self.service.product_count(),
                    last_update: Some(now),
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) => {
                let message = e.root_cause().user_message();
                warn!(error = %e, "Critical product load failure");
                self.notifier.notify(Notice::error(message));
                AppStatus {
                    product_count: self.service.product_count(),
                    last_update: self.last_update(),
                    outcome: None,
                    error: Some(message.to_string()),
                }
            }
        }
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Search results as the suggestion list shows them
    pub fn search(&self, query: &str) -> Vec<Product> {
        let catalog = self.service.snapshot();
        self.index
            .search_limited(&catalog, query)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Debounced search; `on_results` only sees the last query of a burst
    pub fn search_as_you_type<F>(&self, query: impl Into<String>, on_results: F)
    where
        F: FnOnce(Vec<Product>) + Send + 'static,
    {
        let query = query.into();
        let service = self.service.clone();
        let index = self.index;

        self.debouncer.call(move || async move {
            let catalog = service.snapshot();
            let results: Vec<Product> = index
                .search_limited(&catalog, &query)
                .into_iter()
                .cloned()
                .collect();
            on_results(results);
        });
    }

    /// Pick a product for the calculator, announcing its standard if it has one
    pub fn select_product(&self, code: &str) -> Result<Product> {
        let product = self
            .service
            .product_by_code(code)
            .ok_or_else(|| ShelfLifeError::product_not_found(code))?;

        if let Some(standard) = product.standard_notice() {
            self.notifier
                .notify(Notice::info(format!("Стандарт: {}", standard)));
        }

        Ok(product)
    }

    /// Expiry of `code` produced on `production_date`, as of now
    pub fn calculate(&self, code: &str, production_date: NaiveDate) -> Result<CalculationResult> {
        self.calculate_at(code, production_date, chrono::Local::now().naive_local())
    }

    /// Expiry of `code` produced on `production_date`, as of `now`
    pub fn calculate_at(
        &self,
        code: &str,
        production_date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<CalculationResult> {
        let product = self
            .service
            .product_by_code(code)
            .ok_or_else(|| ShelfLifeError::product_not_found(code))?;
        CalculationResult::for_product(&product, production_date, now)
    }

    /// Reload from the network, dropping the cached copy first
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        let outcome = self.service.force_refresh().await?;
        *self.last_update.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        Ok(outcome)
    }

    pub async fn synchronize(&self) -> bool {
        self.service.synchronize().await
    }

    pub async fn probe(&self) -> Vec<ProbeResult> {
        self.service.resolver().probe().await
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.service.diagnostics().await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.service.clear_cache().await
    }

    /// Record a connectivity change
    pub fn set_online(&self, online: bool) {
        self.service.connectivity().set_online(online);
    }

    /// Resynchronize automatically whenever connectivity returns
    pub fn watch_connectivity(&self) -> JoinHandle<()> {
        spawn_reconnect_watcher(self.service.clone(), self.reconnect_delay)
    }

    /// Finish background work before the runtime is dropped.
    ///
    /// Pending searches are cancelled; the cache write of the last fetched
    /// catalog is awaited so the next start can use it offline.
    pub async fn shutdown(&self) {
        self.debouncer.cancel();
        self.service.resolver().flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::transport::mock::{Scripted, ScriptedTransport};
    use crate::loader::{LoadState, NoticeLevel, RecordingNotifier};
    use crate::storage::MemoryStore;
    use std::sync::Mutex;

    const SOURCE: &str = "http://site.test/app/data.json";
    const CATALOG: &str = r#"[
        {"Код продукции":"10","Полное наименование (русское)":"Молоко","Срок годности":"5","Название стандарта":"ГОСТ 31450-2013"},
        {"Код продукции":"11","Полное наименование (русское)":"Молоко топлёное","Срок годности":0},
        {"Код продукции":"12","Полное наименование (русское)":"Кефир","Срок годности":7}
    ]"#;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.site.page_url = "http://site.test/app/".into();
        config.site.repo_name = "app".into();
        config.site.mirrors = vec![];
        config
    }

    fn app(transport: ScriptedTransport) -> (App, Arc<ScriptedTransport>, Arc<RecordingNotifier>) {
        let transport = Arc::new(transport);
        let notifier = Arc::new(RecordingNotifier::new());
        let app = App::with_parts(
            &test_config(),
            transport.clone(),
            Arc::new(MemoryStore::new()),
            notifier.clone(),
        )
        .unwrap();
        (app, transport, notifier)
    }

    fn file_app(dir: &tempfile::TempDir, online: bool, transport: ScriptedTransport) -> App {
        let mut config = test_config();
        config.sync.start_online = online;
        App::with_parts(
            &config,
            Arc::new(transport),
            Arc::new(FileStore::new(dir.path())),
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_load_probes_then_loads() {
        let (app, transport, _) = app(ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)));

        let status = app.load_products_data().await;
        assert_eq!(status.product_count, 3);
        assert!(status.last_update.is_some());
        assert_eq!(status.outcome.unwrap().state, LoadState::Fresh);

        // Three probes (all candidates resolve to the same URL) and one load
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_search_through_app() {
        let (app, _, _) = app(ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)));
        app.load_products_data().await;

        let names: Vec<String> = app.search("молоко").into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Молоко", "Молоко топлёное"]);
        assert!(app.search("м").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_as_you_type_reports_last_query() {
        let (app, _, _) = app(ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)));
        app.load_products_data().await;

        let results = Arc::new(Mutex::new(Vec::new()));
        for query in ["мо", "кеф"] {
            let results = results.clone();
            app.search_as_you_type(query, move |found| {
                results.lock().unwrap().push(found.len());
            });
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*results.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_select_product_announces_standard() {
        let (app, _, notifier) = app(ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)));
        app.load_products_data().await;
        notifier.clear();

        app.select_product("12").unwrap();
        assert!(notifier.notices().is_empty());

        app.select_product("10").unwrap();
        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Info);
        assert!(notices[0].message.contains("ГОСТ 31450-2013"));

        assert!(matches!(
            app.select_product("999"),
            Err(ShelfLifeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_calculate() {
        let (app, _, _) = app(ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)));
        app.load_products_data().await;

        let now = ymd(2024, 1, 3).and_hms_opt(12, 0, 0).unwrap();
        let result = app.calculate_at("10", ymd(2024, 1, 1), now).unwrap();
        assert_eq!(result.expiry_date, ymd(2024, 1, 6));
        assert_eq!(result.days_remaining, 3);

        // No shelf life
        assert!(matches!(
            app.calculate_at("11", ymd(2024, 1, 1), now),
            Err(ShelfLifeError::Validation { .. })
        ));
        // Future production date
        assert!(matches!(
            app.calculate_at("10", ymd(2024, 1, 4), now),
            Err(ShelfLifeError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_sources_use_fallback() {
        let (app, transport, notifier) = app(ScriptedTransport::new());

        let status = app.load_products_data().await;
        assert_eq!(status.product_count, 3);
        assert_eq!(status.outcome.unwrap().state, LoadState::Fallback);
        assert!(notifier
            .messages()
            .contains(&"Используются резервные данные".to_string()));
        // Only probes and load attempts, no panics on unreachable sources
        assert!(!transport.calls().is_empty());
    }

    #[test]
    fn test_shutdown_persists_catalog_before_runtime_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let app = file_app(
                &dir,
                true,
                ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)),
            );
            app.load_products_data().await;
            app.shutdown().await;
        });
        drop(runtime);

        assert!(dir.path().join("products_cache.json").exists());
    }

    #[tokio::test]
    async fn test_offline_start_reads_catalog_saved_by_previous_run() {
        let dir = tempfile::tempdir().unwrap();

        let online = file_app(
            &dir,
            true,
            ScriptedTransport::new().route(SOURCE, Scripted::json(CATALOG)),
        );
        online.load_products_data().await;
        online.shutdown().await;
        drop(online);

        let offline = file_app(&dir, false, ScriptedTransport::new());
        let status = offline.load_products_data().await;
        assert_eq!(status.product_count, 3);
        assert_eq!(
            status.outcome.unwrap().state,
            LoadState::Cached { stale: false }
        );
        assert!(offline.select_product("10").is_ok());
    }
}
