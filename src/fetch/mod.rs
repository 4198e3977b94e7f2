//! Catalog fetching.
//!
//! [`SourceResolver`] walks the ordered candidate list until one source
//! yields a usable payload, hands that payload to the cache without waiting
//! for the write, and remembers which source won. [`SourceResolver::probe`]
//! checks every candidate for diagnostics only.

mod probe;
mod sources;
pub mod transport;

pub use probe::ProbeResult;
pub use sources::DataSources;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Url;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::models::{records_from_value, BatchReport, Catalog, RawRecord};
use crate::storage::CacheStore;
use crate::utils::truncate;
use crate::{Result, ShelfLifeError};

/// Characters of a response body written to the debug log
const BODY_LOG_CHARS: usize = 500;

/// A payload accepted from the network
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    /// URL of the candidate that produced it
    pub source: String,
    /// Records as received
    pub records: Vec<RawRecord>,
    /// The records, normalized
    pub catalog: Catalog,
    pub report: BatchReport,
}

/// Tries candidate sources in order
pub struct SourceResolver {
    transport: Arc<dyn HttpTransport>,
    sources: DataSources,
    timeout: Duration,
    probe_timeout: Duration,
    cache: Option<CacheStore>,
    current_source: RwLock<Option<String>>,
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

impl SourceResolver {
    pub fn new(transport: Arc<dyn HttpTransport>, sources: DataSources) -> Self {
        Self {
            transport,
            sources,
            timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            cache: None,
            current_source: RwLock::new(None),
            pending_save: Mutex::new(None),
        }
    }

    /// Per-candidate timeout for loads
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-candidate timeout for probes
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Cache that receives every accepted payload
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn sources(&self) -> &DataSources {
        &self.sources
    }

    /// URL of the last candidate that produced a payload
    pub fn current_source(&self) -> Option<String> {
        self.current_source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Fetch the catalog from the first candidate that yields a usable payload.
    ///
    /// A candidate is usable when it answers with a success status and a
    /// non-empty JSON array holding at least one valid product.
    #[instrument(skip(self), fields(candidates = self.sources.len()))]
    pub async fn fetch(&self) -> Result<FetchedPayload> {
        let mut attempts = 0;
        let mut last = None;

        for url in self.sources.candidates() {
            attempts += 1;
            info!(url = %url, attempt = attempts, "Trying data source");

            match self.try_load_from_url(url).await {
                Ok(payload) => {
                    info!(
                        url = %url,
                        products = payload.catalog.len(),
                        "Data loaded from source"
                    );
                    *self
                        .current_source
                        .write()
                        .unwrap_or_else(|e| e.into_inner()) = Some(payload.source.clone());
                    self.spawn_cache_save(&payload);
                    return Ok(payload);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Data source failed");
                    last = Some(e);
                }
            }
        }

        let last = last.unwrap_or_else(|| {
            ShelfLifeError::InvalidFormat("no candidate sources configured".into())
        });
        Err(ShelfLifeError::NoSourceAvailable {
            attempts,
            last: Box::new(last),
        })
    }

    async fn try_load_from_url(&self, url: &Url) -> Result<FetchedPayload> {
        let request = HttpRequest::get(url.clone())
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-cache");

        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| ShelfLifeError::FetchTimeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        debug!(url = %url, status = %response.status, "Response received");

        if !response.status.is_success() {
            return Err(ShelfLifeError::Http {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }

        match response.content_type() {
            Some(ct) if ct.contains("application/json") => {}
            other => warn!(url = %url, content_type = ?other, "Unexpected content type"),
        }

        let text = String::from_utf8_lossy(&response.body);
        debug!(body = %truncate(&text, BODY_LOG_CHARS), "Response body");

        if text.trim().is_empty() {
            return Err(ShelfLifeError::EmptyBody {
                url: url.to_string(),
            });
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| ShelfLifeError::InvalidJson {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let records = records_from_value(value)?;
        let mut catalog = Catalog::new();
        let report = catalog.process_products_data(&records, Utc::now())?;

        Ok(FetchedPayload {
            source: url.to_string(),
            records,
            catalog,
            report,
        })
    }

    fn spawn_cache_save(&self, payload: &FetchedPayload) {
        let Some(cache) = self.cache.clone() else {
            return;
        };

        let records = payload.records.clone();
        let source = payload.source.clone();
        let handle = tokio::spawn(async move {
            cache.save(&records, Some(&source)).await;
        });

        let previous = self
            .pending_save
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        // A newer payload supersedes an unfinished write
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Wait for the most recent background cache write to finish
    pub async fn flush(&self) {
        let handle = self
            .pending_save
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Abort the pending background cache write.
    ///
    /// Returns once the write has either been cancelled or finished, so a
    /// cache clear issued afterwards cannot be undone by it.
    pub async fn cancel_pending_save(&self) {
        let handle = self
            .pending_save
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            if handle.await.is_ok() {
                debug!("Cache write finished before it could be cancelled");
            }
        }
    }

    /// Request every candidate and report what each returned.
    ///
    /// Diagnostic only; the result never influences loading.
    #[instrument(skip(self))]
    pub async fn probe(&self) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.sources.len());
        for url in self.sources.candidates() {
            let result = probe::probe_url(self.transport.as_ref(), url, self.probe_timeout).await;
            debug!(url = %url, ok = result.ok, "Probe finished");
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mock::{Scripted, ScriptedTransport};
    use super::*;
    use crate::storage::MemoryStore;

    const GOOD: &str = r#"[{"Код продукции":"1","Полное наименование (русское)":"Кефир","Срок годности":"10"}]"#;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn resolver(transport: Arc<ScriptedTransport>, urls: &[&str]) -> SourceResolver {
        SourceResolver::new(transport, DataSources::new(urls.iter().map(|u| url(u)).collect()))
            .with_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_first_good_source_wins() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("https://a.test/data.json", Scripted::status(404))
                .route("https://b.test/data.json", Scripted::json(GOOD))
                .route("https://c.test/data.json", Scripted::json(GOOD)),
        );
        let resolver = resolver(
            transport.clone(),
            &[
                "https://a.test/data.json",
                "https://b.test/data.json",
                "https://c.test/data.json",
            ],
        );

        let payload = resolver.fetch().await.unwrap();
        assert_eq!(payload.source, "https://b.test/data.json");
        assert_eq!(payload.catalog.len(), 1);
        assert_eq!(
            resolver.current_source().as_deref(),
            Some("https://b.test/data.json")
        );
        // Third candidate never requested
        assert_eq!(transport.called_urls().len(), 2);
    }

    #[tokio::test]
    async fn test_request_headers() {
        let transport =
            Arc::new(ScriptedTransport::new().route("https://a.test/data.json", Scripted::json(GOOD)));
        resolver(transport.clone(), &["https://a.test/data.json"])
            .fetch()
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].headers[ACCEPT], "application/json");
        assert_eq!(calls[0].headers[CACHE_CONTROL], "no-cache");
    }

    #[tokio::test]
    async fn test_rejections_move_to_next_candidate() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("https://a.test/1", Scripted::json("   "))
                .route("https://a.test/2", Scripted::json("{broken"))
                .route("https://a.test/3", Scripted::json(r#"{"not":"array"}"#))
                .route(
                    "https://a.test/4",
                    Scripted::json(r#"[{"Код продукции":"","Полное наименование (русское)":""}]"#),
                ),
        );
        let resolver = resolver(
            transport,
            &[
                "https://a.test/1",
                "https://a.test/2",
                "https://a.test/3",
                "https://a.test/4",
                "https://a.test/5",
            ],
        );

        match resolver.fetch().await {
            Err(ShelfLifeError::NoSourceAvailable { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert!(matches!(*last, ShelfLifeError::Transport { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(resolver.current_source().is_none());
    }

    #[tokio::test]
    async fn test_error_kinds_per_candidate() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("https://a.test/empty", Scripted::json(""))
                .route("https://a.test/bad", Scripted::json("nope")),
        );
        let r = resolver(transport.clone(), &["https://a.test/empty"]);
        let err = r.fetch().await.unwrap_err();
        assert!(matches!(err.root_cause(), ShelfLifeError::EmptyBody { .. }));

        let r = resolver(transport, &["https://a.test/bad"]);
        let err = r.fetch().await.unwrap_err();
        assert!(matches!(err.root_cause(), ShelfLifeError::InvalidJson { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_source_times_out() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("https://slow.test/data.json", Scripted::Hang)
                .route("https://fast.test/data.json", Scripted::json(GOOD)),
        );
        let resolver = resolver(
            transport,
            &["https://slow.test/data.json", "https://fast.test/data.json"],
        );

        let payload = resolver.fetch().await.unwrap();
        assert_eq!(payload.source, "https://fast.test/data.json");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_kind() {
        let transport =
            Arc::new(ScriptedTransport::new().route("https://slow.test/data.json", Scripted::Hang));
        let err = resolver(transport, &["https://slow.test/data.json"])
            .fetch()
            .await
            .unwrap_err();

        assert!(matches!(
            err.root_cause(),
            ShelfLifeError::FetchTimeout { timeout_secs: 10, .. }
        ));
    }

    #[tokio::test]
    async fn test_accepted_payload_reaches_cache() {
        let transport =
            Arc::new(ScriptedTransport::new().route("https://a.test/data.json", Scripted::json(GOOD)));
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "test");
        let resolver = resolver(transport, &["https://a.test/data.json"]).with_cache(cache.clone());

        resolver.fetch().await.unwrap();
        resolver.flush().await;

        let record = cache.load().await.unwrap();
        assert_eq!(record.data.len(), 1);
        assert_eq!(record.source.as_deref(), Some("https://a.test/data.json"));
    }

    #[tokio::test]
    async fn test_cancelled_save_never_lands() {
        let transport =
            Arc::new(ScriptedTransport::new().route("https://a.test/data.json", Scripted::json(GOOD)));
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "test");
        let resolver = resolver(transport, &["https://a.test/data.json"]).with_cache(cache.clone());

        resolver.fetch().await.unwrap();
        resolver.cancel_pending_save().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(cache.load().await, Err(ShelfLifeError::CacheEmpty)));
        // Nothing left to wait for
        resolver.flush().await;
        assert!(matches!(cache.load().await, Err(ShelfLifeError::CacheEmpty)));
    }

    #[tokio::test]
    async fn test_probe_checks_every_candidate() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("https://a.test/data.json", Scripted::json(GOOD))
                .route("https://b.test/data.json", Scripted::status(500)),
        );
        let resolver = resolver(
            transport.clone(),
            &[
                "https://a.test/data.json",
                "https://b.test/data.json",
                "https://c.test/data.json",
            ],
        );

        let results = resolver.probe().await;
        assert_eq!(results.len(), 3);
        assert!(results[0].ok);
        assert_eq!(results[0].record_count, Some(1));
        assert_eq!(results[1].status, Some(500));
        assert!(!results[1].ok);
        assert!(results[2].error.is_some());
        // Probing is not loading
        assert!(resolver.current_source().is_none());
    }
}
