//! Storage layer for persisting the last good catalog.
//!
//! This module provides the `KeyValueStore` trait (the local storage seam)
//! with file and in-memory backends, and the single-slot [`CacheStore`]
//! built on top of it.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::models::RawRecord;
use crate::{Result, ShelfLifeError, PRODUCTS_CACHE_KEY};

/// Durable string key-value storage.
///
/// Writes replace the whole value for a key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// The persisted catalog slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Raw records exactly as fetched
    pub data: Vec<RawRecord>,
    /// When the records were fetched
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Application version that wrote the slot
    pub version: String,
    /// URL the records came from
    pub source: Option<String>,
}

impl CacheRecord {
    /// Whether the record is older than `ttl` at `now`
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp > ttl
    }

    /// Age of the record at `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

/// Diagnostic summary of the cache slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CacheInfo {
    Present {
        timestamp: DateTime<Utc>,
        source: Option<String>,
        record_count: usize,
        size_bytes: usize,
    },
    Unreadable {
        error: String,
    },
}

/// Single-slot persistence of the last successfully fetched catalog
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    version: String,
}

impl CacheStore {
    /// Create a cache store over a key-value backend
    pub fn new(store: Arc<dyn KeyValueStore>, version: impl Into<String>) -> Self {
        Self {
            store,
            version: version.into(),
        }
    }

    /// Persist `records` with provenance; failures are logged, never returned.
    pub async fn save(&self, records: &[RawRecord], source: Option<&str>) {
        if let Err(e) = self.try_save(records, source).await {
            error!("Failed to save products to cache: {}", e);
        }
    }

    /// Persist `records`, reporting failure as `PersistenceWriteFailed`
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn try_save(&self, records: &[RawRecord], source: Option<&str>) -> Result<()> {
        let record = CacheRecord {
            data: records.to_vec(),
            timestamp: Utc::now(),
            version: self.version.clone(),
            source: source.map(str::to_string),
        };

        let encoded = serde_json::to_string(&record)
            .map_err(|e| ShelfLifeError::PersistenceWriteFailed(e.to_string()))?;

        self.store
            .set(PRODUCTS_CACHE_KEY, &encoded)
            .await
            .map_err(|e| ShelfLifeError::PersistenceWriteFailed(e.to_string()))?;

        debug!(bytes = encoded.len(), "Products saved to cache");
        Ok(())
    }

    /// Read the slot. Staleness is the caller's decision.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<CacheRecord> {
        let raw = self
            .store
            .get(PRODUCTS_CACHE_KEY)
            .await?
            .ok_or(ShelfLifeError::CacheEmpty)?;

        let record: CacheRecord = serde_json::from_str(&raw)
            .map_err(|e| ShelfLifeError::CacheCorrupt(e.to_string()))?;

        if record.version != self.version {
            warn!(
                cached = %record.version,
                current = %self.version,
                "Cache written by a different version"
            );
        }

        info!(
            timestamp = %record.timestamp,
            source = ?record.source,
            records = record.data.len(),
            "Loaded products cache"
        );
        Ok(record)
    }

    /// Remove the slot
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(PRODUCTS_CACHE_KEY).await?;
        info!("Products cache cleared");
        Ok(())
    }

    /// Diagnostic view of the slot, `None` when empty
    pub async fn info(&self) -> Option<CacheInfo> {
        let raw = match self.store.get(PRODUCTS_CACHE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                return Some(CacheInfo::Unreadable {
                    error: e.to_string(),
                })
            }
        };

        Some(match serde_json::from_str::<CacheRecord>(&raw) {
            Ok(record) => CacheInfo::Present {
                timestamp: record.timestamp,
                source: record.source,
                record_count: record.data.len(),
                size_bytes: raw.len(),
            },
            Err(e) => CacheInfo::Unreadable {
                error: e.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Catalog, Field};

    /// Backend whose writes always fail, like a full or disabled storage
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(ShelfLifeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "quota exceeded",
            )))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn sample() -> Vec<RawRecord> {
        vec![
            RawRecord::new()
                .with(Field::Code, "1")
                .with(Field::Name, "Ряженка")
                .with(Field::ShelfLife, "7"),
            RawRecord::new()
                .with(Field::Code, "2")
                .with(Field::Name, "Варенец")
                .with(Field::ShelfLife, 5),
        ]
    }

    #[tokio::test]
    async fn test_save_then_load_normalizes_identically() {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "1.0.0");
        let records = sample();

        cache.save(&records, Some("https://example.com/data.json")).await;
        let loaded = cache.load().await.unwrap();

        assert_eq!(loaded.source.as_deref(), Some("https://example.com/data.json"));
        assert_eq!(loaded.version, "1.0.0");

        let direct = Catalog::from_records(&records).unwrap();
        let cached = Catalog::from_records(&loaded.data).unwrap();
        assert_eq!(direct.codes(), cached.codes());
        for code in direct.codes() {
            let (a, b) = (direct.get(code).unwrap(), cached.get(code).unwrap());
            assert_eq!(a.name, b.name);
            assert_eq!(a.shelf_life_days, b.shelf_life_days);
        }
    }

    #[tokio::test]
    async fn test_load_empty_and_corrupt() {
        let backend = Arc::new(MemoryStore::new());
        let cache = CacheStore::new(backend.clone(), "1.0.0");

        assert!(matches!(cache.load().await, Err(ShelfLifeError::CacheEmpty)));

        backend.set(PRODUCTS_CACHE_KEY, "{not json").await.unwrap();
        assert!(matches!(cache.load().await, Err(ShelfLifeError::CacheCorrupt(_))));
        assert!(matches!(cache.info().await, Some(CacheInfo::Unreadable { .. })));
    }

    #[tokio::test]
    async fn test_save_failure_is_swallowed() {
        let cache = CacheStore::new(Arc::new(ReadOnlyStore), "1.0.0");

        // Must not panic or propagate
        cache.save(&sample(), None).await;

        assert!(matches!(
            cache.try_save(&sample(), None).await,
            Err(ShelfLifeError::PersistenceWriteFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_and_info() {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "1.0.0");
        cache.save(&sample(), None).await;

        match cache.info().await {
            Some(CacheInfo::Present { record_count, size_bytes, .. }) => {
                assert_eq!(record_count, 2);
                assert!(size_bytes > 0);
            }
            other => panic!("unexpected cache info: {:?}", other),
        }

        cache.clear().await.unwrap();
        assert!(cache.info().await.is_none());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let record = CacheRecord {
            data: vec![],
            timestamp: now - Duration::hours(25),
            version: "1".into(),
            source: None,
        };

        assert!(record.is_stale(Duration::hours(24), now));
        assert!(!record.is_stale(Duration::hours(48), now));
    }

    #[test]
    fn test_timestamp_serialized_as_millis() {
        let record = CacheRecord {
            data: vec![],
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            version: "1".into(),
            source: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_123i64);
    }
}
