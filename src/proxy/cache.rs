//! Named response caches.
//!
//! A [`CacheStorage`] holds any number of named caches, each mapping a
//! request path (with query) to a stored response. When backed by a
//! [`KeyValueStore`] every cache is written through as one JSON value with
//! base64 bodies, plus an index of cache names.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::fetch::HttpResponse;
use crate::storage::KeyValueStore;
use crate::Result;

const INDEX_KEY: &str = "proxy-caches";

/// Headers that describe one hop, not the resource
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
];

/// A stored response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_body")]
    pub body: Bytes,
}

impl CachedResponse {
    /// Copy a network response for storage
    pub fn from_http(response: &HttpResponse) -> Self {
        let headers = response
            .headers
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
        }
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

type ResponseCache = BTreeMap<String, CachedResponse>;

/// Registry of named response caches
pub struct CacheStorage {
    caches: RwLock<HashMap<String, ResponseCache>>,
    persist: Option<Arc<dyn KeyValueStore>>,
}

impl CacheStorage {
    /// Caches that live only as long as the process
    pub fn in_memory() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            persist: None,
        }
    }

    /// Caches written through to `store`, starting from what it holds
    pub async fn persistent(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let mut caches = HashMap::new();

        if let Some(index) = store.get(INDEX_KEY).await? {
            let names: Vec<String> = serde_json::from_str(&index)?;
            for name in names {
                match store.get(&name).await? {
                    Some(raw) => match serde_json::from_str::<ResponseCache>(&raw) {
                        Ok(cache) => {
                            caches.insert(name, cache);
                        }
                        Err(e) => warn!(cache = %name, error = %e, "Dropping unreadable cache"),
                    },
                    None => warn!(cache = %name, "Indexed cache is missing"),
                }
            }
        }

        info!(caches = caches.len(), "Response caches restored");
        Ok(Self {
            caches: RwLock::new(caches),
            persist: Some(store),
        })
    }

    /// Create the cache `name` if it does not exist
    pub async fn open(&self, name: &str) -> Result<()> {
        let mut caches = self.caches.write().await;
        if caches.contains_key(name) {
            return Ok(());
        }
        caches.insert(name.to_string(), ResponseCache::new());
        self.write_index(&caches).await?;
        self.write_cache(name, &ResponseCache::new()).await
    }

    /// Names of all caches, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete the cache `name`; returns whether it existed
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let mut caches = self.caches.write().await;
        if caches.remove(name).is_none() {
            return Ok(false);
        }
        self.write_index(&caches).await?;
        if let Some(store) = &self.persist {
            store.remove(name).await?;
        }
        debug!(cache = %name, "Cache deleted");
        Ok(true)
    }

    /// Store `response` under `key` in the cache `name`, creating it if needed
    pub async fn put(&self, name: &str, key: &str, response: CachedResponse) -> Result<()> {
        let mut caches = self.caches.write().await;
        let created = !caches.contains_key(name);
        let cache = caches.entry(name.to_string()).or_default();
        cache.insert(key.to_string(), response);

        let snapshot = cache.clone();
        if created {
            self.write_index(&caches).await?;
        }
        self.write_cache(name, &snapshot).await
    }

    /// Entry `key` in the cache `name`
    pub async fn get(&self, name: &str, key: &str) -> Option<CachedResponse> {
        self.caches.read().await.get(name)?.get(key).cloned()
    }

    /// First entry for `key` across all caches, in name order
    pub async fn match_request(&self, key: &str) -> Option<CachedResponse> {
        let caches = self.caches.read().await;
        let mut names: Vec<&String> = caches.keys().collect();
        names.sort();
        names
            .into_iter()
            .find_map(|name| caches.get(name).and_then(|c| c.get(key)).cloned())
    }

    async fn write_index(&self, caches: &HashMap<String, ResponseCache>) -> Result<()> {
        if let Some(store) = &self.persist {
            let mut names: Vec<&String> = caches.keys().collect();
            names.sort();
            store.set(INDEX_KEY, &serde_json::to_string(&names)?).await?;
        }
        Ok(())
    }

    async fn write_cache(&self, name: &str, cache: &ResponseCache) -> Result<()> {
        if let Some(store) = &self.persist {
            store.set(name, &serde_json::to_string(cache)?).await?;
        }
        Ok(())
    }
}
