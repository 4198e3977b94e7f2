//! Shelf Life Library
//!
//! Product catalog lookup and shelf-life calculation that keeps working when
//! the network does not.
//!
//! # Features
//!
//! - Fetch the product catalog from an ordered list of candidate sources
//! - Validate and normalize loosely-typed catalog records
//! - Persist the last good catalog in a local key-value store
//! - Fall back from network to cache to built-in sample data
//! - Search the catalog and compute expiry dates
//! - Optional offline proxy that caches page assets and catalog responses
//!
//! # Example
//!
//! ```rust,no_run
//! use shelf_life::{config::AppConfig, App};
//!
//! #[tokio::main]
//! async fn main() -> shelf_life::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let app = App::from_config(&config)?;
//!
//!     let status = app.load_products_data().await;
//!     println!("{} products loaded", status.product_count);
//!
//!     for product in app.search("молоко") {
//!         println!("{} {}", product.code, product.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod fallback;
pub mod fetch;
pub mod loader;
pub mod models;
pub mod search;
pub mod storage;
pub mod utils;

#[cfg(feature = "proxy")]
pub mod proxy;

use thiserror::Error;

/// Result type alias for shelf-life operations
pub type Result<T> = std::result::Result<T, ShelfLifeError>;

/// Errors that can occur while loading, caching or querying the catalog
#[derive(Error, Debug)]
pub enum ShelfLifeError {
    /// A single candidate source exceeded its time budget
    #[error("Request timeout after {timeout_secs}s: {url}")]
    FetchTimeout { url: String, timeout_secs: u64 },

    /// A candidate source answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// A candidate source answered with an empty body
    #[error("Empty response body from {url}")]
    EmptyBody { url: String },

    /// The body failed to parse as JSON
    #[error("Invalid JSON from {url}: {message}")]
    InvalidJson { url: String, message: String },

    /// The body parsed but is not a catalog payload
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// The request never produced a response (DNS, connect, TLS, ...)
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Every candidate source was tried and failed
    #[error("All data sources unavailable after {attempts} attempts (last error: {last})")]
    NoSourceAvailable {
        attempts: usize,
        last: Box<ShelfLifeError>,
    },

    /// Nothing stored in the persistent cache slot
    #[error("Cache is empty")]
    CacheEmpty,

    /// The persistent cache slot holds something unreadable
    #[error("Cache is corrupt: {0}")]
    CacheCorrupt(String),

    /// Batch normalization produced no usable products
    #[error("No valid products in data ({invalid} records rejected)")]
    NoValidProducts { invalid: usize },

    /// Best-effort cache write failed
    #[error("Failed to persist cache: {0}")]
    PersistenceWriteFailed(String),

    /// Invalid user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("{resource} not found: {id}")]
    NotFound {
        resource: &'static str,
        id: String,
    },

    /// Validation error with details
    #[error("Validation failed: {field} - {message}")]
    Validation {
        field: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (should not expose details to users)
    #[error("Internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ShelfLifeError {
    /// Create a not found error for a product code
    pub fn product_not_found(code: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Product",
            id: code.into(),
        }
    }

    /// Wrap an error as internal (hides details from users)
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(error))
    }

    /// Check if this is a transient error that could be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchTimeout { .. } | Self::Transport { .. } | Self::Io(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::NoSourceAvailable { last, .. } => last.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error, looking through `NoSourceAvailable`
    pub fn root_cause(&self) -> &ShelfLifeError {
        match self {
            Self::NoSourceAvailable { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Single human-readable message shown when every load branch failed
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::FetchTimeout { .. } => {
                "Таймаут при загрузке данных. Проверьте подключение к интернету."
            }
            Self::Http { .. } => "Ошибка сервера при загрузке данных.",
            Self::InvalidJson { .. } | Self::InvalidFormat(_) | Self::EmptyBody { .. } => {
                "Некорректный формат данных. Проверьте файл data.json."
            }
            Self::NoSourceAvailable { .. } | Self::Transport { .. } => {
                "Все источники данных недоступны. Проверьте подключение."
            }
            _ => "Не удалось загрузить данные о продуктах",
        }
    }
}

// Re-export commonly used types for convenience
pub use app::{App, AppStatus};
pub use loader::{LoadOutcome, LoadState, ProductService};
pub use models::{CalculationResult, Catalog, Product, RawRecord};
pub use storage::{CacheRecord, CacheStore, FileStore, KeyValueStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration filename
pub const DEFAULT_CONFIG_FILE: &str = "shelflife.toml";

/// Key of the single persistent cache slot
pub const PRODUCTS_CACHE_KEY: &str = "products_cache";
