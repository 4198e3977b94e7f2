//! Catalog search.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SearchConfig;
use crate::models::{Catalog, Product};
use crate::utils::escape_html;

/// Substring search over product code and name
#[derive(Debug, Clone, Copy)]
pub struct SearchIndex {
    min_query_len: usize,
    max_results: usize,
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl SearchIndex {
    pub fn new(min_query_len: usize, max_results: usize) -> Self {
        Self {
            min_query_len,
            max_results,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.min_query_len, config.max_results)
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// All products whose code or name contains `query`, ignoring case.
    ///
    /// Queries shorter than the minimum length (after trimming) match
    /// nothing. Products whose code starts with the query come first; each
    /// group is ordered by name.
    pub fn search<'a>(&self, catalog: &'a Catalog, query: &str) -> Vec<&'a Product> {
        let query = query.trim();
        if query.chars().count() < self.min_query_len {
            return Vec::new();
        }

        let needle = query.to_lowercase();
        let mut hits: Vec<(bool, String, &Product)> = catalog
            .iter()
            .filter_map(|product| {
                let code = product.code.to_lowercase();
                let name = product.name.to_lowercase();
                (code.contains(&needle) || name.contains(&needle))
                    .then(|| (code.starts_with(&needle), name, product))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.code.cmp(&b.2.code))
        });

        debug!(query, hits = hits.len(), "Search finished");
        hits.into_iter().map(|(_, _, product)| product).collect()
    }

    /// Like [`search`](Self::search), capped at the configured result count
    pub fn search_limited<'a>(&self, catalog: &'a Catalog, query: &str) -> Vec<&'a Product> {
        let mut results = self.search(catalog, query);
        results.truncate(self.max_results);
        results
    }
}

/// HTML-escape `text` and wrap case-insensitive occurrences of `query` in
/// `<mark>` tags.
pub fn highlight(text: &str, query: &str) -> String {
    let query: Vec<char> = query.trim().chars().collect();
    if query.is_empty() {
        return escape_html(text);
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut plain_from = 0;
    let mut i = 0;

    while i + query.len() <= chars.len() {
        let matched = chars[i..i + query.len()]
            .iter()
            .zip(&query)
            .all(|((_, a), b)| a.to_lowercase().eq(b.to_lowercase()));

        if !matched {
            i += 1;
            continue;
        }

        let start = chars[i].0;
        let end = chars
            .get(i + query.len())
            .map_or(text.len(), |(offset, _)| *offset);

        out.push_str(&escape_html(&text[plain_from..start]));
        out.push_str("<mark>");
        out.push_str(&escape_html(&text[start..end]));
        out.push_str("</mark>");

        plain_from = end;
        i += query.len();
    }

    out.push_str(&escape_html(&text[plain_from..]));
    out
}

/// Runs only the last of a burst of calls, once the burst has been quiet
/// for the configured delay
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `task`, cancelling whatever was scheduled before
    pub fn call<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drop the scheduled call, if any
    pub fn cancel(&self) {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = pending {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
