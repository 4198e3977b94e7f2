//! The in-memory catalog and batch normalization.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::product::{normalize_product, Field, Product, RawRecord};
use crate::{Result, ShelfLifeError};

/// Outcome counters of one batch normalization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records that became products
    pub valid: usize,
    /// Records dropped for missing code or name
    pub invalid: usize,
    /// Valid records that replaced an earlier record with the same code
    pub duplicates: usize,
}

/// Normalized products keyed by code
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: HashMap<String, Product>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from raw records in one go
    pub fn from_records(records: &[RawRecord]) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.process_products_data(records, Utc::now())?;
        Ok(catalog)
    }

    /// Clear the catalog and rebuild it from `records`.
    ///
    /// Each record is normalized independently; records without code or name
    /// are skipped. Fails only when not a single valid product resulted, in
    /// which case the catalog is left empty.
    pub fn process_products_data(
        &mut self,
        records: &[RawRecord],
        now: DateTime<Utc>,
    ) -> Result<BatchReport> {
        self.products.clear();
        let mut report = BatchReport::default();

        for (index, raw) in records.iter().enumerate() {
            let product = normalize_product(raw, now);

            if !product.is_valid() {
                warn!(index, "Skipping product: missing code or name");
                report.invalid += 1;
                continue;
            }

            if self.products.contains_key(&product.code) {
                warn!(code = %product.code, "Duplicate product code, keeping the later record");
                report.duplicates += 1;
            }

            self.products.insert(product.code.clone(), product);
            report.valid += 1;
        }

        info!(
            valid = report.valid,
            invalid = report.invalid,
            "Processed products data"
        );

        if report.valid == 0 {
            return Err(ShelfLifeError::NoValidProducts {
                invalid: report.invalid,
            });
        }

        Ok(report)
    }

    /// Look up a product by code
    pub fn get(&self, code: &str) -> Option<&Product> {
        self.products.get(code)
    }

    /// Number of products
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Iterate over products in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    /// Product codes, sorted
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.products.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Remove every product
    pub fn clear(&mut self) {
        self.products.clear();
    }
}

/// Parse a catalog payload body into raw records.
///
/// The body must be a JSON array of objects. Missing expected fields on the
/// first record and an empty array are only warned about.
pub fn parse_payload(body: &str) -> Result<Vec<RawRecord>> {
    let value: Value = serde_json::from_str(body)?;
    records_from_value(value)
}

/// Convert an already-parsed JSON value into raw records
pub fn records_from_value(value: Value) -> Result<Vec<RawRecord>> {
    let Value::Array(items) = value else {
        return Err(ShelfLifeError::InvalidFormat(
            "expected an array of products".into(),
        ));
    };

    if items.is_empty() {
        warn!("Received an empty product array");
    }

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(map) => records.push(RawRecord::from(map)),
            // Non-object entries are kept as empty records so batch
            // processing counts them as invalid rather than aborting
            other => {
                debug!(index, kind = ?other, "Non-object product entry");
                records.push(RawRecord::new());
            }
        }
    }

    if let Some(sample) = records.first() {
        for field in Field::EXPECTED {
            if !sample.has(field) {
                warn!(field = %field, "Missing field in product data");
            }
        }
    }

    Ok(records)
}
