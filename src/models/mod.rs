//! Data models for the shelf-life catalog.
//!
//! This module contains the wire-level [`RawRecord`], the normalized
//! [`Product`], the in-memory [`Catalog`] and the expiry calculation.

mod catalog;
mod expiry;
mod product;

pub use catalog::{parse_payload, records_from_value, BatchReport, Catalog};
pub use expiry::{validate_calculation, CalculationResult};
pub use product::{normalize_product, Field, Product, RawRecord};
