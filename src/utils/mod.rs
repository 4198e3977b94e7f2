//! Utility functions shared by the normalizer, search and proxy.

mod coerce;
mod text;

pub use coerce::{coerce_int, coerce_text, parse_int_prefix};
pub use text::{escape_html, format_date, parse_date, truncate};
