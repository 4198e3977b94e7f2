//! Product entity, raw wire records and the record normalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::utils::{coerce_int, coerce_text};

/// Catalog fields as they appear on the wire.
///
/// This is the one place that knows the external field names; everything
/// else goes through [`Field::wire_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Code,
    Name,
    ShelfLife,
    QuantityPerPack,
    Barcode,
    Manufacturer,
    Standard,
}

impl Field {
    /// All known fields in wire order
    pub const ALL: [Field; 7] = [
        Field::Code,
        Field::Name,
        Field::ShelfLife,
        Field::QuantityPerPack,
        Field::Barcode,
        Field::Manufacturer,
        Field::Standard,
    ];

    /// Fields every catalog payload is expected to carry
    pub const EXPECTED: [Field; 3] = [Field::Code, Field::Name, Field::ShelfLife];

    /// External (wire) name of the field
    pub const fn wire_name(self) -> &'static str {
        match self {
            Field::Code => "Код продукции",
            Field::Name => "Полное наименование (русское)",
            Field::ShelfLife => "Срок годности",
            Field::QuantityPerPack => "Штук в упаковке",
            Field::Barcode => "Штрихкод упаковки",
            Field::Manufacturer => "Производитель",
            Field::Standard => "Название стандарта",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One catalog record exactly as received.
///
/// Unknown fields are kept so a record can be written back to the cache
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a known field (builder style)
    pub fn with(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.0.insert(field.wire_name().to_string(), value.into());
        self
    }

    /// Raw value of a known field
    pub fn get(&self, field: Field) -> Option<&Value> {
        self.0.get(field.wire_name())
    }

    /// Whether the field key is present at all (even if null)
    pub fn has(&self, field: Field) -> bool {
        self.0.contains_key(field.wire_name())
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A normalized catalog product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Unique business key
    pub code: String,
    /// Display name
    pub name: String,
    /// Shelf life in days
    pub shelf_life_days: u32,
    /// Pieces per pack
    pub quantity_per_pack: u32,
    /// Pack barcode (may be empty)
    pub barcode: String,
    /// Manufacturer (may be empty)
    pub manufacturer: String,
    /// Name of the governing standard (may be empty)
    pub standard: String,
    /// When this product was normalized
    pub last_updated: DateTime<Utc>,
}

impl Product {
    /// A product is usable iff both code and name are non-empty
    pub fn is_valid(&self) -> bool {
        !self.code.is_empty() && !self.name.is_empty()
    }

    /// Standard name, when the product carries one
    pub fn standard_notice(&self) -> Option<&str> {
        (!self.standard.is_empty()).then_some(self.standard.as_str())
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({} дн.)",
            self.code, self.name, self.shelf_life_days
        )
    }
}

/// Map one raw record to a [`Product`].
///
/// Never fails: optional fields default to empty/zero. The caller checks
/// [`Product::is_valid`] and drops records without code or name.
pub fn normalize_product(raw: &RawRecord, now: DateTime<Utc>) -> Product {
    let code = coerce_text(raw.get(Field::Code));
    let name = coerce_text(raw.get(Field::Name));

    let shelf_life_days = match coerce_int(raw.get(Field::ShelfLife)) {
        Some(Ok(days)) => days,
        Some(Err(())) => {
            warn!(
                code = %code,
                value = ?raw.get(Field::ShelfLife),
                "Invalid shelf life, using 0"
            );
            0
        }
        None => 0,
    };

    let quantity_per_pack = coerce_int(raw.get(Field::QuantityPerPack))
        .and_then(|r| r.ok())
        .unwrap_or(0);

    Product {
        code,
        name,
        shelf_life_days,
        quantity_per_pack,
        barcode: coerce_text(raw.get(Field::Barcode)),
        manufacturer: coerce_text(raw.get(Field::Manufacturer)),
        standard: coerce_text(raw.get(Field::Standard)),
        last_updated: now,
    }
}
