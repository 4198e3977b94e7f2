//! Built-in sample catalog used when neither network nor cache can help.
//!
//! Both the loader and the offline proxy serve this exact payload, so it is
//! kept in the wire schema.

use crate::models::{parse_payload, RawRecord};
use crate::Result;

/// Fallback catalog payload in wire format
pub const FALLBACK_PAYLOAD: &str = r#"[
  {
    "Код продукции": "000001",
    "Полное наименование (русское)": "Тестовый продукт 1 (fallback)",
    "Срок годности": 365,
    "Штук в упаковке": 10,
    "Штрихкод упаковки": "1234567890123",
    "Производитель": "Тестовый производитель",
    "Название стандарта": "ГОСТ 12345-2020"
  },
  {
    "Код продукции": "000002",
    "Полное наименование (русское)": "Тестовый продукт 2 (fallback)",
    "Срок годности": 180,
    "Штук в упаковке": 6,
    "Штрихкод упаковки": "1234567890124",
    "Производитель": "Тестовый производитель",
    "Название стандарта": ""
  },
  {
    "Код продукции": "000003",
    "Полное наименование (русское)": "Тестовый продукт 3 (fallback)",
    "Срок годности": 30,
    "Штук в упаковке": 1,
    "Штрихкод упаковки": "",
    "Производитель": "",
    "Название стандарта": "ТУ 10.51.40-001-2021"
  }
]"#;

/// Fallback records, parsed
pub fn fallback_records() -> Result<Vec<RawRecord>> {
    parse_payload(FALLBACK_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Catalog;

    #[test]
    fn test_fallback_normalizes_completely() {
        let records = fallback_records().unwrap();
        let catalog = Catalog::from_records(&records).unwrap();

        assert_eq!(catalog.len(), records.len());
        assert_eq!(catalog.codes(), vec!["000001", "000002", "000003"]);
    }
}
