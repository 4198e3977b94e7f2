//! Expiry date calculation.

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::product::Product;
use crate::utils::format_date;
use crate::{Result, ShelfLifeError};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Result of one expiry calculation (never persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub production_date: NaiveDate,
    pub shelf_life_days: u32,
    pub expiry_date: NaiveDate,
    /// Whole days left until the start of the expiry date, rounded up.
    /// Negative once the product has expired.
    pub days_remaining: i64,
}

impl CalculationResult {
    /// Compute the expiry date and the days remaining relative to `now`.
    ///
    /// The expiry date is plain calendar arithmetic; `days_remaining` is the
    /// ceiling of the distance from `now` to midnight of the expiry date.
    pub fn compute(
        production_date: NaiveDate,
        shelf_life_days: u32,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let expiry_date = production_date
            .checked_add_days(Days::new(u64::from(shelf_life_days)))
            .ok_or_else(|| ShelfLifeError::Validation {
                field: "shelf_life_days".into(),
                message: format!("{} days is out of the calendar range", shelf_life_days),
            })?;

        let expiry_start = expiry_date.and_time(chrono::NaiveTime::MIN);
        let diff_ms = (expiry_start - now).num_milliseconds();
        let days_remaining = diff_ms.div_euclid(MILLIS_PER_DAY)
            + i64::from(diff_ms.rem_euclid(MILLIS_PER_DAY) != 0);

        Ok(Self {
            production_date,
            shelf_life_days,
            expiry_date,
            days_remaining,
        })
    }

    /// Compute for a product, validating the inputs first
    pub fn for_product(
        product: &Product,
        production_date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Self> {
        validate_calculation(product, production_date, now.date())?;
        Self::compute(production_date, product.shelf_life_days, now)
    }

    /// Whether the expiry date has been reached
    pub fn is_expired(&self) -> bool {
        self.days_remaining <= 0
    }
}

impl std::fmt::Display for CalculationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Годен до: {} | Осталось: {} дней | Произведено: {}",
            format_date(self.expiry_date),
            self.days_remaining,
            format_date(self.production_date)
        )
    }
}

/// Reject calculations the form would not allow: a production date in the
/// future, or a product without a shelf life.
pub fn validate_calculation(
    product: &Product,
    production_date: NaiveDate,
    today: NaiveDate,
) -> Result<()> {
    if production_date > today {
        return Err(ShelfLifeError::Validation {
            field: "production_date".into(),
            message: "Production date cannot be in the future".into(),
        });
    }

    if product.shelf_life_days == 0 {
        return Err(ShelfLifeError::Validation {
            field: "shelf_life_days".into(),
            message: format!("Product {} has no shelf life", product.code),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::{normalize_product, Field, RawRecord};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(date: NaiveDate, h: u32) -> NaiveDateTime {
        date.and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_expiry_is_calendar_addition() {
        let result = CalculationResult::compute(ymd(2024, 1, 1), 5, at(ymd(2024, 1, 1), 12)).unwrap();
        assert_eq!(result.expiry_date, ymd(2024, 1, 6));

        let leap = CalculationResult::compute(ymd(2024, 2, 28), 1, at(ymd(2024, 2, 28), 0)).unwrap();
        assert_eq!(leap.expiry_date, ymd(2024, 2, 29));
    }

    #[test]
    fn test_days_remaining_rounds_up() {
        let result = CalculationResult::compute(ymd(2024, 1, 1), 5, at(ymd(2024, 1, 4), 23)).unwrap();
        assert_eq!(result.days_remaining, 2);

        let exact = CalculationResult::compute(ymd(2024, 1, 1), 5, at(ymd(2024, 1, 4), 0)).unwrap();
        assert_eq!(exact.days_remaining, 2);
    }

    #[test]
    fn test_days_remaining_after_expiry() {
        let result = CalculationResult::compute(ymd(2024, 1, 1), 5, at(ymd(2024, 1, 7), 12)).unwrap();
        assert_eq!(result.days_remaining, -1);
        assert!(result.is_expired());
    }

    #[test]
    fn test_validation_rules() {
        let product = normalize_product(
            &RawRecord::new()
                .with(Field::Code, "1")
                .with(Field::Name, "Творог")
                .with(Field::ShelfLife, 0),
            chrono::Utc::now(),
        );

        let today = ymd(2024, 1, 10);
        assert!(validate_calculation(&product, ymd(2024, 1, 1), today).is_err());

        let product = Product {
            shelf_life_days: 7,
            ..product
        };
        assert!(validate_calculation(&product, ymd(2024, 1, 1), today).is_ok());
        assert!(validate_calculation(&product, ymd(2024, 1, 11), today).is_err());
    }

    #[test]
    fn test_display_format() {
        let result = CalculationResult::compute(ymd(2024, 1, 1), 5, at(ymd(2024, 1, 4), 23)).unwrap();
        assert_eq!(
            result.to_string(),
            "Годен до: 06.01.2024 | Осталось: 2 дней | Произведено: 01.01.2024"
        );
    }
}
