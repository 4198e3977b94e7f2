//! Text and date helpers.

use chrono::{Duration, NaiveDate};

use crate::{Result, ShelfLifeError};

/// Escape HTML entities to prevent XSS
pub fn escape_html(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '&' => output.push_str("&amp;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#x27;"),
            _ => output.push(c),
        }
    }

    output
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Format a date as `DD.MM.YYYY`
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// Parse a user-supplied date.
///
/// Accepts `YYYY-MM-DD`, `DD.MM.YYYY`, and the relative words `today`,
/// `yesterday` and `tomorrow` (resolved against `today`).
pub fn parse_date(s: &str, today: NaiveDate) -> Result<NaiveDate> {
    match s.trim().to_lowercase().as_str() {
        "today" => return Ok(today),
        "yesterday" => return Ok(today - Duration::days(1)),
        "tomorrow" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s.trim(), "%d.%m.%Y"))
        .map_err(|_| {
            ShelfLifeError::InvalidInput(format!(
                "Invalid date: {}. Use YYYY-MM-DD, DD.MM.YYYY or 'today'.",
                s
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<script>"), "&lt;script&gt;");
        assert_eq!(escape_html("a & b"), "a &amp; b");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("молоко пастеризованное", 9), "молоко...");
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(ymd(2024, 1, 6)), "06.01.2024");
    }

    #[test]
    fn test_parse_date_forms() {
        let today = ymd(2024, 3, 1);
        assert_eq!(parse_date("2024-01-01", today).unwrap(), ymd(2024, 1, 1));
        assert_eq!(parse_date("06.01.2024", today).unwrap(), ymd(2024, 1, 6));
        assert_eq!(parse_date("today", today).unwrap(), today);
        assert_eq!(parse_date("yesterday", today).unwrap(), ymd(2024, 2, 29));
        assert_eq!(parse_date("tomorrow", today).unwrap(), ymd(2024, 3, 2));
        assert!(parse_date("01/02/2024", today).is_err());
    }
}
