//! Defensive coercion of loosely-typed JSON values.

use serde_json::Value;

/// Coerce a possibly-absent, possibly-non-string value to a trimmed string.
///
/// Absent, `null`, `false`, `0` and `""` count as "no value" and yield an
/// empty string, matching how the catalog has always treated falsy cells.
/// Other scalars are rendered textually, integral floats without a
/// fractional part; arrays and objects as JSON text.
pub fn coerce_text(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };

    let text = match value {
        Value::Null | Value::Bool(false) => return String::new(),
        Value::Bool(true) => "true".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => return String::new(),
            // Integral floats render without the fraction, `1.0` as "1"
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };

    text.trim().to_string()
}

/// Parse the leading integer of a string.
///
/// Leading whitespace and an optional sign are accepted, then as many
/// decimal digits as follow. `"365 дней"` parses as 365, `"12.7"` as 12,
/// `"abc"` and `""` do not parse.
pub fn parse_int_prefix(input: &str) -> Option<i64> {
    let s = input.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(digits.len(), |(i, _)| i);

    if end == 0 {
        return None;
    }

    // Saturate instead of failing on absurdly long digit runs
    let magnitude = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

/// Coerce a value to a non-negative integer.
///
/// Returns `None` when the value is absent or `null`, `Some(Err(()))` when it
/// is present but unusable (unparseable or negative), `Some(Ok(n))` otherwise.
/// Callers decide whether an unusable value deserves a warning.
pub fn coerce_int(value: Option<&Value>) -> Option<std::result::Result<u32, ()>> {
    let parsed = match value? {
        Value::Null => return None,
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => parse_int_prefix(s),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    };

    Some(match parsed {
        Some(n) if n >= 0 => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
        _ => Err(()),
    })
}
