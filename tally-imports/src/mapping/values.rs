//! Locale-aware value parsing for amounts and dates
//!
//! Shared by validation, dedupe hashing and promotion so that every stage
//! reads "1.234,56" and "15 de marzo de 2024" the same way.

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use super::normalize::fold_tokens;

/// Excel serial day numbers accepted as dates (≈1954 to ≈2119)
const EXCEL_SERIAL_RANGE: std::ops::RangeInclusive<i64> = 20_000..=80_000;

const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2200;

static PLAIN_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("static regex"));

static ISO_DATETIME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})[T ]").expect("static regex"));

/// Numeric-only date layouts, tried in order (day-first before month-first)
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%m/%d/%Y", "%d/%m/%y",
    "%d-%m-%y",
];

/// Month names and abbreviations (folded) in English, Spanish, Portuguese, French
const MONTHS: &[(&str, u32)] = &[
    ("january", 1), ("jan", 1), ("enero", 1), ("ene", 1), ("janeiro", 1), ("janvier", 1), ("janv", 1),
    ("february", 2), ("feb", 2), ("febrero", 2), ("fevereiro", 2), ("fev", 2), ("fevrier", 2), ("fevr", 2),
    ("march", 3), ("mar", 3), ("marzo", 3), ("marco", 3), ("mars", 3),
    ("april", 4), ("apr", 4), ("abril", 4), ("abr", 4), ("avril", 4), ("avr", 4),
    ("may", 5), ("mayo", 5), ("maio", 5), ("mai", 5),
    ("june", 6), ("jun", 6), ("junio", 6), ("junho", 6), ("juin", 6),
    ("july", 7), ("jul", 7), ("julio", 7), ("julho", 7), ("juillet", 7), ("juil", 7),
    ("august", 8), ("aug", 8), ("agosto", 8), ("ago", 8), ("aout", 8),
    ("september", 9), ("sep", 9), ("sept", 9), ("septiembre", 9), ("setiembre", 9), ("set", 9),
    ("setembro", 9), ("septembre", 9),
    ("october", 10), ("oct", 10), ("octubre", 10), ("outubro", 10), ("out", 10), ("octobre", 10),
    ("november", 11), ("nov", 11), ("noviembre", 11), ("novembro", 11), ("novembre", 11),
    ("december", 12), ("dec", 12), ("diciembre", 12), ("dic", 12), ("dezembro", 12), ("dez", 12),
    ("decembre", 12),
];

/// Parse a monetary/quantity value.
///
/// Accepts JSON numbers and strings with currency symbols, spaces,
/// parenthesized or trailing-minus negatives, and either `1.234,56` or
/// `1,234.56` grouping. Returns `None` for anything that is not a number.
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            Decimal::from_str(&n.to_string()).ok().or_else(|| n.as_f64().and_then(Decimal::from_f64_retain))
        }
        Value::String(s) => parse_amount_str(s),
        _ => None,
    }
}

/// String form of [`parse_amount`]
pub fn parse_amount_str(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut negative = false;
    let mut body = trimmed.to_string();
    if body.starts_with('(') && body.ends_with(')') {
        negative = true;
        body = body[1..body.len() - 1].to_string();
    }
    if body.ends_with('-') {
        negative = true;
        body.pop();
    }

    // Keep digits, separators and a leading sign; drop currency symbols/codes
    let mut cleaned = String::with_capacity(body.len());
    for ch in body.chars() {
        if ch.is_ascii_digit() || ch == '.' || ch == ',' {
            cleaned.push(ch);
        } else if ch == '-' && cleaned.is_empty() {
            negative = !negative;
        } else if ch.is_alphabetic() || ch.is_whitespace() || "$€£¥₡₲₵₹'\u{a0}".contains(ch) {
            continue;
        } else if ch == '+' && cleaned.is_empty() {
            continue;
        } else {
            return None;
        }
    }
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    // Letters mixed between digits ("12abc34") are not amounts
    if body.chars().filter(|c| c.is_ascii_digit()).count() != cleaned.chars().filter(|c| c.is_ascii_digit()).count() {
        return None;
    }
    let letters_inside = {
        let first = body.find(|c: char| c.is_ascii_digit());
        let last = body.rfind(|c: char| c.is_ascii_digit());
        match (first, last) {
            (Some(a), Some(b)) => body[a..=b].chars().any(|c| c.is_alphabetic()),
            _ => false,
        }
    };
    if letters_inside {
        return None;
    }

    let normalized = normalize_separators(&cleaned)?;
    if !PLAIN_DECIMAL.is_match(&normalized) {
        return None;
    }
    let amount = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -amount } else { amount })
}

/// Decide which of `.`/`,` is the decimal separator and strip grouping
fn normalize_separators(s: &str) -> Option<String> {
    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    let out = match (dots, commas) {
        (0, 0) => s.to_string(),
        (_, 0) if dots > 1 => s.replace('.', ""),
        (1, 0) => s.to_string(),
        (0, _) if commas > 1 => s.replace(',', ""),
        (0, 1) => {
            let decimals = s.len() - s.find(',')? - 1;
            if decimals == 3 && !s.starts_with("0,") {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        _ => {
            let last_dot = s.rfind('.')?;
            let last_comma = s.rfind(',')?;
            if last_comma > last_dot {
                // 1.234,56
                if commas > 1 {
                    return None;
                }
                s.replace('.', "").replace(',', ".")
            } else {
                // 1,234.56
                if dots > 1 {
                    return None;
                }
                s.replace(',', "")
            }
        }
    };
    Some(out)
}

/// Parse a date value in any accepted locale form
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(excel_serial_to_date),
        _ => None,
    }
}

/// String form of [`parse_date`]
pub fn parse_date_str(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = ISO_DATETIME_PREFIX.captures(trimmed) {
        return NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok();
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            // %Y happily reads "24" as year 24; let the %y layouts handle it
            if PLAUSIBLE_YEARS.contains(&date.year()) {
                return Some(date);
            }
        }
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse::<i64>().ok().and_then(excel_serial_to_date);
    }

    parse_month_name_date(trimmed)
}

/// "15 de marzo de 2024", "March 15, 2024", "15-mar-2024", "15 Mar 2024"
fn parse_month_name_date(text: &str) -> Option<NaiveDate> {
    let tokens = fold_tokens(text);
    let mut day = None;
    let mut month = None;
    let mut year = None;

    for token in &tokens {
        if let Ok(n) = token.parse::<i32>() {
            if token.len() == 4 && year.is_none() {
                year = Some(n);
            } else if (1..=31).contains(&n) && day.is_none() {
                day = Some(n as u32);
            } else if token.len() == 2 && year.is_none() && day.is_some() {
                year = Some(2000 + n);
            }
            continue;
        }
        // Ordinal suffixes: 15th, 1st, 1er
        let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() && day.is_none() {
            if let Ok(n) = digits.parse::<u32>() {
                if (1..=31).contains(&n) {
                    day = Some(n);
                    continue;
                }
            }
        }
        if month.is_none() {
            if let Some((_, m)) = MONTHS.iter().find(|(name, _)| name == token) {
                month = Some(*m);
            }
        }
    }

    NaiveDate::from_ymd_opt(year?, month?, day?)
}

fn excel_serial_to_date(serial: i64) -> Option<NaiveDate> {
    if !EXCEL_SERIAL_RANGE.contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial))
}

/// True when the value reads as a date
pub fn is_date_like(value: &Value) -> bool {
    parse_date(value).is_some()
}

/// Normalize an amount to a fixed 2-decimal string (hashing, storage)
pub fn amount_key(value: &Value) -> Option<String> {
    parse_amount(value).map(|d| {
        let mut fixed = d.round_dp(2);
        fixed.rescale(2);
        fixed.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_amount_grouping_styles() {
        assert_eq!(parse_amount_str("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount_str("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount_str("12,50"), Some(dec("12.50")));
        assert_eq!(parse_amount_str("1,234"), Some(dec("1234")));
        assert_eq!(parse_amount_str("1.234.567"), Some(dec("1234567")));
        assert_eq!(parse_amount_str("0,125"), Some(dec("0.125")));
    }

    #[test]
    fn test_amount_symbols_and_signs() {
        assert_eq!(parse_amount_str("$ 1,200.00"), Some(dec("1200.00")));
        assert_eq!(parse_amount_str("(45.10)"), Some(dec("-45.10")));
        assert_eq!(parse_amount_str("45.10-"), Some(dec("-45.10")));
        assert_eq!(parse_amount_str("-3"), Some(dec("-3")));
        assert_eq!(parse_amount_str("USD 10"), Some(dec("10")));
    }

    #[test]
    fn test_amount_rejects_garbage() {
        assert_eq!(parse_amount_str("abc"), None);
        assert_eq!(parse_amount_str("12abc34"), None);
        assert_eq!(parse_amount_str(""), None);
        assert_eq!(parse_amount_str("1/2/2024"), None);
    }

    #[test]
    fn test_amount_from_json_number() {
        assert_eq!(parse_amount(&json!(112.01)), Some(dec("112.01")));
        assert_eq!(parse_amount(&json!(5)), Some(dec("5")));
        assert_eq!(parse_amount(&json!(true)), None);
    }

    #[test]
    fn test_dates_numeric_forms() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date_str("2024-03-15"), Some(d));
        assert_eq!(parse_date_str("15/03/2024"), Some(d));
        assert_eq!(parse_date_str("15-03-2024"), Some(d));
        assert_eq!(parse_date_str("15.03.2024"), Some(d));
        assert_eq!(parse_date_str("03/15/2024"), Some(d));
        assert_eq!(parse_date_str("2024-03-15T10:30:00Z"), Some(d));
        assert_eq!(parse_date_str("15/03/24"), Some(d));
    }

    #[test]
    fn test_dates_month_names() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date_str("15 de marzo de 2024"), Some(d));
        assert_eq!(parse_date_str("March 15, 2024"), Some(d));
        assert_eq!(parse_date_str("15-mar-2024"), Some(d));
        assert_eq!(parse_date_str("15 mars 2024"), Some(d));
        assert_eq!(parse_date_str("March 15th, 2024"), Some(d));
    }

    #[test]
    fn test_dates_excel_serial() {
        assert_eq!(
            parse_date(&json!(45366)),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(parse_date(&json!(12)), None);
    }

    #[test]
    fn test_dates_reject_garbage() {
        assert_eq!(parse_date_str("not a date"), None);
        assert_eq!(parse_date_str("31/02/2024"), None);
        assert_eq!(parse_date_str("marzo"), None);
    }
}
