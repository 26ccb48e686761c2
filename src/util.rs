// Utility helpers for number parsing, calendar ordering and display formatting.
//
// The "dirty" string handling lives here so the normalizer and the report
// shapes can assume clean, typed values.
use num_format::{Locale, ToFormattedString};
use std::cmp::Ordering;

/// Russian month abbreviations in calendar order, as stored in the `Месяц`
/// column of the source data.
pub const MONTHS_RU: [&str; 12] = [
    "янв", "фев", "мар", "апр", "май", "июн", "июл", "авг", "сен", "окт", "ноя", "дек",
];

/// Parse a numeric string the way the source exports need it:
///
/// - trims whitespace,
/// - treats `,` as the decimal separator (`"1,5"` → `1.5`),
/// - returns `None` for empty input, garbage or `NaN`.
pub fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace(',', ".");
    match s.parse::<f64>() {
        Ok(v) if !v.is_nan() => Some(v),
        _ => None,
    }
}

pub fn average(v: &[f64]) -> f64 {
    // Arithmetic mean; 0 for an empty slice so empty selections render as 0.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

/// Calendar position (1..=12) of a month token, or `None` if it is not a
/// recognizable month.
///
/// Accepts Russian abbreviations (only the first three letters matter, case
/// is ignored, so `"Январь"` works too) and numeric months such as `"01"`.
pub fn month_index(month: &str) -> Option<u32> {
    let month = month.trim();
    if let Ok(n) = month.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let prefix: String = month.to_lowercase().chars().take(3).collect();
    MONTHS_RU
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

/// Chronological comparison of two month tokens. Unknown months sort after
/// every known one, and among themselves lexically.
pub fn cmp_months(a: &str, b: &str) -> Ordering {
    match (month_index(a), month_index(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// `(year, month)` ordering used by the trend and report shapes.
pub fn cmp_periods(a: (i32, &str), b: (i32, &str)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| cmp_months(a.1, b.1))
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Russian-style display: non-breaking-space thousands groups and a comma
    // before the fraction (`1 234 567,89`). Non-finite input renders as zero.
    if !n.is_finite() {
        return format_number(0.0, decimals);
    }
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::ru);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push(',');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

/// Compact form for KPI cards: `1,2 млн`, `3,4 тыс.`, plain below a thousand.
pub fn format_compact(n: f64) -> String {
    if !n.is_finite() {
        return "0".to_string();
    }
    let trim = |s: String| {
        s.strip_suffix(",0")
            .map(str::to_string)
            .unwrap_or(s)
    };
    if n >= 1_000_000.0 {
        format!("{} млн", trim(format_number(n / 1_000_000.0, 1)))
    } else if n >= 1_000.0 {
        format!("{} тыс.", trim(format_number(n / 1_000.0, 1)))
    } else {
        trim(format_number(n, 1))
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages (e.g. `9 855 rows loaded`).
    n.to_formatted_string(&Locale::ru)
}

/// Round to a fixed number of decimals for exported numeric cells.
pub fn round_to(n: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (n * factor).round() / factor
}
