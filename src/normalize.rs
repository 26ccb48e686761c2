// Record normalization.
//
// Turns one untyped key/value record (keys are canonical field names) into a
// fully typed `Record`. This is a total function: a field that cannot be
// coerced gets its documented default, the record itself is never dropped.
use crate::types::Record;
use crate::util::parse_decimal;
use serde_json::{Map, Value};

pub const DEFAULT_ADDRESS: &str = "Адрес не указан";
pub const DEFAULT_CITY: &str = "Неизвестный город";
pub const DEFAULT_VENDOR: &str = "Неизвестный продавец";
pub const DEFAULT_FORMAT: &str = "Unknown";
pub const DEFAULT_LAT: f64 = 55.75;
pub const DEFAULT_LNG: f64 = 37.61;

/// Counts of fields that fell back to a default, summed over a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackCounts {
    pub ids: usize,
    pub text: usize,
    pub numbers: usize,
    pub coords: usize,
}

impl FallbackCounts {
    pub fn total(&self) -> usize {
        self.ids + self.text + self.numbers + self.coords
    }

    pub fn merge(&mut self, other: &FallbackCounts) {
        self.ids += other.ids;
        self.text += other.text;
        self.numbers += other.numbers;
        self.coords += other.coords;
    }
}

/// Scalar to string. Null, missing and structured values yield `None`.
fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn coerce_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_decimal(s).filter(|v| v.is_finite()),
        _ => None,
    }
}

fn text_or(raw: &Map<String, Value>, key: &str, default: &str, counts: &mut FallbackCounts) -> String {
    match coerce_text(raw.get(key)) {
        Some(s) if !s.is_empty() => s,
        _ => {
            counts.text += 1;
            default.to_string()
        }
    }
}

pub fn normalize(raw: &Map<String, Value>, fallback_id: &str) -> Record {
    normalize_counted(raw, fallback_id, &mut FallbackCounts::default())
}

/// Like [`normalize`], recording every defaulted field in `counts`.
pub fn normalize_counted(
    raw: &Map<String, Value>,
    fallback_id: &str,
    counts: &mut FallbackCounts,
) -> Record {
    let id = match coerce_text(raw.get("id")) {
        Some(s) if !s.is_empty() => s,
        _ => {
            counts.ids += 1;
            fallback_id.to_string()
        }
    };

    // Year is the floor of the numeric value; garbage becomes 0.
    let year = match coerce_number(raw.get("year")) {
        Some(v) => v.floor().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
        None => {
            counts.numbers += 1;
            0
        }
    };

    let mut number = |key: &str| {
        coerce_number(raw.get(key)).unwrap_or_else(|| {
            counts.numbers += 1;
            0.0
        })
    };
    let grp = number("grp");
    let ots = number("ots");

    let mut coord = |key: &str, default: f64| {
        coerce_number(raw.get(key)).unwrap_or_else(|| {
            counts.coords += 1;
            default
        })
    };
    let lat = coord("lat", DEFAULT_LAT);
    let lng = coord("lng", DEFAULT_LNG);

    Record {
        id,
        address: text_or(raw, "address", DEFAULT_ADDRESS, counts),
        city: text_or(raw, "city", DEFAULT_CITY, counts),
        vendor: text_or(raw, "vendor", DEFAULT_VENDOR, counts),
        format: text_or(raw, "format", DEFAULT_FORMAT, counts),
        year,
        // An absent month is an empty string, not a placeholder.
        month: coerce_text(raw.get("month")).unwrap_or_default(),
        grp,
        ots,
        lat,
        lng,
    }
}
