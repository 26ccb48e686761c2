// Filter model: five independent multi-valued selection dimensions.
//
// A `FilterSelection` is a plain value. The session mutates its own copy and
// every mutation is a new snapshot for the sequencer, so equality and hashing
// are derived and cover token order too.
use crate::error::QueryError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// Any canonical integer the view can hold: `0` for unknown years, no
// leading zeros, no fraction.
static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0|-?[1-9]\d{0,9})$").unwrap());

const MAX_TOKEN_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    City,
    Year,
    Month,
    Format,
    Vendor,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::City,
        Dimension::Year,
        Dimension::Month,
        Dimension::Format,
        Dimension::Vendor,
    ];

    /// Key used in the URL projection and in serialized selections.
    pub fn key(self) -> &'static str {
        match self {
            Dimension::City => "city",
            Dimension::Year => "year",
            Dimension::Month => "month",
            Dimension::Format => "format",
            Dimension::Vendor => "vendor",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }

    fn check_token(self, token: &str) -> Result<(), String> {
        if token.chars().count() > MAX_TOKEN_CHARS {
            return Err(format!("longer than {} characters", MAX_TOKEN_CHARS));
        }
        if token.chars().any(char::is_control) {
            return Err("contains control characters".to_string());
        }
        match self {
            Dimension::Year if !YEAR_TOKEN.is_match(token) => {
                Err("expected a whole year number".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSelection {
    #[serde(default)]
    pub city: Vec<String>,
    #[serde(default)]
    pub year: Vec<String>,
    #[serde(default)]
    pub month: Vec<String>,
    #[serde(default)]
    pub format: Vec<String>,
    #[serde(default)]
    pub vendor: Vec<String>,
}

impl FilterSelection {
    pub fn get(&self, dimension: Dimension) -> &[String] {
        match dimension {
            Dimension::City => &self.city,
            Dimension::Year => &self.year,
            Dimension::Month => &self.month,
            Dimension::Format => &self.format,
            Dimension::Vendor => &self.vendor,
        }
    }

    fn slot(&mut self, dimension: Dimension) -> &mut Vec<String> {
        match dimension {
            Dimension::City => &mut self.city,
            Dimension::Year => &mut self.year,
            Dimension::Month => &mut self.month,
            Dimension::Format => &mut self.format,
            Dimension::Vendor => &mut self.vendor,
        }
    }

    /// Replace one dimension's tokens. Duplicates are dropped, first
    /// occurrence wins, so display order is preserved.
    pub fn set<I, S>(&mut self, dimension: Dimension, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = self.slot(dimension);
        slot.clear();
        for token in tokens {
            let token = token.into();
            if !slot.contains(&token) {
                slot.push(token);
            }
        }
    }

    /// Builder-style `set`, handy in tests and fixtures.
    pub fn with<I, S>(mut self, dimension: Dimension, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(dimension, tokens);
        self
    }

    pub fn clear(&mut self, dimension: Dimension) {
        self.slot(dimension).clear();
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.get(*d).is_empty())
    }

    /// Reject the whole selection if any token fails its dimension's format
    /// check. Nothing is sanitized; a bad token fails the request.
    pub fn validate(&self) -> Result<(), QueryError> {
        for dimension in Dimension::ALL {
            for token in self.get(dimension) {
                dimension
                    .check_token(token)
                    .map_err(|reason| QueryError::InvalidFilter {
                        dimension,
                        token: token.clone(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }

    /// Project the selection into repeated `key=value` pairs, one pair per
    /// token, in dimension order.
    pub fn to_query_string(&self) -> String {
        let mut pairs = Vec::new();
        for dimension in Dimension::ALL {
            for token in self.get(dimension) {
                pairs.push(format!("{}={}", dimension.key(), urlencoding::encode(token)));
            }
        }
        pairs.join("&")
    }

    /// Inverse of [`to_query_string`](Self::to_query_string). Accepts a
    /// leading `?`, `+` as space, and ignores unknown keys, blank values and
    /// pairs that fail to percent-decode.
    pub fn from_query_string(query: &str) -> Self {
        let mut selection = FilterSelection::default();
        let query = query.strip_prefix('?').unwrap_or(query);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let Some(dimension) = Dimension::from_key(key) else {
                continue;
            };
            let value = value.replace('+', " ");
            let Ok(value) = urlencoding::decode(&value) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = selection.slot(dimension);
            if !slot.iter().any(|t| t == value) {
                slot.push(value.to_string());
            }
        }
        selection
    }
}
