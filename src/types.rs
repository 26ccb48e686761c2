use crate::util::format_number;
use serde::{Deserialize, Serialize};
use std::fmt;
use tabled::Tabled;

/// One advertising-surface-month observation after normalization. Every
/// field is present and typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub address: String,
    pub city: String,
    pub vendor: String,
    pub format: String,
    pub year: i32,
    pub month: String,
    pub grp: f64,
    pub ots: f64,
    pub lat: f64,
    pub lng: f64,
}

/// Largest integer a JSON consumer with IEEE-754 numbers holds exactly.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// A 64-bit aggregate count.
///
/// Serializes as a JSON number while it fits in [`MAX_SAFE_INTEGER`] and as a
/// decimal string beyond that, so it is never truncated on the far side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "CountRepr")]
pub struct Count(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum CountRepr {
    Int(u64),
    Text(String),
}

impl TryFrom<CountRepr> for Count {
    type Error = String;

    fn try_from(repr: CountRepr) -> Result<Self, Self::Error> {
        match repr {
            CountRepr::Int(n) => Ok(Count(n)),
            CountRepr::Text(s) => s
                .parse::<u64>()
                .map(Count)
                .map_err(|_| format!("count {:?} is not a non-negative integer", s)),
        }
    }
}

impl Serialize for Count {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 <= MAX_SAFE_INTEGER {
            serializer.serialize_u64(self.0)
        } else {
            serializer.serialize_str(&self.0.to_string())
        }
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for Count {
    fn from(n: usize) -> Self {
        Count(n as u64)
    }
}

fn grp_cell(v: &f64) -> String {
    format_number(*v, 3)
}

fn ots_cell(v: &f64) -> String {
    format_number(*v, 1)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiRow {
    pub avg_grp: f64,
    pub total_ots: f64,
    pub unique_surfaces: Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
pub struct MapRow {
    #[tabled(rename = "Адрес")]
    pub address: String,
    #[tabled(rename = "Город")]
    pub city: String,
    #[tabled(rename = "Продавец")]
    pub vendor: String,
    #[tabled(rename = "Формат")]
    pub format: String,
    #[tabled(rename = "GRP", display_with = "grp_cell")]
    pub avg_grp: f64,
    #[tabled(rename = "OTS", display_with = "ots_cell")]
    pub avg_ots: f64,
    #[tabled(skip)]
    pub lat: f64,
    #[tabled(skip)]
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
pub struct TrendRow {
    #[tabled(rename = "Месяц")]
    pub month: String,
    #[tabled(rename = "Год")]
    pub year: i32,
    #[tabled(rename = "Средний GRP", display_with = "grp_cell")]
    pub avg_grp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    #[tabled(rename = "Город")]
    pub city: String,
    #[tabled(rename = "Формат")]
    pub format: String,
    #[tabled(rename = "Средний GRP", display_with = "grp_cell")]
    pub avg_grp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[tabled(rename = "Город")]
    pub city: String,
    #[tabled(rename = "Формат")]
    pub format: String,
    #[tabled(rename = "Год")]
    pub year: i32,
    #[tabled(rename = "Месяц")]
    pub month: String,
    #[tabled(rename = "Средний GRP", display_with = "grp_cell")]
    pub avg_grp: f64,
    #[tabled(rename = "Конструкций")]
    pub side_count: Count,
}

/// Narrowed option lists, one per filter dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub cities: Vec<String>,
    pub years: Vec<String>,
    pub months: Vec<String>,
    pub formats: Vec<String>,
    pub vendors: Vec<String>,
}

/// The six result shapes of one accepted request. Always replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBundle {
    pub kpis: KpiRow,
    pub map_data: Vec<MapRow>,
    pub trend_data: Vec<TrendRow>,
    pub matrix_data: Vec<MatrixRow>,
    pub report_data: Vec<ReportRow>,
    pub options: FilterOptions,
}
