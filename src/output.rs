// Exports (CSV / JSON files) and Markdown console previews.
use crate::error::DashboardError;
use crate::plan::MediaPlan;
use crate::types::ReportRow;
use crate::util::{cmp_months, round_to};
use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

fn export_err(path: &Path, e: impl Display) -> DashboardError {
    DashboardError::Export(format!("{}: {}", path.display(), e))
}

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), DashboardError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| export_err(path, e))?;
    for r in rows {
        wtr.serialize(r).map_err(|e| export_err(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DashboardError> {
    let s = serde_json::to_string_pretty(value).map_err(|e| export_err(path, e))?;
    std::fs::write(path, s)?;
    Ok(())
}

fn dated(dir: &Path, stem: &str, date: NaiveDate, ext: &str) -> PathBuf {
    dir.join(format!("{}_{}.{}", stem, date.format("%Y-%m-%d"), ext))
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    #[serde(rename = "Показатель")]
    metric: &'static str,
    #[serde(rename = "Значение")]
    value: String,
}

#[derive(Debug, Serialize)]
struct DynamicsRow<'a> {
    #[serde(rename = "Город")]
    city: &'a str,
    #[serde(rename = "Формат")]
    format: &'a str,
    #[serde(rename = "Год")]
    year: i32,
    #[serde(rename = "Месяц")]
    month: &'a str,
    #[serde(rename = "Средний GRP")]
    avg_grp: f64,
    #[serde(rename = "Количество конструкций")]
    side_count: u64,
}

/// Side-count-weighted GRP; 0 when there are no sides.
fn weighted_grp<'a>(rows: impl Iterator<Item = &'a ReportRow>) -> Option<f64> {
    let (sum, sides) = rows.fold((0.0, 0u64), |(sum, sides), r| {
        (sum + r.avg_grp * r.side_count.0 as f64, sides + r.side_count.0)
    });
    (sides > 0).then(|| sum / sides as f64)
}

fn summary_rows(data: &[ReportRow], date: NaiveDate) -> Vec<SummaryRow> {
    let total_sides: u64 = data.iter().map(|r| r.side_count.0).sum();
    let avg = weighted_grp(data.iter()).unwrap_or(0.0);
    let cities: BTreeSet<&str> = data.iter().map(|r| r.city.as_str()).collect();
    let formats: BTreeSet<&str> = data.iter().map(|r| r.format.as_str()).collect();
    vec![
        SummaryRow { metric: "Дата выгрузки", value: date.format("%d.%m.%Y").to_string() },
        SummaryRow { metric: "Рекламных поверхностей", value: total_sides.to_string() },
        SummaryRow {
            metric: "Средний GRP (взвешенный по количеству конструкций)",
            value: round_to(avg, 4).to_string(),
        },
        SummaryRow { metric: "Количество уникальных городов", value: cities.len().to_string() },
        SummaryRow { metric: "Количество форматов", value: formats.len().to_string() },
        SummaryRow {
            metric: "Количество периодов (город+формат+месяц)",
            value: data.len().to_string(),
        },
    ]
}

fn write_matrix(path: &Path, data: &[ReportRow]) -> Result<(), DashboardError> {
    let formats: BTreeSet<&str> = data.iter().map(|r| r.format.as_str()).collect();
    let mut cells: BTreeMap<&str, BTreeMap<&str, Vec<&ReportRow>>> = BTreeMap::new();
    for r in data {
        let by_format = cells.entry(r.city.as_str()).or_default();
        let rows = by_format.entry(r.format.as_str()).or_default();
        // Zero-GRP periods do not pull the average down.
        if r.avg_grp > 0.0 {
            rows.push(r);
        }
    }

    let mut wtr = csv::Writer::from_path(path).map_err(|e| export_err(path, e))?;
    let mut header = vec!["Город / Формат (Средний GRP)"];
    header.extend(formats.iter().copied());
    wtr.write_record(&header).map_err(|e| export_err(path, e))?;
    for (city, by_format) in &cells {
        let mut record = vec![city.to_string()];
        for format in &formats {
            let cell = by_format
                .get(format)
                .and_then(|rows| weighted_grp(rows.iter().copied()))
                .map(|v| round_to(v, 3).to_string())
                .unwrap_or_default();
            record.push(cell);
        }
        wtr.write_record(&record).map_err(|e| export_err(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

fn dynamics_rows(data: &[ReportRow]) -> Vec<DynamicsRow<'_>> {
    let mut sorted: Vec<&ReportRow> = data.iter().collect();
    sorted.sort_by(|a, b| {
        a.city
            .cmp(&b.city)
            .then_with(|| a.year.cmp(&b.year))
            .then_with(|| cmp_months(&a.month, &b.month))
    });
    sorted
        .into_iter()
        .map(|r| DynamicsRow {
            city: &r.city,
            format: &r.format,
            year: r.year,
            month: &r.month,
            avg_grp: round_to(r.avg_grp, 3),
            side_count: r.side_count.0,
        })
        .collect()
}

/// Write the summary, city × format matrix and detailed dynamics for the
/// current report. Nothing is written for an empty report.
pub fn export_report(
    data: &[ReportRow],
    dir: &Path,
    date: NaiveDate,
) -> Result<Vec<PathBuf>, DashboardError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(dir)?;

    let summary = dated(dir, "report_summary", date, "csv");
    write_csv(&summary, &summary_rows(data, date))?;
    let matrix = dated(dir, "report_matrix", date, "csv");
    write_matrix(&matrix, data)?;
    let dynamics = dated(dir, "report_dynamics", date, "csv");
    write_csv(&dynamics, &dynamics_rows(data))?;

    let written = vec![summary, matrix, dynamics];
    for p in &written {
        info!("wrote {}", p.display());
    }
    Ok(written)
}

#[derive(Debug, Serialize)]
struct PlanCsvRow<'a> {
    #[serde(rename = "Город")]
    city: String,
    #[serde(rename = "Объект/адрес")]
    title: &'a str,
    #[serde(rename = "Формат")]
    format: &'a str,
    #[serde(rename = "Период")]
    period: &'a str,
    #[serde(rename = "Средний GRP")]
    grp: f64,
    #[serde(rename = "OTS")]
    ots: f64,
}

impl<'a> PlanCsvRow<'a> {
    fn total(label: String, grp: f64, ots: f64) -> Self {
        Self {
            city: label,
            title: "",
            format: "",
            period: "",
            grp: round_to(grp, 3),
            ots: round_to(ots, 1),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanExport<'a> {
    exported: String,
    surfaces: usize,
    cities: usize,
    avg_grp: f64,
    total_ots: f64,
    items: &'a [crate::plan::PlanItem],
}

/// Write the media plan as JSON and as a CSV with per-city subtotals (when
/// more than one city is planned) and a grand total. Nothing is written for
/// an empty plan.
pub fn export_plan(plan: &MediaPlan, dir: &Path, date: NaiveDate) -> Result<Vec<PathBuf>, DashboardError> {
    if plan.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(dir)?;
    let totals = plan.totals();

    let json = dated(dir, "media_plan", date, "json");
    write_json(
        &json,
        &PlanExport {
            exported: date.format("%Y-%m-%d").to_string(),
            surfaces: totals.surfaces,
            cities: totals.cities,
            avg_grp: round_to(totals.avg_grp, 3),
            total_ots: round_to(totals.total_ots, 1),
            items: plan.items(),
        },
    )?;

    let groups = plan.by_city();
    let mut rows = Vec::new();
    for group in &groups {
        for item in &group.items {
            rows.push(PlanCsvRow {
                city: group.city.to_string(),
                title: &item.title,
                format: &item.format,
                period: &item.period,
                grp: round_to(item.grp, 3),
                ots: round_to(item.ots, 1),
            });
        }
        if groups.len() > 1 {
            rows.push(PlanCsvRow::total(format!("{} Итого", group.city), group.avg_grp, group.total_ots));
        }
    }
    rows.push(PlanCsvRow::total("ИТОГО".to_string(), totals.avg_grp, totals.total_ots));
    let csv = dated(dir, "media_plan", date, "csv");
    write_csv(&csv, &rows)?;

    info!("wrote {} and {}", json.display(), csv.display());
    Ok(vec![json, csv])
}

pub fn preview_table<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("\n{}", title);
    if let Some(n) = note {
        println!("({})", n);
    }
    println!();
    preview_table_rows(rows, max_rows);
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(нет данных)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
    if rows.len() > max_rows {
        println!("... ещё {} строк\n", rows.len() - max_rows);
    }
}
