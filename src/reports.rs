// The six aggregation shapes.
//
// Each function takes the rows that already satisfy the request's main
// predicate, except `generate_options`, which applies the exclude-self
// variants itself.
use crate::compiler::PredicateSet;
use crate::error::QueryError;
use crate::filters::Dimension;
use crate::types::{
    Count, FilterOptions, KpiRow, MapRow, MatrixRow, Record, ReportRow, TrendRow,
};
use crate::util::{average, cmp_periods};
use std::collections::{BTreeSet, HashMap, HashSet};

fn finite(shape: &'static str, metric: &str, v: f64) -> Result<f64, QueryError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(QueryError::Execution {
            shape,
            reason: format!("{} is not a finite number", metric),
        })
    }
}

/// Headline KPIs.
///
/// `total_ots` is the mean over `(year, month)` periods of the per-period OTS
/// sum. OTS is a daily contact volume, so summing across periods would count
/// the same audience once per period.
pub fn generate_kpis(rows: &[&Record]) -> Result<KpiRow, QueryError> {
    let grps: Vec<f64> = rows.iter().map(|r| r.grp).collect();

    let mut per_period: HashMap<(i32, &str), f64> = HashMap::new();
    for r in rows {
        *per_period.entry((r.year, r.month.as_str())).or_default() += r.ots;
    }
    let period_totals: Vec<f64> = per_period.into_values().collect();

    let addresses: HashSet<&str> = rows.iter().map(|r| r.address.as_str()).collect();

    Ok(KpiRow {
        avg_grp: finite("kpis", "avgGrp", average(&grps))?,
        total_ots: finite("kpis", "totalOts", average(&period_totals))?,
        unique_surfaces: Count::from(addresses.len()),
    })
}

pub fn generate_map(rows: &[&Record]) -> Vec<MapRow> {
    #[derive(Default)]
    struct Acc {
        grps: Vec<f64>,
        ots: Vec<f64>,
        lat: f64,
        lng: f64,
    }
    let mut map: HashMap<(&str, &str, &str, &str), Acc> = HashMap::new();
    for r in rows {
        let key = (
            r.address.as_str(),
            r.city.as_str(),
            r.vendor.as_str(),
            r.format.as_str(),
        );
        let e = map.entry(key).or_insert_with(|| Acc {
            lat: f64::MIN,
            lng: f64::MIN,
            ..Acc::default()
        });
        e.grps.push(r.grp);
        e.ots.push(r.ots);
        // Coordinates of one address are stable; any value would do, max is
        // deterministic.
        e.lat = e.lat.max(r.lat);
        e.lng = e.lng.max(r.lng);
    }
    let mut out: Vec<MapRow> = map
        .into_iter()
        .map(|((address, city, vendor, format), acc)| MapRow {
            address: address.to_string(),
            city: city.to_string(),
            vendor: vendor.to_string(),
            format: format.to_string(),
            avg_grp: average(&acc.grps),
            avg_ots: average(&acc.ots),
            lat: acc.lat,
            lng: acc.lng,
        })
        .collect();
    out.sort_by(|a, b| {
        (&a.city, &a.address, &a.vendor, &a.format).cmp(&(&b.city, &b.address, &b.vendor, &b.format))
    });
    out
}

pub fn generate_trend(rows: &[&Record]) -> Vec<TrendRow> {
    let mut map: HashMap<(i32, &str), Vec<f64>> = HashMap::new();
    for r in rows {
        map.entry((r.year, r.month.as_str())).or_default().push(r.grp);
    }
    let mut out: Vec<TrendRow> = map
        .into_iter()
        .map(|((year, month), grps)| TrendRow {
            month: month.to_string(),
            year,
            avg_grp: average(&grps),
        })
        .collect();
    out.sort_by(|a, b| cmp_periods((a.year, &a.month), (b.year, &b.month)));
    out
}

pub fn generate_matrix(rows: &[&Record]) -> Vec<MatrixRow> {
    let mut map: HashMap<(&str, &str), Vec<f64>> = HashMap::new();
    for r in rows {
        map.entry((r.city.as_str(), r.format.as_str())).or_default().push(r.grp);
    }
    let mut out: Vec<MatrixRow> = map
        .into_iter()
        .map(|((city, format), grps)| MatrixRow {
            city: city.to_string(),
            format: format.to_string(),
            avg_grp: average(&grps),
        })
        .collect();
    out.sort_by(|a, b| (&a.city, &a.format).cmp(&(&b.city, &b.format)));
    out
}

pub fn generate_report(rows: &[&Record]) -> Vec<ReportRow> {
    let mut map: HashMap<(&str, &str, i32, &str), Vec<f64>> = HashMap::new();
    for r in rows {
        let key = (r.city.as_str(), r.format.as_str(), r.year, r.month.as_str());
        map.entry(key).or_default().push(r.grp);
    }
    let mut out: Vec<ReportRow> = map
        .into_iter()
        .map(|((city, format, year, month), grps)| ReportRow {
            city: city.to_string(),
            format: format.to_string(),
            year,
            month: month.to_string(),
            avg_grp: average(&grps),
            side_count: Count::from(grps.len()),
        })
        .collect();
    out.sort_by(|a, b| {
        a.city
            .cmp(&b.city)
            .then_with(|| cmp_periods((a.year, &a.month), (b.year, &b.month)))
            .then_with(|| a.format.cmp(&b.format))
    });
    out
}

/// Distinct values of every dimension under that dimension's exclude-self
/// predicate, sorted by string order.
pub fn generate_options(
    view: &[Record],
    predicates: &PredicateSet,
) -> Result<FilterOptions, QueryError> {
    let mut lists: Vec<Vec<String>> = Vec::with_capacity(Dimension::ALL.len());
    for dimension in Dimension::ALL {
        let bound = predicates.excluding(dimension).bind()?;
        let values: BTreeSet<String> = view
            .iter()
            .filter(|r| bound.matches(r))
            .map(|r| match dimension {
                Dimension::City => r.city.clone(),
                Dimension::Year => r.year.to_string(),
                Dimension::Month => r.month.clone(),
                Dimension::Format => r.format.clone(),
                Dimension::Vendor => r.vendor.clone(),
            })
            .collect();
        lists.push(values.into_iter().collect());
    }
    let mut lists = lists.into_iter();
    let mut next = || lists.next().unwrap_or_default();
    Ok(FilterOptions {
        cities: next(),
        years: next(),
        months: next(),
        formats: next(),
        vendors: next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterSelection;
    use pretty_assertions::assert_eq;

    fn rec(address: &str, city: &str, format: &str, year: i32, month: &str, grp: f64, ots: f64) -> Record {
        Record {
            id: format!("{address}-{year}-{month}"),
            address: address.into(),
            city: city.into(),
            vendor: "RUSS".into(),
            format: format.into(),
            year,
            month: month.into(),
            grp,
            ots,
            lat: 55.0,
            lng: 37.0,
        }
    }

    #[test]
    fn total_ots_averages_per_period_sums() {
        let data = [
            rec("a", "Москва", "BB", 2024, "янв", 1.0, 10.0),
            rec("b", "Москва", "BB", 2024, "янв", 1.0, 30.0),
            rec("a", "Москва", "BB", 2024, "фев", 1.0, 20.0),
        ];
        let rows: Vec<&Record> = data.iter().collect();
        let k = generate_kpis(&rows).unwrap();
        // (10 + 30) and 20 → mean 30, not the flat sum 60 or flat mean 20.
        assert_eq!(k.total_ots, 30.0);
        assert_eq!(k.unique_surfaces, Count(2));
    }

    #[test]
    fn kpis_of_nothing_are_zero() {
        assert_eq!(generate_kpis(&[]).unwrap(), KpiRow::default());
    }

    #[test]
    fn kpis_reject_non_finite_metrics() {
        let data = [
            rec("a", "Москва", "BB", 2024, "янв", f64::MAX, 0.0),
            rec("b", "Москва", "BB", 2024, "янв", f64::MAX, 0.0),
        ];
        let rows: Vec<&Record> = data.iter().collect();
        assert!(matches!(
            generate_kpis(&rows),
            Err(QueryError::Execution { shape: "kpis", .. })
        ));
    }

    #[test]
    fn trend_is_chronological() {
        let data = [
            rec("a", "Москва", "BB", 2024, "мар", 3.0, 0.0),
            rec("a", "Москва", "BB", 2023, "дек", 1.0, 0.0),
            rec("a", "Москва", "BB", 2024, "янв", 2.0, 0.0),
            rec("b", "Москва", "BB", 2024, "янв", 4.0, 0.0),
        ];
        let rows: Vec<&Record> = data.iter().collect();
        let periods: Vec<(i32, String, f64)> = generate_trend(&rows)
            .into_iter()
            .map(|t| (t.year, t.month, t.avg_grp))
            .collect();
        assert_eq!(
            periods,
            vec![
                (2023, "дек".to_string(), 1.0),
                (2024, "янв".to_string(), 3.0),
                (2024, "мар".to_string(), 3.0),
            ]
        );
    }

    #[test]
    fn map_groups_surfaces_and_takes_max_coordinates() {
        let mut a1 = rec("a", "Москва", "BB", 2024, "янв", 1.0, 10.0);
        let mut a2 = rec("a", "Москва", "BB", 2024, "фев", 2.0, 20.0);
        a1.lat = 55.1;
        a2.lat = 55.2;
        let data = [a1, a2, rec("b", "Казань", "SS", 2024, "янв", 5.0, 1.0)];
        let rows: Vec<&Record> = data.iter().collect();
        let map = generate_map(&rows);
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].city, "Казань");
        let a = &map[1];
        assert_eq!((a.avg_grp, a.avg_ots, a.lat), (1.5, 15.0, 55.2));
    }

    #[test]
    fn report_counts_rows_and_orders_by_city_then_period() {
        let data = [
            rec("a", "Москва", "BB", 2024, "фев", 1.0, 0.0),
            rec("b", "Москва", "BB", 2024, "фев", 3.0, 0.0),
            rec("c", "Казань", "BB", 2024, "мар", 1.0, 0.0),
            rec("a", "Москва", "BB", 2024, "янв", 1.0, 0.0),
        ];
        let rows: Vec<&Record> = data.iter().collect();
        let report = generate_report(&rows);
        let keys: Vec<(&str, &str, u64)> = report
            .iter()
            .map(|r| (r.city.as_str(), r.month.as_str(), r.side_count.0))
            .collect();
        assert_eq!(
            keys,
            vec![("Казань", "мар", 1), ("Москва", "янв", 1), ("Москва", "фев", 2)]
        );
        assert_eq!(report[2].avg_grp, 2.0);
    }

    #[test]
    fn options_exclude_their_own_dimension() {
        let mut kzn = rec("c", "Казань", "SS", 2023, "фев", 1.0, 0.0);
        kzn.vendor = "Gallery".into();
        let view = vec![rec("a", "Москва", "BB", 2024, "янв", 1.0, 0.0), kzn];
        let f = FilterSelection::default().with(Dimension::City, ["Москва"]);
        let set = PredicateSet::compile(&f).unwrap();
        let opts = generate_options(&view, &set).unwrap();
        assert_eq!(opts.cities, vec!["Казань", "Москва"]);
        assert_eq!(opts.vendors, vec!["RUSS"]);
        assert_eq!(opts.formats, vec!["BB"]);
        assert_eq!(opts.years, vec!["2024"]);
        assert_eq!(opts.months, vec!["янв"]);
    }
}
