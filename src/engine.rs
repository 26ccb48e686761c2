//! Canonical dataset view and the aggregation engine that reads it.
//!
//! The view is built once per session from normalized records and is never
//! mutated afterwards; the engine shares it behind an `Arc` so concurrent
//! requests read the same snapshot.

use crate::compiler::PredicateSet;
use crate::error::QueryError;
use crate::filters::FilterSelection;
use crate::reports::{
    generate_kpis, generate_map, generate_matrix, generate_options, generate_report,
    generate_trend,
};
use crate::types::{QueryBundle, Record};
use log::debug;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct DatasetView {
    rows: Vec<Record>,
}

impl DatasetView {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    view: Arc<DatasetView>,
}

impl Engine {
    pub fn new(view: DatasetView) -> Self {
        Self {
            view: Arc::new(view),
        }
    }

    pub fn view(&self) -> &DatasetView {
        &self.view
    }

    /// Validate, compile and execute one selection snapshot.
    pub fn query(&self, selection: &FilterSelection) -> Result<QueryBundle, QueryError> {
        let predicates = PredicateSet::compile(selection)?;
        self.execute(&predicates)
    }

    /// Run all six shapes against one predicate set. Any failure fails the
    /// whole bundle.
    pub fn execute(&self, predicates: &PredicateSet) -> Result<QueryBundle, QueryError> {
        let started = Instant::now();
        let bound = predicates.main.bind()?;
        let rows: Vec<&Record> = self.view.rows.iter().filter(|r| bound.matches(r)).collect();

        let bundle = QueryBundle {
            kpis: generate_kpis(&rows)?,
            map_data: generate_map(&rows),
            trend_data: generate_trend(&rows),
            matrix_data: generate_matrix(&rows),
            report_data: generate_report(&rows),
            options: generate_options(&self.view.rows, predicates)?,
        };
        debug!(
            "predicate [{}] matched {} of {} rows in {:?}",
            predicates.main,
            rows.len(),
            self.view.len(),
            started.elapsed()
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Dimension;
    use crate::types::{Count, KpiRow, MatrixRow, TrendRow};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn rec(address: &str, city: &str, vendor: &str, format: &str, year: i32, month: &str, grp: f64) -> Record {
        Record {
            id: format!("{address}/{year}/{month}"),
            address: address.into(),
            city: city.into(),
            vendor: vendor.into(),
            format: format.into(),
            year,
            month: month.into(),
            grp,
            ots: 10.0,
            lat: 55.75,
            lng: 37.61,
        }
    }

    fn sample() -> Engine {
        Engine::new(DatasetView::new(vec![
            rec("Тверская 1", "Москва", "RUSS", "BB", 2024, "янв", 1.0),
            rec("Тверская 1", "Москва", "RUSS", "BB", 2024, "фев", 2.0),
            rec("Арбат 5", "Москва", "Gallery", "SS", 2024, "янв", 3.0),
            rec("Невский 10", "СПб", "LAMA", "MF", 2023, "дек", 0.5),
            rec("Баумана 2", "Казань", "RUSS", "BB", 2024, "янв", 1.5),
        ]))
    }

    #[test]
    fn empty_dataset_yields_empty_bundle() {
        let bundle = Engine::default().query(&FilterSelection::default()).unwrap();
        assert_eq!(bundle, QueryBundle::default());
        assert_eq!(
            bundle.kpis,
            KpiRow { avg_grp: 0.0, total_ots: 0.0, unique_surfaces: Count(0) }
        );
    }

    #[test]
    fn single_record_without_filters() {
        let engine = Engine::new(DatasetView::new(vec![Record {
            ots: 20.0,
            ..rec("Тверская 1", "Москва", "RUSS", "BB", 2024, "янв", 1.5)
        }]));
        let bundle = engine.query(&FilterSelection::default()).unwrap();
        assert_eq!(bundle.kpis.avg_grp, 1.5);
        assert_eq!(bundle.kpis.total_ots, 20.0);
        assert_eq!(bundle.kpis.unique_surfaces, Count(1));
        assert_eq!(
            bundle.trend_data,
            vec![TrendRow { month: "янв".into(), year: 2024, avg_grp: 1.5 }]
        );
    }

    #[test]
    fn shared_city_format_pair_is_averaged() {
        let engine = Engine::new(DatasetView::new(vec![
            rec("a", "Москва", "RUSS", "BB", 2024, "янв", 1.0),
            rec("b", "Москва", "RUSS", "BB", 2024, "янв", 3.0),
        ]));
        let bundle = engine.query(&FilterSelection::default()).unwrap();
        assert_eq!(
            bundle.matrix_data,
            vec![MatrixRow { city: "Москва".into(), format: "BB".into(), avg_grp: 2.0 }]
        );
    }

    #[test]
    fn city_filter_narrows_other_options_only() {
        let f = FilterSelection::default().with(Dimension::City, ["Москва"]);
        let bundle = sample().query(&f).unwrap();
        assert_eq!(bundle.options.cities, vec!["Казань", "Москва", "СПб"]);
        assert_eq!(bundle.options.vendors, vec!["Gallery", "RUSS"]);
        assert_eq!(bundle.options.formats, vec!["BB", "SS"]);
        assert_eq!(bundle.options.years, vec!["2024"]);
    }

    #[test]
    fn every_row_satisfies_the_selection() {
        let f = FilterSelection::default()
            .with(Dimension::Vendor, ["RUSS"])
            .with(Dimension::Year, ["2024"]);
        let bundle = sample().query(&f).unwrap();
        assert!(bundle.map_data.iter().all(|r| r.vendor == "RUSS"));
        assert!(bundle.report_data.iter().all(|r| r.year == 2024));
        assert!(bundle.trend_data.iter().all(|r| r.year == 2024));
        let cities: HashSet<&str> = bundle.matrix_data.iter().map(|m| m.city.as_str()).collect();
        assert_eq!(cities, HashSet::from(["Москва", "Казань"]));
    }

    #[test]
    fn unique_surfaces_match_map_addresses() {
        for f in [
            FilterSelection::default(),
            FilterSelection::default().with(Dimension::City, ["Москва"]),
            FilterSelection::default().with(Dimension::Month, ["янв"]),
            FilterSelection::default().with(Dimension::Format, ["nothing"]),
        ] {
            let bundle = sample().query(&f).unwrap();
            let addresses: HashSet<&str> = bundle.map_data.iter().map(|m| m.address.as_str()).collect();
            assert_eq!(bundle.kpis.unique_surfaces, Count(addresses.len() as u64));
        }
    }

    #[test]
    fn no_filters_equals_whole_dataset() {
        let engine = sample();
        let bundle = engine.query(&FilterSelection::default()).unwrap();
        let total: u64 = bundle.report_data.iter().map(|r| r.side_count.0).sum();
        assert_eq!(total, engine.view().len() as u64);
        assert_eq!(bundle.kpis.avg_grp, 8.0 / 5.0);
    }

    #[test]
    fn invalid_selection_fails_whole_request() {
        let f = FilterSelection::default().with(Dimension::Year, ["year"]);
        assert!(matches!(sample().query(&f), Err(QueryError::InvalidFilter { .. })));
    }

    #[test]
    fn every_offered_option_is_a_valid_filter() {
        let engine = Engine::new(DatasetView::new(vec![
            rec("Тверская 1", "Москва", "RUSS", "BB", 0, "", 1.0),
            rec("Арбат 5", "Москва", "Gallery", "SS", 2024, "янв-фев", 2.0),
            rec("Невский 10", "СПб", "LAMA", "MF", 2023, "01/2023", 0.5),
        ]));
        let options = engine.query(&FilterSelection::default()).unwrap().options;
        assert_eq!(options.years, vec!["0", "2023", "2024"]);
        let lists = [
            (Dimension::City, options.cities),
            (Dimension::Year, options.years),
            (Dimension::Month, options.months),
            (Dimension::Format, options.formats),
            (Dimension::Vendor, options.vendors),
        ];
        for (dimension, values) in lists {
            for value in values {
                let f = FilterSelection::default().with(dimension, [value.clone()]);
                assert!(f.validate().is_ok(), "{dimension} option {value:?} rejected");
                assert!(!engine.query(&f).unwrap().map_data.is_empty());
            }
        }
    }

    fn field(r: &Record, d: Dimension) -> String {
        match d {
            Dimension::City => r.city.clone(),
            Dimension::Year => r.year.to_string(),
            Dimension::Month => r.month.clone(),
            Dimension::Format => r.format.clone(),
            Dimension::Vendor => r.vendor.clone(),
        }
    }

    proptest::proptest! {
        #[test]
        fn options_keep_values_reachable_under_other_dimensions(
            cities in proptest::sample::subsequence(vec!["Москва", "СПб", "Казань", "Омск"], 0..=2),
            years in proptest::sample::subsequence(vec!["2023", "2024"], 0..=1),
            formats in proptest::sample::subsequence(vec!["BB", "SS", "MF"], 0..=2),
        ) {
            let engine = sample();
            let f = FilterSelection::default()
                .with(Dimension::City, cities)
                .with(Dimension::Year, years)
                .with(Dimension::Format, formats);
            let bundle = engine.query(&f).unwrap();
            let options = [
                (Dimension::City, &bundle.options.cities),
                (Dimension::Year, &bundle.options.years),
                (Dimension::Format, &bundle.options.formats),
            ];
            for (dimension, listed) in options {
                let others = Dimension::ALL.into_iter().filter(|d| *d != dimension);
                let reachable = engine.view().rows().iter().filter(|r| {
                    others.clone().all(|d| {
                        let chosen = f.get(d);
                        chosen.is_empty() || chosen.contains(&field(r, d))
                    })
                });
                for r in reachable {
                    proptest::prop_assert!(listed.contains(&field(r, dimension)));
                }
            }
            let matched = bundle.report_data.iter().map(|r| r.side_count.0).sum::<u64>();
            let expected = engine.view().rows().iter().filter(|r| {
                Dimension::ALL.into_iter().all(|d| f.get(d).is_empty() || f.get(d).contains(&field(r, d)))
            }).count() as u64;
            proptest::prop_assert_eq!(matched, expected);
        }
    }
}
