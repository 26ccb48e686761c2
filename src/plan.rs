// Media plan: surfaces and report lines picked for export.
use crate::types::{MapRow, ReportRow};
use crate::util::{average, cmp_months};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

pub const MAP_PERIOD: &str = "Средний по фильтру";
pub const UNKNOWN_CITY: &str = "Не указан";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Map,
    Report,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub title: String,
    pub city: String,
    pub format: String,
    pub period: String,
    pub grp: f64,
    pub ots: f64,
    pub source: PlanSource,
}

impl PlanItem {
    /// A map surface, averaged over the current filter.
    pub fn from_map(row: &MapRow) -> Self {
        Self {
            id: format!("map:{}", row.address),
            title: row.address.clone(),
            city: row.city.clone(),
            format: row.format.clone(),
            period: MAP_PERIOD.to_string(),
            grp: row.avg_grp,
            ots: row.avg_ots,
            source: PlanSource::Map,
        }
    }

    /// One city/format/period line of the report. Report lines carry no OTS.
    pub fn from_report(row: &ReportRow) -> Self {
        Self {
            id: format!("report:{}:{}:{}:{}", row.city, row.format, row.year, row.month),
            title: format!("{} / {}", row.city, row.format),
            city: row.city.clone(),
            format: row.format.clone(),
            period: format!("{} {}", row.month, row.year),
            grp: row.avg_grp,
            ots: 0.0,
            source: PlanSource::Report,
        }
    }

    fn city_key(&self) -> &str {
        if self.city.trim().is_empty() {
            UNKNOWN_CITY
        } else {
            &self.city
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlanTotals {
    pub surfaces: usize,
    pub cities: usize,
    /// Plain mean of item GRP.
    pub avg_grp: f64,
    pub total_ots: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityGroup<'a> {
    pub city: &'a str,
    pub items: Vec<&'a PlanItem>,
    pub avg_grp: f64,
    pub total_ots: f64,
}

/// Insertion-ordered, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaPlan {
    items: Vec<PlanItem>,
}

impl MediaPlan {
    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    /// Returns false when an item with the same id is already planned.
    pub fn add(&mut self, item: PlanItem) -> bool {
        if self.contains(&item.id) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<PlanItem> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }

    /// Remove the item if planned, add it otherwise. Returns whether it is
    /// planned afterwards.
    pub fn toggle(&mut self, item: PlanItem) -> bool {
        if self.remove(&item.id).is_some() {
            false
        } else {
            self.items.push(item);
            true
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn totals(&self) -> PlanTotals {
        let grps: Vec<f64> = self.items.iter().map(|i| i.grp).collect();
        let cities: BTreeSet<&str> = self.items.iter().map(|i| i.city.as_str()).collect();
        PlanTotals {
            surfaces: self.items.len(),
            cities: cities.len(),
            avg_grp: average(&grps),
            total_ots: self.items.iter().map(|i| i.ots).sum(),
        }
    }

    /// Items sorted by city then title.
    pub fn sorted(&self) -> Vec<&PlanItem> {
        let mut items: Vec<&PlanItem> = self.items.iter().collect();
        items.sort_by(|a, b| {
            a.city
                .cmp(&b.city)
                .then_with(|| a.title.cmp(&b.title))
                .then_with(|| period_order(a, b))
        });
        items
    }

    /// Items grouped by city with per-city subtotals, in city order.
    pub fn by_city(&self) -> Vec<CityGroup<'_>> {
        let mut groups: Vec<CityGroup<'_>> = Vec::new();
        for item in self.sorted() {
            let key = item.city_key();
            match groups.last_mut() {
                Some(group) if group.city == key => group.items.push(item),
                _ => groups.push(CityGroup {
                    city: key,
                    items: vec![item],
                    avg_grp: 0.0,
                    total_ots: 0.0,
                }),
            }
        }
        for group in &mut groups {
            let grps: Vec<f64> = group.items.iter().map(|i| i.grp).collect();
            group.avg_grp = average(&grps);
            group.total_ots = group.items.iter().map(|i| i.ots).sum();
        }
        groups
    }
}

// Report periods are "<month> <year>"; order them on the calendar.
fn period_order(a: &PlanItem, b: &PlanItem) -> Ordering {
    let split = |p: &str| -> (String, String) {
        match p.rsplit_once(' ') {
            Some((month, year)) => (year.to_string(), month.to_string()),
            None => (String::new(), p.to_string()),
        }
    };
    let (ya, ma) = split(&a.period);
    let (yb, mb) = split(&b.period);
    ya.cmp(&yb).then_with(|| cmp_months(&ma, &mb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Count;
    use pretty_assertions::assert_eq;

    fn surface(address: &str, city: &str, grp: f64, ots: f64) -> PlanItem {
        PlanItem::from_map(&MapRow {
            address: address.into(),
            city: city.into(),
            vendor: "V".into(),
            format: "BB".into(),
            avg_grp: grp,
            avg_ots: ots,
            lat: 55.75,
            lng: 37.61,
        })
    }

    #[test]
    fn add_is_idempotent_by_id() {
        let mut plan = MediaPlan::default();
        assert!(plan.add(surface("Тверская 1", "Москва", 1.0, 10.0)));
        assert!(!plan.add(surface("Тверская 1", "Москва", 9.0, 90.0)));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.items()[0].grp, 1.0);
    }

    #[test]
    fn toggle_adds_then_removes() {
        let mut plan = MediaPlan::default();
        let item = surface("Тверская 1", "Москва", 1.0, 10.0);
        assert!(plan.toggle(item.clone()));
        assert!(plan.contains("map:Тверская 1"));
        assert!(!plan.toggle(item));
        assert!(plan.is_empty());
    }

    #[test]
    fn totals_average_grp_and_sum_ots() {
        let mut plan = MediaPlan::default();
        plan.add(surface("A", "Москва", 1.0, 10.0));
        plan.add(surface("B", "Москва", 3.0, 20.0));
        plan.add(surface("C", "Казань", 2.0, 5.0));
        let t = plan.totals();
        assert_eq!(t.surfaces, 3);
        assert_eq!(t.cities, 2);
        assert_eq!(t.avg_grp, 2.0);
        assert_eq!(t.total_ots, 35.0);
        assert_eq!(MediaPlan::default().totals(), PlanTotals::default());
    }

    #[test]
    fn groups_follow_city_order() {
        let mut plan = MediaPlan::default();
        plan.add(surface("B", "Москва", 3.0, 20.0));
        plan.add(surface("C", "Казань", 2.0, 5.0));
        plan.add(surface("A", "Москва", 1.0, 10.0));
        plan.add(surface("D", "", 4.0, 1.0));
        let groups = plan.by_city();
        let cities: Vec<&str> = groups.iter().map(|g| g.city).collect();
        assert_eq!(cities, vec![UNKNOWN_CITY, "Казань", "Москва"]);
        let moscow = &groups[2];
        let titles: Vec<&str> = moscow.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(moscow.avg_grp, 2.0);
        assert_eq!(moscow.total_ots, 30.0);
    }

    #[test]
    fn report_lines_have_period_ids() {
        let item = PlanItem::from_report(&ReportRow {
            city: "Москва".into(),
            format: "BB".into(),
            year: 2024,
            month: "янв".into(),
            avg_grp: 1.5,
            side_count: Count(3),
        });
        assert_eq!(item.id, "report:Москва:BB:2024:янв");
        assert_eq!(item.period, "янв 2024");
        assert_eq!(item.source, PlanSource::Report);
        assert_eq!(serde_json::to_value(item.source).unwrap(), "report");
    }
}
