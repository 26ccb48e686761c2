use ooh_dash::filters::{Dimension, FilterSelection};
use ooh_dash::sequencer::{Outcome, Phase, Sequencer};
use ooh_dash::transport::{Envelope, WorkerMessage};
use ooh_dash::types::{Count, KpiRow, QueryBundle};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

fn bundle(surfaces: u64) -> QueryBundle {
    QueryBundle {
        kpis: KpiRow {
            unique_surfaces: Count(surfaces),
            ..KpiRow::default()
        },
        ..QueryBundle::default()
    }
}

fn result(request_id: u64, surfaces: u64) -> Envelope {
    Envelope::encode(&WorkerMessage::QueryResult {
        request_id,
        bundle: bundle(surfaces),
    })
    .unwrap()
}

fn ready(s: &mut Sequencer) {
    s.begin_loading();
    let env = Envelope::encode(&WorkerMessage::Ready { rows: Count(10) }).unwrap();
    let (_, first) = s.on_envelope(&env, &FilterSelection::default());
    assert_eq!(first.unwrap().id, 1);
    let (outcome, _) = s.on_envelope(&result(1, 10), &FilterSelection::default());
    assert_eq!(outcome, Outcome::Accepted(bundle(10)));
}

fn issue(s: &mut Sequencer, city: &str, at: Instant) -> u64 {
    let selection = FilterSelection::default().with(Dimension::City, [city]);
    let deadline = s.on_filter_change(selection, at).unwrap();
    s.fire(deadline).unwrap().id
}

#[test]
fn out_of_order_results_never_regress() {
    let mut s = Sequencer::new(Duration::from_millis(300));
    ready(&mut s);
    let t0 = Instant::now();
    let a = issue(&mut s, "Москва", t0);
    let b = issue(&mut s, "Казань", t0 + Duration::from_secs(1));
    assert_eq!((a, b), (2, 3));

    let current = FilterSelection::default();
    let (outcome, _) = s.on_envelope(&result(b, 3), &current);
    assert_eq!(outcome, Outcome::Accepted(bundle(3)));
    let (outcome, _) = s.on_envelope(&result(a, 2), &current);
    assert_eq!(outcome, Outcome::Discarded);
    assert_eq!(s.last_accepted(), 3);
    assert!(!s.is_busy());
}

#[test]
fn in_order_results_are_both_shown() {
    let mut s = Sequencer::new(Duration::from_millis(300));
    ready(&mut s);
    let t0 = Instant::now();
    let a = issue(&mut s, "Москва", t0);
    let b = issue(&mut s, "Казань", t0 + Duration::from_secs(1));

    let current = FilterSelection::default();
    assert_eq!(s.on_envelope(&result(a, 2), &current).0, Outcome::Accepted(bundle(2)));
    assert_eq!(s.on_envelope(&result(b, 3), &current).0, Outcome::Accepted(bundle(3)));
}

#[test]
fn huge_counts_cross_the_transport_as_strings() {
    let big = (1u64 << 53) + 1;
    let env = result(1, big);
    assert!(env.body().contains(&format!("\"uniqueSurfaces\":\"{}\"", big)));
    match env.decode().unwrap() {
        WorkerMessage::QueryResult { bundle, .. } => {
            assert_eq!(bundle.kpis.unique_surfaces, Count(big));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn reset_discards_everything_in_flight() {
    let mut s = Sequencer::new(Duration::from_millis(300));
    ready(&mut s);
    let a = issue(&mut s, "Москва", Instant::now());
    s.reset();
    assert_eq!(s.phase(), Phase::Idle);
    let (outcome, _) = s.on_envelope(&result(a, 1), &FilterSelection::default());
    assert_eq!(outcome, Outcome::Discarded);
}
