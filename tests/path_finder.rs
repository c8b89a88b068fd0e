mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{blank, engine, init_tracing, p, speckle, tube};
use neurotrace::config::EngineConfig;
use neurotrace::edit::Focus;
use neurotrace::path::{
    Connectivity, DenseVolume, PathFinder, PathOptions, PathWorker, SearchOutcome, VolumeSampler,
};
use neurotrace::types::Position;

fn corridor() -> DenseVolume {
    DenseVolume::from_fn([20, 20, 1], Position::ORIGIN, p(1.0, 1.0, 1.0), |i, j, _| {
        let along_x = j == 2 && (2..=17).contains(&i);
        let along_y = i == 17 && (2..=17).contains(&j);
        if along_x || along_y {
            1.0
        } else {
            0.0
        }
    })
}

#[test]
fn identical_inputs_give_identical_paths() {
    init_tracing();
    let volume = speckle(7, [24, 24, 6]);
    let (start, goal) = (p(1.0, 1.0, 1.0), p(21.0, 19.0, 4.0));
    for connectivity in [Connectivity::Face, Connectivity::Full] {
        let options = PathOptions::default().connectivity(connectivity);
        let first = PathFinder::new(options.clone()).find_path(start, goal, &volume);
        let second = PathFinder::new(options).find_path(start, goal, &volume);
        assert!(first.is_found());
        assert_eq!(first, second);
    }
}

#[test]
fn search_follows_bright_corridor() {
    let volume = corridor();
    let finder = PathFinder::new(PathOptions::default().simplify_area(None));
    let outcome = finder.find_path(p(2.0, 2.0, 0.0), p(17.0, 17.0, 0.0), &volume);
    let path = outcome.path().unwrap();
    assert_eq!(path.start(), Some(p(2.0, 2.0, 0.0)));
    assert_eq!(path.goal(), Some(p(17.0, 17.0, 0.0)));
    assert_eq!(path.points.len(), 31);
    for point in &path.points {
        assert_eq!(volume.sample(*point).unwrap().intensity, 1.0, "{point} is off the corridor");
    }
}

#[test]
fn simplification_keeps_endpoints_and_drops_points() {
    let volume = tube(32);
    let (start, goal) = (p(2.0, 4.0, 4.0), p(28.0, 4.0, 4.0));
    let raw = PathFinder::new(PathOptions::default().simplify_area(None)).find_path(start, goal, &volume);
    let simple = PathFinder::new(PathOptions::default()).find_path(start, goal, &volume);
    let (raw, simple) = (raw.path().unwrap(), simple.path().unwrap());
    assert!(simple.points.len() < raw.points.len());
    assert_eq!(simple.start(), raw.start());
    assert_eq!(simple.goal(), raw.goal());
    assert_eq!(simple.cost, raw.cost);
}

#[test]
fn unreachable_or_over_budget_searches_report_no_path() {
    let volume = speckle(3, [24, 24, 6]);
    let start = p(1.0, 1.0, 1.0);
    let default = PathFinder::default();
    assert_eq!(default.find_path(start, p(40.0, 1.0, 1.0), &volume), SearchOutcome::NoPath);

    let goal = p(20.0, 20.0, 4.0);
    let tight = PathFinder::new(PathOptions::default().max_expansions(5));
    assert_eq!(tight.find_path(start, goal, &volume), SearchOutcome::NoPath);

    let cheap = PathFinder::new(PathOptions::default().max_cost(Some(1e-6)));
    assert_eq!(cheap.find_path(start, goal, &volume), SearchOutcome::NoPath);
}

#[test]
fn cancellation_is_polled_during_search() {
    let volume = speckle(5, [24, 24, 6]);
    let finder = PathFinder::new(PathOptions::default().cancel_check_interval(1));
    let outcome = finder.find_path_with_cancel(p(1.0, 1.0, 1.0), p(20.0, 20.0, 4.0), &volume, &|| true);
    assert_eq!(outcome, SearchOutcome::Cancelled);
}

#[test]
fn straight_mode_ignores_volume() {
    let finder = PathFinder::new(PathOptions::straight());
    let outcome = finder.find_path(Position::ORIGIN, p(8.0, 0.0, 0.0), &blank());
    let path = outcome.path().unwrap();
    assert_eq!(path.points.len(), 7);
    let gaps: Vec<f64> = path.points.windows(2).map(|w| w[0].distance_to(w[1])).collect();
    for gap in &gaps {
        assert!((gap - gaps[0]).abs() < 1e-9);
    }
    assert!((path.length() - 8.0).abs() < 1e-9);
}

#[test]
fn engine_keeps_only_latest_worker_result() {
    let (mut engine, _) = engine(&EngineConfig::default());
    let sampler: Arc<dyn VolumeSampler> = Arc::new(tube(32));
    let mut worker = PathWorker::spawn(engine.finder().clone(), Arc::clone(&sampler));

    engine.pick_target(p(2.0, 4.0, 4.0));
    engine.create_neuron().unwrap();
    engine.pick_target(p(20.0, 4.0, 4.0));
    let first = engine.begin_connect(&mut worker).unwrap();
    let second = engine.begin_connect(&mut worker).unwrap();
    assert_ne!(first, second);

    let a = worker.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(a.id, first);
    assert_eq!(engine.complete_connect(a), SearchOutcome::Cancelled);
    assert!(matches!(engine.focus(), Focus::HasTarget { .. }));

    let b = worker.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(b.id, second);
    assert!(engine.complete_connect(b).is_found());
    assert!(matches!(engine.focus(), Focus::HasPath { .. }));
    engine.extend(sampler.as_ref()).unwrap();
    assert_eq!(engine.store().node_count(), 2);
}
