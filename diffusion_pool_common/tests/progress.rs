use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use diffusion_pool_common::{ProgressReporter, ProgressSnapshot, StopSignal};

fn recording_reporter(
    stop: Option<StopSignal>,
) -> (ProgressReporter, Arc<Mutex<Vec<ProgressSnapshot>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reporter = ProgressReporter::new(
        Some(Box::new(move |snapshot: &ProgressSnapshot| {
            sink.lock().unwrap().push(snapshot.clone())
        })),
        stop,
    )
    .silent(true);
    (reporter, seen)
}

#[test]
fn runs_to_completion_without_stop_signal() {
    let (mut reporter, seen) = recording_reporter(None);
    let steps = reporter.iter(0..10).collect::<Vec<_>>();

    assert_eq!(steps, (0..10).collect::<Vec<_>>());
    assert_eq!(reporter.completed(), 10);
    assert!(!reporter.aborted());

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("final step is always reported");
    assert_eq!((last.n, last.total), (10, 10));
}

#[test]
fn callbacks_are_rate_limited() {
    let (reporter, seen) = recording_reporter(None);
    let mut reporter = reporter.with_min_interval(Duration::from_secs(3600));
    let steps = reporter.iter(0..50).count();

    assert_eq!(steps, 50);
    // Only the final step gets past an hour-long interval.
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn every_step_reported_without_min_interval() {
    let (reporter, seen) = recording_reporter(None);
    let mut reporter = reporter.with_min_interval(Duration::ZERO);
    reporter.iter(0..5).for_each(drop);

    let counts = seen.lock().unwrap().iter().map(|s| s.n).collect::<Vec<_>>();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
}

#[test]
fn stop_before_first_step_yields_nothing() {
    let stop = StopSignal::new();
    stop.set();
    let (mut reporter, seen) = recording_reporter(Some(stop));

    assert_eq!(reporter.iter(0..10).count(), 0);
    assert_eq!(reporter.completed(), 0);
    assert!(reporter.aborted());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn stop_mid_loop_ends_early() {
    let stop = StopSignal::new();
    let (mut reporter, _seen) = recording_reporter(Some(stop.clone()));

    let mut produced = 0;
    for step in reporter.iter(0..10) {
        produced += 1;
        if step == 3 {
            stop.set();
        }
    }

    assert_eq!(produced, 4);
    assert!(produced < 10);
    assert_eq!(reporter.completed(), 4);
    assert!(reporter.aborted());
}

#[test]
fn reporter_resets_between_iterations() {
    let stop = StopSignal::new();
    stop.set();
    let (mut reporter, _seen) = recording_reporter(Some(stop.clone()));
    assert_eq!(reporter.iter(0..3).count(), 0);

    stop.clear();
    assert_eq!(reporter.iter(0..3).count(), 3);
    assert!(!reporter.aborted());
}
