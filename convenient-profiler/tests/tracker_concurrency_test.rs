//! Integration test for begin/end pairing under many worker threads

use convenient_profiler::{Completion, ExecutionTracker, Metric, MetricKind, Outcome, SessionMetrics};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

const WORKERS: usize = 8;
const STEPS: usize = 50;

#[test]
fn test_every_pair_recorded_exactly_once() {
    let session = Arc::new(SessionMetrics::default());
    let tracker = Arc::new(ExecutionTracker::new(Arc::clone(&session)));
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let subject = format!("module-{}", worker);
                barrier.wait();
                for step in 0..STEPS {
                    let step = format!("plugin:goal-{}", step);
                    let _ = tracker.begin(MetricKind::Plugin, &step, &subject).unwrap();
                    let _ = tracker
                        .end(MetricKind::Plugin, &step, &subject, Completion::Success)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let plugins = session.plugins();
    assert_eq!(plugins.len(), WORKERS * STEPS);
    assert_eq!(tracker.pending_count(), 0);

    let keys: HashSet<_> = plugins
        .iter()
        .map(|p| (p.record.module_id.clone(), p.id().to_string()))
        .collect();
    assert_eq!(keys.len(), WORKERS * STEPS);
    assert!(plugins.iter().all(|p| p.outcome() == Outcome::Success));
    assert!(plugins.iter().all(|p| p.record.duration.is_some()));
}

#[test]
fn test_racing_ends_complete_once() {
    for _ in 0..20 {
        let session = Arc::new(SessionMetrics::default());
        let tracker = Arc::new(ExecutionTracker::new(Arc::clone(&session)));
        let _ = tracker.begin(MetricKind::Plugin, "surefire:test", "core").unwrap();

        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    tracker
                        .end(MetricKind::Plugin, "surefire:test", "core", Completion::Success)
                        .unwrap()
                })
            })
            .collect();
        let measured = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();

        assert_eq!(measured, 1);
        assert_eq!(session.plugins().len(), 1);
    }
}

#[test]
fn test_same_step_on_many_subjects_is_independent() {
    let session = Arc::new(SessionMetrics::default());
    let tracker = Arc::new(ExecutionTracker::new(Arc::clone(&session)));

    for worker in 0..WORKERS {
        let _ = tracker
            .begin(MetricKind::Test, "compiler:compile", &format!("m{}", worker))
            .unwrap();
    }
    assert_eq!(tracker.pending_count(), WORKERS);

    let handles: Vec<_> = (0..WORKERS)
        .rev()
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let completion = if worker % 2 == 0 {
                    Completion::Success
                } else {
                    Completion::Failure("boom".into())
                };
                tracker
                    .end(MetricKind::Test, "compiler:compile", &format!("m{}", worker), completion)
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_some());
    }

    let tests = session.tests();
    assert_eq!(tests.len(), WORKERS);
    assert_eq!(
        tests.iter().filter(|t| t.outcome().is_failure()).count(),
        WORKERS / 2
    );
}

#[test]
fn test_unmatched_ends_and_abandoned_begins() {
    let session = Arc::new(SessionMetrics::default());
    let tracker = ExecutionTracker::new(Arc::clone(&session));

    assert_eq!(
        tracker
            .end(MetricKind::Artifact, "resolve", "g:a:1.0", Completion::Success)
            .unwrap(),
        None
    );
    let _ = tracker.begin(MetricKind::Artifact, "download", "g:b:2.0").unwrap();
    assert_eq!(tracker.finish(), 1);

    let outcomes: Vec<_> = session.artifacts().iter().map(Metric::outcome).collect();
    assert_eq!(outcomes, vec![Outcome::UnknownStart, Outcome::Incomplete]);
}
