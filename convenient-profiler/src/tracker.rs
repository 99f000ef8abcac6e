//! Pairs begin/end notifications from concurrent build workers
//!
//! Pending entries live in a sharded map keyed by `(subject, step)`, so
//! unrelated subjects never wait on each other. Each key moves through
//! `Running -> Closed`; a new begin reopens it. Completed records are handed
//! to the session, whose per-collection locks keep the order in which `end`
//! calls finished.
//!
//! Closed entries are not removed. They stay in the map for the life of the
//! tracker so that a late second `end` is still recognised as a duplicate,
//! which means memory grows with the number of distinct keys seen.

use crate::error::{Mismatch, ProfilerError, ProfilerResult};
use crate::model::{MetricKind, MetricRecord, Outcome};
use crate::session::SessionMetrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a step ended, as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The step succeeded
    Success,
    /// The step failed with the given cause
    Failure(String),
}

impl Completion {
    fn into_parts(self) -> (Outcome, Option<String>) {
        match self {
            Self::Success => (Outcome::Success, None),
            Self::Failure(cause) => (Outcome::Failure, Some(cause)),
        }
    }
}

/// Receipt for a registered begin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginToken {
    /// Monotonic number of this begin across the tracker
    pub generation: u64,
    /// Wall-clock start recorded for the step
    pub start_time: DateTime<Utc>,
    /// Whether a running entry for the same key was replaced
    pub restarted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StepKey {
    subject: String,
    step: String,
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.step, self.subject)
    }
}

#[derive(Debug)]
enum EntryState {
    Running {
        kind: MetricKind,
        started: Instant,
        start_time: DateTime<Utc>,
    },
    Closed,
}

enum Resolution {
    Completed {
        started: Instant,
        start_time: DateTime<Utc>,
    },
    Mismatch(Mismatch),
}

/// Tracks running steps and feeds completed ones into a session
#[derive(Debug)]
pub struct ExecutionTracker {
    session: Arc<SessionMetrics>,
    entries: DashMap<StepKey, EntryState>,
    generation: AtomicU64,
}

fn validate(what: &str, value: &str) -> ProfilerResult<()> {
    if value.trim().is_empty() {
        return Err(ProfilerError::InvalidArgument(format!("{} must not be empty", what)));
    }
    if value.chars().any(char::is_control) {
        return Err(ProfilerError::InvalidArgument(format!(
            "{} contains control characters: {:?}",
            what, value
        )));
    }
    Ok(())
}

impl ExecutionTracker {
    /// Tracker feeding the given session
    pub fn new(session: Arc<SessionMetrics>) -> Self {
        Self {
            session,
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Session receiving completed records
    pub fn session(&self) -> &Arc<SessionMetrics> {
        &self.session
    }

    /// Register the start of `step` on `subject`.
    ///
    /// A begin for a key that is already running replaces it: the step is
    /// treated as restarted (builds may retry a step).
    pub fn begin(&self, kind: MetricKind, step: &str, subject: &str) -> ProfilerResult<BeginToken> {
        validate("step", step)?;
        validate("subject", subject)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let start_time = Utc::now();
        let key = StepKey {
            subject: subject.to_string(),
            step: step.to_string(),
        };
        let previous = self.entries.insert(
            key,
            EntryState::Running {
                kind,
                started: Instant::now(),
                start_time,
            },
        );
        let restarted = matches!(previous, Some(EntryState::Running { .. }));
        if restarted {
            debug!(step = %step, subject = %subject, "Step restarted before it ended");
        }

        Ok(BeginToken {
            generation,
            start_time,
            restarted,
        })
    }

    /// Register the end of `step` on `subject`.
    ///
    /// Returns the measured duration when a matching begin was found. An end
    /// without a begin still produces a record (outcome `unknown-start`, no
    /// duration); a second end for the same key is ignored. Neither case is
    /// an error.
    pub fn end(
        &self,
        kind: MetricKind,
        step: &str,
        subject: &str,
        completion: Completion,
    ) -> ProfilerResult<Option<Duration>> {
        validate("step", step)?;
        validate("subject", subject)?;

        let key = StepKey {
            subject: subject.to_string(),
            step: step.to_string(),
        };

        // The shard lock is held only while the entry state flips.
        let resolution = match self.entries.entry(key) {
            Entry::Occupied(mut entry) => match entry.get() {
                EntryState::Running {
                    started,
                    start_time,
                    ..
                } => {
                    let resolution = Resolution::Completed {
                        started: *started,
                        start_time: *start_time,
                    };
                    let _ = entry.insert(EntryState::Closed);
                    resolution
                }
                EntryState::Closed => Resolution::Mismatch(Mismatch::DuplicateEnd),
            },
            Entry::Vacant(entry) => {
                let _ = entry.insert(EntryState::Closed);
                Resolution::Mismatch(Mismatch::MissingBegin)
            }
        };

        let (outcome, cause) = completion.into_parts();
        match resolution {
            Resolution::Completed {
                started,
                start_time,
            } => {
                let duration = started.elapsed();
                let record = MetricRecord {
                    id: step.to_string(),
                    module_id: Some(subject.to_string()),
                    start_time,
                    duration: Some(duration),
                    outcome,
                    cause,
                };
                debug!(
                    step = %step,
                    subject = %subject,
                    kind = %kind,
                    duration_ms = %duration.as_millis(),
                    outcome = %outcome,
                    "Step completed"
                );
                self.session.record(kind, record);
                Ok(Some(duration))
            }
            Resolution::Mismatch(Mismatch::MissingBegin) => {
                warn!(
                    step = %step,
                    subject = %subject,
                    mismatch = %Mismatch::MissingBegin,
                    "Recording step with unknown start"
                );
                let record = MetricRecord {
                    id: step.to_string(),
                    module_id: Some(subject.to_string()),
                    start_time: Utc::now(),
                    duration: None,
                    outcome: Outcome::UnknownStart,
                    cause,
                };
                self.session.record(kind, record);
                Ok(None)
            }
            Resolution::Mismatch(Mismatch::DuplicateEnd) => {
                warn!(
                    step = %step,
                    subject = %subject,
                    mismatch = %Mismatch::DuplicateEnd,
                    "Ignoring step end"
                );
                Ok(None)
            }
        }
    }

    /// Number of steps begun but not yet ended
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.value(), EntryState::Running { .. }))
            .count()
    }

    /// Close every step that is still running with outcome `incomplete`.
    ///
    /// Returns how many records were written. Used at session finalization,
    /// which must not wait for steps that will never end.
    pub fn finish(&self) -> usize {
        let mut abandoned = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if matches!(entry.value(), EntryState::Running { .. }) {
                let state = std::mem::replace(entry.value_mut(), EntryState::Closed);
                abandoned.push((entry.key().clone(), state));
            }
        }

        let count = abandoned.len();
        for (key, state) in abandoned {
            if let EntryState::Running {
                kind, start_time, ..
            } = state
            {
                warn!(step = %key.step, subject = %key.subject, "Step never ended");
                let record = MetricRecord {
                    id: key.step,
                    module_id: Some(key.subject),
                    start_time,
                    duration: None,
                    outcome: Outcome::Incomplete,
                    cause: None,
                };
                self.session.record(kind, record);
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use std::thread;
    use tracing_test::traced_test;

    fn tracker() -> ExecutionTracker {
        ExecutionTracker::new(Arc::new(SessionMetrics::default()))
    }

    #[test]
    fn test_begin_end_pairing() {
        let tracker = tracker();
        let token = tracker
            .begin(MetricKind::Plugin, "compiler:compile", "moduleA")
            .unwrap();
        assert!(!token.restarted);
        assert_eq!(tracker.pending_count(), 1);

        thread::sleep(Duration::from_millis(120));
        let duration = tracker
            .end(MetricKind::Plugin, "compiler:compile", "moduleA", Completion::Success)
            .unwrap()
            .unwrap();
        assert!(duration >= Duration::from_millis(120));
        assert!(duration < Duration::from_secs(5));
        assert_eq!(tracker.pending_count(), 0);

        let plugins = tracker.session().plugins();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].outcome(), Outcome::Success);
        assert_eq!(plugins[0].duration(), duration);
        assert_eq!(plugins[0].record.module_id.as_deref(), Some("moduleA"));
        assert_eq!(plugins[0].record.start_time, token.start_time);
    }

    #[traced_test]
    #[test]
    fn test_end_without_begin() {
        let tracker = tracker();
        let duration = tracker
            .end(
                MetricKind::Test,
                "test",
                "moduleB",
                Completion::Failure("AssertionError".to_string()),
            )
            .unwrap();
        assert_eq!(duration, None);

        let tests = tracker.session().tests();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].outcome(), Outcome::UnknownStart);
        assert_eq!(tests[0].record.cause.as_deref(), Some("AssertionError"));
        assert_eq!(tests[0].record.duration, None);
        assert!(logs_contain("end without matching begin"));
    }

    #[traced_test]
    #[test]
    fn test_duplicate_end_is_noop() {
        let tracker = tracker();
        let _ = tracker.begin(MetricKind::Plugin, "jar:jar", "core").unwrap();
        assert!(
            tracker
                .end(MetricKind::Plugin, "jar:jar", "core", Completion::Success)
                .unwrap()
                .is_some()
        );
        assert_eq!(
            tracker
                .end(MetricKind::Plugin, "jar:jar", "core", Completion::Success)
                .unwrap(),
            None
        );
        assert_eq!(tracker.session().plugins().len(), 1);
        assert!(logs_contain("duplicate end"));
    }

    #[test]
    fn test_duplicate_begin_restarts() {
        let tracker = tracker();
        let first = tracker.begin(MetricKind::Plugin, "surefire:test", "core").unwrap();
        thread::sleep(Duration::from_millis(50));
        let second = tracker.begin(MetricKind::Plugin, "surefire:test", "core").unwrap();
        assert!(second.restarted);
        assert!(second.generation > first.generation);
        assert_eq!(tracker.pending_count(), 1);

        let duration = tracker
            .end(MetricKind::Plugin, "surefire:test", "core", Completion::Success)
            .unwrap()
            .unwrap();
        assert!(duration < Duration::from_millis(50) + Duration::from_secs(2));
        let plugins = tracker.session().plugins();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].record.start_time, second.start_time);
    }

    #[test]
    fn test_begin_after_close_reopens_key() {
        let tracker = tracker();
        for _ in 0..2 {
            let _ = tracker.begin(MetricKind::Plugin, "clean", "core").unwrap();
            assert!(
                tracker
                    .end(MetricKind::Plugin, "clean", "core", Completion::Success)
                    .unwrap()
                    .is_some()
            );
        }
        assert_eq!(tracker.session().plugins().len(), 2);
    }

    #[test]
    fn test_closed_keys_stay_after_finish() {
        let tracker = tracker();
        let _ = tracker.begin(MetricKind::Plugin, "deploy:deploy", "app").unwrap();
        let _ = tracker.begin(MetricKind::Plugin, "clean", "app").unwrap();
        let _ = tracker
            .end(MetricKind::Plugin, "clean", "app", Completion::Success)
            .unwrap();
        assert_eq!(tracker.finish(), 1);
        assert_eq!(tracker.entries.len(), 2);

        assert_eq!(
            tracker
                .end(MetricKind::Plugin, "deploy:deploy", "app", Completion::Success)
                .unwrap(),
            None
        );
        assert_eq!(tracker.session().plugins().len(), 2);
        assert_eq!(tracker.entries.len(), 2);
    }

    #[test]
    fn test_invalid_identifiers() {
        let tracker = tracker();
        assert!(matches!(
            tracker.begin(MetricKind::Plugin, "", "core"),
            Err(ProfilerError::InvalidArgument(_))
        ));
        assert!(matches!(
            tracker.end(MetricKind::Plugin, "clean", "  ", Completion::Success),
            Err(ProfilerError::InvalidArgument(_))
        ));
        assert!(tracker.begin(MetricKind::Plugin, "clean\n", "core").is_err());
        assert_eq!(tracker.pending_count(), 0);
        assert!(tracker.session().plugins().is_empty());
    }

    #[test]
    fn test_finish_marks_incomplete() {
        let tracker = tracker();
        let _ = tracker.begin(MetricKind::Plugin, "install:install", "app").unwrap();
        let _ = tracker.begin(MetricKind::Artifact, "resolve", "com.acme:lib:1.0").unwrap();
        let _ = tracker.begin(MetricKind::Plugin, "clean", "app").unwrap();
        let _ = tracker
            .end(MetricKind::Plugin, "clean", "app", Completion::Success)
            .unwrap();

        assert_eq!(tracker.finish(), 2);
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.finish(), 0);

        let plugins = tracker.session().plugins();
        assert_eq!(plugins.len(), 2);
        assert!(
            plugins
                .iter()
                .any(|p| p.goal == "install:install" && p.outcome() == Outcome::Incomplete)
        );
        assert_eq!(tracker.session().artifacts()[0].outcome(), Outcome::Incomplete);
    }
}
