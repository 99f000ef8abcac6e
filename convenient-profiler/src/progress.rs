//! Compact console progress for quiet builds
//!
//! Each observed step prints one marker character. When the step changes to
//! one with a known short label that differs from the last label printed,
//! the label goes out first. A whole observation (compare, print, update)
//! runs inside one critical section that also owns the sink, so concurrent
//! workers can never interleave half-written labels.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Marker printed for every observation
pub const PROGRESS_MARKER: &str = ".";

/// Immutable mapping from step identifiers to short labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLabels {
    labels: HashMap<String, String>,
}

impl StepLabels {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the labels for the usual build goals
    pub fn standard() -> Self {
        [
            ("clean", "clean"),
            ("compiler:compile", "compile"),
            ("compiler:testCompile", "compile"),
            ("surefire:test", "unit-tests"),
            ("failsafe:integration-test", "integration-tests"),
            ("failsafe:verify", "verify"),
            ("javadoc:jar", "doc"),
            ("jar:jar", "package"),
            ("site:site", "site"),
            ("install:install", "install"),
            ("deploy:deploy", "deploy"),
        ]
        .into_iter()
        .collect()
    }

    /// Label for a step
    pub fn get(&self, step: &str) -> Option<&str> {
        self.labels.get(step).map(String::as_str)
    }

    /// Number of labelled steps
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether no step is labelled
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>, L: Into<String>> FromIterator<(S, L)> for StepLabels {
    fn from_iter<I: IntoIterator<Item = (S, L)>>(iter: I) -> Self {
        Self {
            labels: iter
                .into_iter()
                .map(|(step, label)| (step.into(), label.into()))
                .collect(),
        }
    }
}

struct CoalescerState<W> {
    sink: W,
    last_step: Option<String>,
    last_label: Option<String>,
}

/// Thread-safe progress printer
pub struct ProgressCoalescer<W: Write + Send = io::Stdout> {
    labels: Arc<StepLabels>,
    state: Mutex<CoalescerState<W>>,
}

impl ProgressCoalescer<io::Stdout> {
    /// Coalescer printing to standard output
    pub fn stdout(labels: Arc<StepLabels>) -> Self {
        Self::new(labels, io::stdout())
    }
}

impl<W: Write + Send> ProgressCoalescer<W> {
    /// Coalescer printing to `sink`
    pub fn new(labels: Arc<StepLabels>, sink: W) -> Self {
        Self {
            labels,
            state: Mutex::new(CoalescerState {
                sink,
                last_step: None,
                last_label: None,
            }),
        }
    }

    /// Record that `step` is running on `subject`.
    ///
    /// Write failures are logged and swallowed; progress output must never
    /// fail the build it reports on.
    pub fn observe(&self, step: &str, subject: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.print(&mut state, step) {
            warn!(step = %step, subject = %subject, error = %e, "Failed to print progress");
        }
    }

    fn print(&self, state: &mut CoalescerState<W>, step: &str) -> io::Result<()> {
        if state.last_step.as_deref() != Some(step)
            && let Some(label) = self.labels.get(step)
            && state.last_label.as_deref() != Some(label)
        {
            state.sink.write_all(label.as_bytes())?;
            state.last_label = Some(label.to_string());
        }
        state.sink.write_all(PROGRESS_MARKER.as_bytes())?;
        state.sink.flush()?;
        if state.last_step.as_deref() != Some(step) {
            state.last_step = Some(step.to_string());
        }
        Ok(())
    }

    /// Label printed most recently
    pub fn last_label(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_label
            .clone()
    }

    /// Give back the sink
    pub fn into_sink(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
    }
}

impl<W: Write + Send> fmt::Debug for ProgressCoalescer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCoalescer")
            .field("labels", &self.labels.len())
            .field("last_label", &self.last_label())
            .finish()
    }
}
