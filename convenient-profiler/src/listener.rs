//! Adapter between the host's step events and the profiler
//!
//! The host calls [`StepListener`] from whichever worker runs the step.
//! Nothing here may fail or panic the build: rejected events are logged and
//! dropped.

use crate::config::ProfilerConfig;
use crate::model::MetricKind;
use crate::progress::{ProgressCoalescer, StepLabels};
use crate::session::SessionMetrics;
use crate::tracker::{Completion, ExecutionTracker};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inbound step notifications
pub trait StepListener: Send + Sync {
    /// A step started on a subject
    fn on_step_start(&self, kind: MetricKind, step: &str, subject: &str);

    /// A step finished successfully
    fn on_step_success(&self, kind: MetricKind, step: &str, subject: &str);

    /// A step failed
    fn on_step_failure(&self, kind: MetricKind, step: &str, subject: &str, cause: &str);
}

/// Listener that tracks steps and prints progress according to the config
#[derive(Debug)]
pub struct ProfilerListener<W: Write + Send = io::Stdout> {
    config: ProfilerConfig,
    tracker: ExecutionTracker,
    progress: Option<ProgressCoalescer<W>>,
}

impl ProfilerListener<io::Stdout> {
    /// Listener printing progress to standard output
    pub fn new(config: ProfilerConfig, session: Arc<SessionMetrics>) -> Self {
        Self::with_sink(config, session, Arc::new(StepLabels::standard()), io::stdout())
    }
}

impl<W: Write + Send> ProfilerListener<W> {
    /// Listener printing progress to `sink`
    pub fn with_sink(
        config: ProfilerConfig,
        session: Arc<SessionMetrics>,
        labels: Arc<StepLabels>,
        sink: W,
    ) -> Self {
        session.set_verbose(config.verbose);
        let progress = config
            .quiet_with_progress()
            .then(|| ProgressCoalescer::new(labels, sink));
        Self {
            config,
            tracker: ExecutionTracker::new(session),
            progress,
        }
    }

    /// Resolved configuration
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Underlying tracker
    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Session being populated
    pub fn session(&self) -> &Arc<SessionMetrics> {
        self.tracker.session()
    }

    /// Close steps that never ended and seal the session
    pub fn finish(&self) -> usize {
        let abandoned = self.tracker.finish();
        self.session().close();
        abandoned
    }

    /// Give back the progress sink, if progress was enabled
    pub fn into_progress_sink(self) -> Option<W> {
        self.progress.map(ProgressCoalescer::into_sink)
    }

    fn stop(&self, kind: MetricKind, step: &str, subject: &str, completion: Completion) {
        if !self.config.performance_enabled() {
            return;
        }
        match self.tracker.end(kind, step, subject, completion) {
            Ok(Some(duration)) if duration >= self.config.minimum_duration => {
                debug!(step = %step, subject = %subject, duration_ms = %duration.as_millis(), "Slow step");
            }
            Ok(_) => {}
            Err(e) => warn!(step = %step, subject = %subject, error = %e, "Dropping step end"),
        }
    }
}

impl<W: Write + Send> StepListener for ProfilerListener<W> {
    fn on_step_start(&self, kind: MetricKind, step: &str, subject: &str) {
        if !self.config.extension_enabled {
            return;
        }
        if self.config.performance_enabled()
            && let Err(e) = self.tracker.begin(kind, step, subject)
        {
            warn!(step = %step, subject = %subject, error = %e, "Dropping step start");
            return;
        }
        if let Some(progress) = &self.progress {
            progress.observe(step, subject);
        }
    }

    fn on_step_success(&self, kind: MetricKind, step: &str, subject: &str) {
        self.stop(kind, step, subject, Completion::Success);
    }

    fn on_step_failure(&self, kind: MetricKind, step: &str, subject: &str, cause: &str) {
        self.stop(kind, step, subject, Completion::Failure(cause.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Properties, keys};
    use crate::model::{Metric, Outcome};

    fn listener(props: &Properties) -> ProfilerListener<Vec<u8>> {
        ProfilerListener::with_sink(
            ProfilerConfig::resolve(props),
            Arc::new(SessionMetrics::default()),
            Arc::new(StepLabels::standard()),
            Vec::new(),
        )
    }

    #[test]
    fn test_events_reach_session() {
        let listener = listener(&Properties::new());
        listener.on_step_start(MetricKind::Plugin, "compiler:compile", "core");
        listener.on_step_success(MetricKind::Plugin, "compiler:compile", "core");
        listener.on_step_start(MetricKind::Plugin, "surefire:test", "core");
        listener.on_step_failure(MetricKind::Plugin, "surefire:test", "core", "2 tests failed");

        let plugins = listener.session().plugins();
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[1].outcome(), Outcome::Failure);
        assert_eq!(plugins[1].record.cause.as_deref(), Some("2 tests failed"));
        assert!(listener.into_progress_sink().is_none());
    }

    #[test]
    fn test_disabled_extension_ignores_events() {
        let mut props = Properties::new();
        let _ = props
            .set(keys::EXTENSION_ENABLED, "false")
            .set(keys::QUIET, "true");
        let listener = listener(&props);
        listener.on_step_start(MetricKind::Plugin, "clean", "core");
        listener.on_step_success(MetricKind::Plugin, "clean", "core");
        assert!(listener.session().plugins().is_empty());
        assert_eq!(listener.into_progress_sink(), Some(Vec::new()));
    }

    #[test]
    fn test_progress_when_quiet() {
        let mut props = Properties::new();
        let _ = props.set(keys::QUIET, "true");
        let listener = listener(&props);
        listener.on_step_start(MetricKind::Plugin, "compiler:compile", "modA");
        listener.on_step_success(MetricKind::Plugin, "compiler:compile", "modA");
        listener.on_step_start(MetricKind::Plugin, "surefire:test", "modA");

        assert_eq!(listener.finish(), 1);
        assert!(listener.session().ended_at().is_some());
        let out = listener.into_progress_sink().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "compile.unit-tests.");
    }

    #[test]
    fn test_invalid_event_is_dropped() {
        let listener = listener(&Properties::new());
        listener.on_step_start(MetricKind::Plugin, "", "core");
        listener.on_step_success(MetricKind::Plugin, "", "core");
        assert!(listener.session().plugins().is_empty());
    }

    #[test]
    fn test_verbose_flag_applied_to_session() {
        let mut props = Properties::new();
        let _ = props.set(keys::VERBOSE, "true");
        let listener = listener(&props);
        assert!(listener.session().is_verbose());
    }
}
