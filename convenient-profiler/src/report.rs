//! Human-readable summary of a finished session

use crate::config::ProfilerConfig;
use crate::model::{Metric, MetricKind, Outcome};
use crate::session::SessionMetrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Slowest plugin executions and artifacts kept in a summary
pub const SLOWEST_LIMIT: usize = 10;

/// One slow plugin execution or artifact resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlowStep {
    /// Plugin goal or artifact coordinate
    pub goal: String,
    /// Module it ran on
    pub module: Option<String>,
    /// How long it took
    pub duration: Duration,
    /// How it ended
    pub outcome: Outcome,
}

/// Aggregated view of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: String,
    /// Requested goals
    pub goals: Vec<String>,
    /// Modules in the reactor
    pub modules: usize,
    /// Records per collection
    pub counts: BTreeMap<MetricKind, usize>,
    /// Records whose outcome is a failure
    pub failures: usize,
    /// Records whose begin was never seen
    pub unknown_starts: usize,
    /// Records that never ended
    pub incomplete: usize,
    /// Wall-clock length of the session
    pub total_time: Duration,
    /// Plugin executions at or above the configured minimum, slowest first
    pub slowest: Vec<SlowStep>,
    /// Artifacts from the trimmed view, slowest first; short ones only when verbose
    pub slowest_artifacts: Vec<SlowStep>,
    /// Peak resident memory of the build process
    pub peak_rss_bytes: Option<f64>,
}

impl SessionSummary {
    /// Summarize `metrics`
    pub fn build(metrics: &SessionMetrics, config: &ProfilerConfig) -> Self {
        let mut summary = Self {
            session_id: metrics.id().to_string(),
            goals: metrics.goals().to_vec(),
            modules: metrics.modules().len(),
            counts: metrics.counts(),
            total_time: metrics.elapsed(),
            peak_rss_bytes: metrics.process_metrics().max(crate::sampler::PROCESS_RSS),
            ..Default::default()
        };

        let outcomes = metrics
            .artifacts()
            .iter()
            .map(Metric::outcome)
            .chain(metrics.dependencies().iter().map(Metric::outcome))
            .chain(metrics.tests().iter().map(Metric::outcome))
            .chain(metrics.lifecycle_events().iter().map(Metric::outcome))
            .collect::<Vec<_>>();

        let plugins = metrics.plugins();
        for outcome in outcomes.into_iter().chain(plugins.iter().map(Metric::outcome)) {
            match outcome {
                Outcome::Failure => summary.failures += 1,
                Outcome::UnknownStart => summary.unknown_starts += 1,
                Outcome::Incomplete => summary.incomplete += 1,
                Outcome::Pending | Outcome::Success => {}
            }
        }

        let slowest = plugins
            .into_iter()
            .filter_map(|plugin| {
                let duration = plugin.record.duration?;
                (duration >= config.minimum_duration).then(|| SlowStep {
                    goal: plugin.goal.clone(),
                    module: plugin.record.module_id.clone(),
                    duration,
                    outcome: plugin.outcome(),
                })
            });
        summary.slowest = slowest_of(slowest);
        summary.slowest_artifacts = slowest_of(
            metrics
                .trimmed_artifacts()
                .into_iter()
                .filter_map(|artifact| {
                    Some(SlowStep {
                        duration: artifact.record.duration?,
                        outcome: artifact.outcome(),
                        goal: artifact.record.id,
                        module: artifact.record.module_id,
                    })
                }),
        );

        summary
    }

    /// Total number of records across collections
    pub fn total_records(&self) -> usize {
        self.counts.values().sum()
    }
}

fn slowest_of(steps: impl Iterator<Item = SlowStep>) -> Vec<SlowStep> {
    let mut steps: Vec<_> = steps.collect();
    steps.sort_by(|a, b| b.duration.cmp(&a.duration));
    steps.truncate(SLOWEST_LIMIT);
    steps
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build Profile {}", self.session_id)?;
        writeln!(f, "───────────────────────────────────")?;
        if !self.goals.is_empty() {
            writeln!(f, "Goals:           {}", self.goals.join(" "))?;
        }
        writeln!(f, "Modules:         {}", self.modules)?;
        writeln!(f, "Records:         {}", self.total_records())?;
        for (kind, count) in &self.counts {
            writeln!(f, "  {:<14} {}", format!("{}:", kind), count)?;
        }
        writeln!(f, "  ❌ Failed:     {}", self.failures)?;
        if self.unknown_starts > 0 {
            writeln!(f, "  ❓ Unmatched:  {}", self.unknown_starts)?;
        }
        if self.incomplete > 0 {
            writeln!(f, "  ⏳ Incomplete: {}", self.incomplete)?;
        }
        writeln!(f)?;
        writeln!(f, "Total time:      {:.2}s", self.total_time.as_secs_f64())?;
        if let Some(rss) = self.peak_rss_bytes {
            writeln!(f, "Peak memory:     {:.1} MiB", rss / (1024.0 * 1024.0))?;
        }
        if !self.slowest.is_empty() {
            writeln!(f)?;
            writeln!(f, "Slowest steps")?;
            for step in &self.slowest {
                write!(f, "  {:>8.2}s  {}", step.duration.as_secs_f64(), step.goal)?;
                if let Some(module) = &step.module {
                    write!(f, " ({})", module)?;
                }
                if step.outcome.is_failure() {
                    write!(f, " FAILED")?;
                }
                writeln!(f)?;
            }
        }
        if !self.slowest_artifacts.is_empty() {
            writeln!(f)?;
            writeln!(f, "Slowest artifacts")?;
            for artifact in &self.slowest_artifacts {
                write!(f, "  {:>8}ms  {}", artifact.duration.as_millis(), artifact.goal)?;
                if artifact.outcome.is_failure() {
                    write!(f, " FAILED")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricRecord, PluginMetrics};

    fn plugin(goal: &str, module: &str, millis: u64, outcome: Outcome) -> PluginMetrics {
        MetricRecord::new(goal)
            .with_module(module)
            .completed(Duration::from_millis(millis), outcome, None)
            .into()
    }

    #[test]
    fn test_summary_counts_and_slowest() {
        let session = SessionMetrics::default();
        session.add_plugins([
            plugin("compiler:compile", "core", 1_500, Outcome::Success),
            plugin("resources:resources", "core", 20, Outcome::Success),
            plugin("surefire:test", "core", 4_000, Outcome::Failure),
        ]);
        session.record(MetricKind::Plugin, MetricRecord::new("jar:jar").with_module("core"));

        let summary = SessionSummary::build(&session, &ProfilerConfig::default());
        assert_eq!(summary.counts.get(&MetricKind::Plugin), Some(&4));
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.total_records(), 4);

        let goals: Vec<_> = summary.slowest.iter().map(|s| s.goal.as_str()).collect();
        assert_eq!(goals, vec!["surefire:test", "compiler:compile"]);
    }

    #[test]
    fn test_summary_display() {
        let session = SessionMetrics::default();
        session.add_plugin(plugin("surefire:test", "core", 2_000, Outcome::Failure));
        let text = SessionSummary::build(&session, &ProfilerConfig::default()).to_string();
        assert!(text.contains("Build Profile"));
        assert!(text.contains("surefire:test (core) FAILED"));
        assert!(text.contains("Failed:     1"));
    }

    #[test]
    fn test_empty_session() {
        let summary = SessionSummary::build(&SessionMetrics::default(), &ProfilerConfig::default());
        assert_eq!(summary.total_records(), 0);
        assert!(summary.slowest.is_empty());
        assert!(!summary.to_string().contains("Slowest steps"));
        assert!(summary.slowest_artifacts.is_empty());
    }

    #[test]
    fn test_verbose_shows_short_artifacts() {
        let session = SessionMetrics::default();
        for (id, millis) in [("org.example:util:1.0", 2), ("org.example:core:1.0", 40)] {
            session.add_artifact(
                MetricRecord::new(id)
                    .completed(Duration::from_millis(millis), Outcome::Success, None)
                    .into(),
            );
        }
        let config = ProfilerConfig::default();

        let summary = SessionSummary::build(&session, &config);
        let ids: Vec<_> = summary.slowest_artifacts.iter().map(|a| a.goal.as_str()).collect();
        assert_eq!(ids, vec!["org.example:core:1.0"]);
        let text = summary.to_string();
        assert!(text.contains("Slowest artifacts"));
        assert!(!text.contains("org.example:util:1.0"));

        session.set_verbose(true);
        let summary = SessionSummary::build(&session, &config);
        let ids: Vec<_> = summary.slowest_artifacts.iter().map(|a| a.goal.as_str()).collect();
        assert_eq!(ids, vec!["org.example:core:1.0", "org.example:util:1.0"]);
        assert!(summary.to_string().contains("        2ms  org.example:util:1.0"));
    }
}
