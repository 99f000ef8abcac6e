//! Metric records collected during a build session
//!
//! Every record kind shares the same [`MetricRecord`] core (identity, timing,
//! outcome, owning module) and adds a few kind-specific fields on top.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of a tracked step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Started, no end seen yet
    #[default]
    Pending,
    /// Completed successfully
    Success,
    /// Completed with a failure; the record carries the cause
    Failure,
    /// End seen without a matching begin (observer attached mid-step)
    UnknownStart,
    /// Never ended before the session was finalized
    Incomplete,
}

impl Outcome {
    /// Whether the step ended in a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::UnknownStart => write!(f, "unknown-start"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Collection a completed record is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Artifact resolution or production
    Artifact,
    /// Dependency resolution
    Dependency,
    /// Plugin goal execution
    Plugin,
    /// Test execution
    Test,
    /// Summary of an earlier session
    Trend,
    /// Lifecycle or extension event
    Lifecycle,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Artifact => "artifact",
            Self::Dependency => "dependency",
            Self::Plugin => "plugin",
            Self::Test => "test",
            Self::Trend => "trend",
            Self::Lifecycle => "lifecycle",
        };
        f.write_str(name)
    }
}

/// Identity, timing and outcome shared by all record kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Stable identifier of the subject (artifact coordinate, goal, test name)
    pub id: String,

    /// Owning reactor module, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,

    /// Wall-clock start
    pub start_time: DateTime<Utc>,

    /// Elapsed time; unset until the matching end arrives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    /// Outcome of the step
    #[serde(default)]
    pub outcome: Outcome,

    /// Failure cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl MetricRecord {
    /// New pending record starting now
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module_id: None,
            start_time: Utc::now(),
            duration: None,
            outcome: Outcome::Pending,
            cause: None,
        }
    }

    /// Attach the owning module
    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    /// Mark as completed
    pub fn completed(mut self, duration: Duration, outcome: Outcome, cause: Option<String>) -> Self {
        self.duration = Some(duration);
        self.outcome = outcome;
        self.cause = cause;
        self
    }

    /// Duration, or zero when unknown
    pub fn duration_or_zero(&self) -> Duration {
        self.duration.unwrap_or_default()
    }
}

/// Access to the shared core of a typed record
pub trait Metric {
    /// Shared identity and timing
    fn record(&self) -> &MetricRecord;

    /// Identifier of the subject
    fn id(&self) -> &str {
        &self.record().id
    }

    /// Duration, or zero when unknown
    fn duration(&self) -> Duration {
        self.record().duration_or_zero()
    }

    /// Outcome of the step
    fn outcome(&self) -> Outcome {
        self.record().outcome
    }
}

macro_rules! impl_metric {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Metric for $ty {
                fn record(&self) -> &MetricRecord {
                    &self.record
                }
            }
        )*
    };
}

/// Artifact resolved or produced during the build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    /// Shared core
    #[serde(flatten)]
    pub record: MetricRecord,
    /// Size of the artifact file, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl From<MetricRecord> for ArtifactMetrics {
    fn from(record: MetricRecord) -> Self {
        Self {
            record,
            size_bytes: None,
        }
    }
}

/// Dependency resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyMetrics {
    /// Shared core
    #[serde(flatten)]
    pub record: MetricRecord,
    /// Dependency scope (compile, runtime, test, ...)
    #[serde(default)]
    pub scope: String,
    /// Whether the dependency is optional
    #[serde(default)]
    pub optional: bool,
}

impl From<MetricRecord> for DependencyMetrics {
    fn from(record: MetricRecord) -> Self {
        Self {
            record,
            scope: "compile".to_string(),
            optional: false,
        }
    }
}

/// Plugin goal execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetrics {
    /// Shared core
    #[serde(flatten)]
    pub record: MetricRecord,
    /// Goal in `prefix:goal` form
    pub goal: String,
    /// Execution id, when the goal is bound more than once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl From<MetricRecord> for PluginMetrics {
    fn from(record: MetricRecord) -> Self {
        Self {
            goal: record.id.clone(),
            record,
            execution_id: None,
        }
    }
}

/// Index of a module inside its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleIndex(pub(crate) usize);

impl ModuleIndex {
    /// Position in the session's module list
    pub fn get(&self) -> usize {
        self.0
    }
}

/// Test case execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    /// Shared core
    #[serde(flatten)]
    pub record: MetricRecord,
    /// Suite (class) name
    #[serde(default)]
    pub suite: String,
    /// Resolved owning module; filled in by the session, never persisted
    #[serde(skip)]
    pub(crate) module: Option<ModuleIndex>,
}

impl TestMetrics {
    /// Resolved owning module, once the session linked it
    pub fn module(&self) -> Option<ModuleIndex> {
        self.module
    }
}

impl From<MetricRecord> for TestMetrics {
    fn from(record: MetricRecord) -> Self {
        let suite = record
            .id
            .rsplit_once('.')
            .map(|(suite, _)| suite.to_string())
            .unwrap_or_default();
        Self {
            record,
            suite,
            module: None,
        }
    }
}

/// Summary of an earlier session, used to plot trends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMetrics {
    /// Shared core
    #[serde(flatten)]
    pub record: MetricRecord,
    /// Total build time of that session
    #[serde(default)]
    pub build_duration: Duration,
    /// Whether that session failed
    #[serde(default)]
    pub failed: bool,
}

impl From<MetricRecord> for TrendMetrics {
    fn from(record: MetricRecord) -> Self {
        Self {
            build_duration: record.duration_or_zero(),
            failed: record.outcome.is_failure(),
            record,
        }
    }
}

/// Lifecycle or extension event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMetrics {
    /// Shared core
    #[serde(flatten)]
    pub record: MetricRecord,
    /// Event name
    #[serde(default)]
    pub event: String,
}

impl From<MetricRecord> for LifecycleMetrics {
    fn from(record: MetricRecord) -> Self {
        Self {
            event: record.id.clone(),
            record,
        }
    }
}

impl_metric!(
    ArtifactMetrics,
    DependencyMetrics,
    PluginMetrics,
    TestMetrics,
    TrendMetrics,
    LifecycleMetrics,
);

/// Reactor module taking part in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetrics {
    /// Module identifier (`group:artifact`)
    pub id: String,
    /// Display name
    pub name: String,
    /// Module version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ModuleMetrics {
    /// Module whose name equals its id
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: None,
        }
    }
}

/// Host the session ran on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name
    pub hostname: String,
    /// Logical CPUs
    pub cpu_count: usize,
    /// Operating system
    pub os: String,
}

impl HostInfo {
    /// Describe the current host
    pub fn capture() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            hostname,
            cpu_count: num_cpus::get(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

/// Process the session ran in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process id
    pub pid: u32,
    /// When the profiler attached
    pub started_at: DateTime<Utc>,
}

impl ProcessInfo {
    /// Describe the current process
    pub fn capture() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::UnknownStart.to_string(), "unknown-start");
        assert_eq!(
            serde_json::to_string(&Outcome::UnknownStart).unwrap(),
            "\"unknown-start\""
        );
    }

    #[test]
    fn test_typed_records_from_core() {
        let core = MetricRecord::new("com.acme.ParserTest.parsesEmpty")
            .with_module("com.acme:parser")
            .completed(Duration::from_millis(42), Outcome::Success, None);

        let test = TestMetrics::from(core.clone());
        assert_eq!(test.suite, "com.acme.ParserTest");
        assert_eq!(test.module(), None);
        assert_eq!(test.duration(), Duration::from_millis(42));

        let plugin = PluginMetrics::from(core.clone());
        assert_eq!(plugin.goal, core.id);

        let trend = TrendMetrics::from(core);
        assert_eq!(trend.build_duration, Duration::from_millis(42));
        assert!(!trend.failed);
    }

    #[test]
    fn test_flattened_record_json() {
        let artifact = ArtifactMetrics {
            record: MetricRecord::new("com.acme:parser:jar:1.0"),
            size_bytes: Some(1024),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["id"], "com.acme:parser:jar:1.0");
        assert_eq!(json["size_bytes"], 1024);
        assert!(json.get("duration").is_none());

        let back: ArtifactMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_host_capture() {
        let host = HostInfo::capture();
        assert!(host.cpu_count >= 1);
        assert!(!host.os.is_empty());
    }
}
