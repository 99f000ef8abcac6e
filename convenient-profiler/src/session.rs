//! Aggregate root holding every metric collected during one build session
//!
//! Collections are append-only: every `add_*` call extends what is already
//! there, so sub-aggregators can report in any number of times. Each
//! collection sits behind its own lock, which makes that lock the single
//! serialization point for appends of that kind; there is no lock spanning
//! the whole aggregate.
//!
//! Trimmed views are computed on read and never touch stored data, so the
//! verbosity flag can be flipped after capture without losing anything.

use crate::codec::{self, Compression};
use crate::error::{ProfilerError, ProfilerResult};
use crate::model::{
    ArtifactMetrics, DependencyMetrics, HostInfo, LifecycleMetrics, Metric, MetricKind,
    MetricRecord, ModuleIndex, ModuleMetrics, PluginMetrics, ProcessInfo, TestMetrics,
    TrendMetrics,
};
use crate::resource::Resource;
use crate::series::SeriesStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Schema version written by this build
pub const PAYLOAD_VERSION: u32 = 2;

/// Artifacts at or below this duration are hidden from the trimmed view
pub const ARTIFACT_TRIM_FLOOR: Duration = Duration::from_millis(5);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Modules {
    list: Vec<ModuleMetrics>,
    by_id: HashMap<String, usize>,
}

impl Modules {
    fn lookup(&self, id: &str) -> Option<ModuleIndex> {
        self.by_id.get(id).copied().map(ModuleIndex)
    }
}

/// Metrics of one build session
#[derive(Debug)]
pub struct SessionMetrics {
    id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    goals: Vec<String>,
    host: Option<HostInfo>,
    process: Option<ProcessInfo>,
    verbose: AtomicBool,

    modules: RwLock<Modules>,
    artifacts: RwLock<Vec<ArtifactMetrics>>,
    dependencies: RwLock<Vec<DependencyMetrics>>,
    plugins: RwLock<Vec<PluginMetrics>>,
    tests: RwLock<Vec<TestMetrics>>,
    trends: RwLock<Vec<TrendMetrics>>,
    lifecycle_events: RwLock<Vec<LifecycleMetrics>>,

    // Set once, while holding the `tests` write lock
    tests_linked: AtomicBool,
    link_passes: AtomicUsize,

    system_properties: RwLock<BTreeMap<String, String>>,
    process_metrics: SeriesStore,
    host_metrics: SeriesStore,
    logs: RwLock<Option<String>>,
}

impl SessionMetrics {
    /// Empty session starting now on the current host
    pub fn new(goals: Vec<String>) -> Self {
        let mut session = Self::blank(Uuid::new_v4(), Utc::now());
        session.goals = goals;
        session.host = Some(HostInfo::capture());
        session.process = Some(ProcessInfo::capture());
        session
    }

    fn blank(id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            ended_at: RwLock::new(None),
            goals: Vec::new(),
            host: None,
            process: None,
            verbose: AtomicBool::new(false),
            modules: RwLock::default(),
            artifacts: RwLock::default(),
            dependencies: RwLock::default(),
            plugins: RwLock::default(),
            tests: RwLock::default(),
            trends: RwLock::default(),
            lifecycle_events: RwLock::default(),
            tests_linked: AtomicBool::new(false),
            link_passes: AtomicUsize::new(0),
            system_properties: RwLock::default(),
            process_metrics: SeriesStore::new(),
            host_metrics: SeriesStore::new(),
            logs: RwLock::new(None),
        }
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the session started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the session was closed, if it was
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *read(&self.ended_at)
    }

    /// Wall-clock time between start and close (or now, while open)
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at().unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Mark the session as finished; the first call wins
    pub fn close(&self) {
        let mut ended = write(&self.ended_at);
        if ended.is_none() {
            *ended = Some(Utc::now());
            info!(session = %self.id, "Session closed");
        }
    }

    /// Goals requested for this session
    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    /// Host the session ran on
    pub fn host(&self) -> Option<&HostInfo> {
        self.host.as_ref()
    }

    /// Process the session ran in
    pub fn process(&self) -> Option<&ProcessInfo> {
        self.process.as_ref()
    }

    /// Whether retrieval returns untrimmed collections
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Switch between trimmed and full views
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    // ---- modules ----

    /// Register a reactor module; registering the same id again is ignored
    pub fn add_module(&self, module: ModuleMetrics) -> ModuleIndex {
        let mut modules = write(&self.modules);
        if let Some(index) = modules.lookup(&module.id) {
            return index;
        }
        let index = modules.list.len();
        let _ = modules.by_id.insert(module.id.clone(), index);
        modules.list.push(module);
        ModuleIndex(index)
    }

    /// All registered modules
    pub fn modules(&self) -> Vec<ModuleMetrics> {
        read(&self.modules).list.clone()
    }

    /// Module registered under `id`
    pub fn get_module(&self, id: &str) -> Option<ModuleMetrics> {
        let modules = read(&self.modules);
        modules.lookup(id).map(|index| modules.list[index.0].clone())
    }

    /// Module at a resolved index
    pub fn module_at(&self, index: ModuleIndex) -> Option<ModuleMetrics> {
        read(&self.modules).list.get(index.0).cloned()
    }

    // ---- collections ----

    /// Append artifacts
    pub fn add_artifacts(&self, artifacts: impl IntoIterator<Item = ArtifactMetrics>) {
        write(&self.artifacts).extend(artifacts);
    }

    /// Append one artifact
    pub fn add_artifact(&self, artifact: ArtifactMetrics) {
        write(&self.artifacts).push(artifact);
    }

    /// Every artifact, regardless of verbosity
    pub fn artifacts(&self) -> Vec<ArtifactMetrics> {
        read(&self.artifacts).clone()
    }

    /// Artifacts as shown in reports: everything when verbose, otherwise
    /// only those slower than [`ARTIFACT_TRIM_FLOOR`]
    pub fn trimmed_artifacts(&self) -> Vec<ArtifactMetrics> {
        let artifacts = read(&self.artifacts);
        if self.is_verbose() {
            artifacts.clone()
        } else {
            artifacts
                .iter()
                .filter(|a| a.duration() > ARTIFACT_TRIM_FLOOR)
                .cloned()
                .collect()
        }
    }

    /// Append dependencies
    pub fn add_dependencies(&self, dependencies: impl IntoIterator<Item = DependencyMetrics>) {
        write(&self.dependencies).extend(dependencies);
    }

    /// Append one dependency
    pub fn add_dependency(&self, dependency: DependencyMetrics) {
        write(&self.dependencies).push(dependency);
    }

    /// Every dependency
    pub fn dependencies(&self) -> Vec<DependencyMetrics> {
        read(&self.dependencies).clone()
    }

    /// Append plugin executions
    pub fn add_plugins(&self, plugins: impl IntoIterator<Item = PluginMetrics>) {
        write(&self.plugins).extend(plugins);
    }

    /// Append one plugin execution
    pub fn add_plugin(&self, plugin: PluginMetrics) {
        write(&self.plugins).push(plugin);
    }

    /// Every plugin execution
    pub fn plugins(&self) -> Vec<PluginMetrics> {
        read(&self.plugins).clone()
    }

    /// Append tests.
    ///
    /// Tests added after the linking pass already ran are linked on the way
    /// in, so the pass itself never has to run again.
    pub fn add_tests(&self, tests: impl IntoIterator<Item = TestMetrics>) {
        let mut stored = write(&self.tests);
        if self.tests_linked.load(Ordering::Acquire) {
            let modules = read(&self.modules);
            stored.extend(tests.into_iter().map(|mut test| {
                Self::link_test(&modules, &mut test);
                test
            }));
        } else {
            stored.extend(tests);
        }
    }

    /// Append one test
    pub fn add_test(&self, test: TestMetrics) {
        self.add_tests(std::iter::once(test));
    }

    /// Every test, with owning modules resolved.
    ///
    /// The first call runs the linking pass; later calls only read.
    pub fn tests(&self) -> Vec<TestMetrics> {
        if !self.tests_linked.load(Ordering::Acquire) {
            let mut tests = write(&self.tests);
            if !self.tests_linked.load(Ordering::Acquire) {
                let modules = read(&self.modules);
                for test in tests.iter_mut() {
                    Self::link_test(&modules, test);
                }
                let _ = self.link_passes.fetch_add(1, Ordering::Relaxed);
                self.tests_linked.store(true, Ordering::Release);
                debug!(tests = tests.len(), "Linked tests to modules");
            }
        }
        read(&self.tests).clone()
    }

    /// How many times the linking pass ran (at most once)
    pub fn link_passes(&self) -> usize {
        self.link_passes.load(Ordering::Relaxed)
    }

    fn link_test(modules: &Modules, test: &mut TestMetrics) {
        if test.module.is_none()
            && let Some(module_id) = test.record.module_id.as_deref()
        {
            test.module = modules.lookup(module_id);
        }
    }

    /// Append trend entries
    pub fn add_trends(&self, trends: impl IntoIterator<Item = TrendMetrics>) {
        write(&self.trends).extend(trends);
    }

    /// Append one trend entry
    pub fn add_trend(&self, trend: TrendMetrics) {
        write(&self.trends).push(trend);
    }

    /// Every trend entry
    pub fn trends(&self) -> Vec<TrendMetrics> {
        read(&self.trends).clone()
    }

    /// Append lifecycle events
    pub fn add_lifecycle_events(&self, events: impl IntoIterator<Item = LifecycleMetrics>) {
        write(&self.lifecycle_events).extend(events);
    }

    /// Append one lifecycle event
    pub fn add_lifecycle_event(&self, event: LifecycleMetrics) {
        write(&self.lifecycle_events).push(event);
    }

    /// Every lifecycle event
    pub fn lifecycle_events(&self) -> Vec<LifecycleMetrics> {
        read(&self.lifecycle_events).clone()
    }

    /// Route a completed record to the collection of its kind
    pub fn record(&self, kind: MetricKind, record: MetricRecord) {
        match kind {
            MetricKind::Artifact => self.add_artifact(record.into()),
            MetricKind::Dependency => self.add_dependency(record.into()),
            MetricKind::Plugin => self.add_plugin(record.into()),
            MetricKind::Test => self.add_test(record.into()),
            MetricKind::Trend => self.add_trend(record.into()),
            MetricKind::Lifecycle => self.add_lifecycle_event(record.into()),
        }
    }

    /// Number of records per collection
    pub fn counts(&self) -> BTreeMap<MetricKind, usize> {
        BTreeMap::from([
            (MetricKind::Artifact, read(&self.artifacts).len()),
            (MetricKind::Dependency, read(&self.dependencies).len()),
            (MetricKind::Plugin, read(&self.plugins).len()),
            (MetricKind::Test, read(&self.tests).len()),
            (MetricKind::Trend, read(&self.trends).len()),
            (MetricKind::Lifecycle, read(&self.lifecycle_events).len()),
        ])
    }

    // ---- environment ----

    /// Merge system properties; later values replace earlier ones
    pub fn set_system_properties(&self, properties: impl IntoIterator<Item = (String, String)>) {
        write(&self.system_properties).extend(properties);
    }

    /// Captured system properties
    pub fn system_properties(&self) -> BTreeMap<String, String> {
        read(&self.system_properties).clone()
    }

    /// Samples of the build process (memory, CPU, threads)
    pub fn process_metrics(&self) -> &SeriesStore {
        &self.process_metrics
    }

    /// Samples of the host (load, free memory)
    pub fn host_metrics(&self) -> &SeriesStore {
        &self.host_metrics
    }

    /// Store the captured log output; only the first call has an effect
    pub fn set_logs(&self, logs: impl Into<String>) -> bool {
        let mut stored = write(&self.logs);
        if stored.is_some() {
            warn!(session = %self.id, "Logs already captured, ignoring");
            return false;
        }
        *stored = Some(logs.into());
        true
    }

    /// Captured log output
    pub fn logs(&self) -> Option<String> {
        read(&self.logs).clone()
    }

    // ---- persistence ----

    fn to_payload(&self) -> SessionPayload {
        SessionPayload {
            version: PAYLOAD_VERSION,
            id: Some(self.id),
            started_at: Some(self.started_at),
            ended_at: self.ended_at(),
            goals: self.goals.clone(),
            host: self.host.clone(),
            process: self.process.clone(),
            modules: self.modules(),
            artifacts: self.artifacts(),
            dependencies: self.dependencies(),
            plugins: self.plugins(),
            tests: read(&self.tests).clone(),
            trends: self.trends(),
            lifecycle_events: self.lifecycle_events(),
            system_properties: self.system_properties(),
            process_metrics: self.process_metrics.clone(),
            host_metrics: self.host_metrics.clone(),
            logs: self.logs(),
        }
    }

    fn from_payload(payload: SessionPayload) -> Self {
        let mut session = Self::blank(
            payload.id.unwrap_or_else(Uuid::new_v4),
            payload.started_at.unwrap_or_else(Utc::now),
        );
        session.goals = payload.goals;
        session.host = payload.host;
        session.process = payload.process;
        *write(&session.ended_at) = payload.ended_at;
        for module in payload.modules {
            let _ = session.add_module(module);
        }
        session.add_artifacts(payload.artifacts);
        session.add_dependencies(payload.dependencies);
        session.add_plugins(payload.plugins);
        session.add_tests(payload.tests);
        session.add_trends(payload.trends);
        session.add_lifecycle_events(payload.lifecycle_events);
        session.set_system_properties(payload.system_properties);
        session.process_metrics = payload.process_metrics;
        session.host_metrics = payload.host_metrics;
        *write(&session.logs) = payload.logs;
        session
    }

    /// Encode the whole session
    pub fn to_bytes(&self, compression: Compression) -> ProfilerResult<Vec<u8>> {
        let json = serde_json::to_vec(&self.to_payload())?;
        codec::compress(&json, compression).map_err(|e| ProfilerError::CorruptPayload(e.to_string()))
    }

    /// Decode a session written by any supported version
    pub fn from_bytes(bytes: &[u8]) -> ProfilerResult<Self> {
        let json = codec::decompress(bytes).map_err(|e| ProfilerError::CorruptPayload(e.to_string()))?;
        let value: serde_json::Value = serde_json::from_slice(&json)?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ProfilerError::CorruptPayload("missing payload version".to_string()))?;
        let version = u32::try_from(version).unwrap_or(u32::MAX);
        if version == 0 || version > PAYLOAD_VERSION {
            return Err(ProfilerError::UnsupportedVersion {
                found: version,
                supported: PAYLOAD_VERSION,
            });
        }
        let payload: SessionPayload = serde_json::from_value(value)?;
        Ok(Self::from_payload(payload))
    }

    /// Persist the session to a resource
    pub fn save(&self, resource: &dyn Resource, compression: Compression) -> ProfilerResult<()> {
        let bytes = self.to_bytes(compression)?;
        let mut writer = resource
            .open_write()
            .map_err(|e| ProfilerError::storage(resource.id(), e))?;
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|e| ProfilerError::storage(resource.id(), e))?;
        info!(
            session = %self.id,
            resource = %resource.id(),
            bytes = bytes.len(),
            "Session metrics saved"
        );
        Ok(())
    }

    /// Load a session from a resource into a fresh instance
    pub fn load(resource: &dyn Resource) -> ProfilerResult<Self> {
        let mut bytes = Vec::new();
        let _ = resource
            .open_read()
            .and_then(|mut reader| reader.read_to_end(&mut bytes))
            .map_err(|e| ProfilerError::storage(resource.id(), e))?;
        let session = Self::from_bytes(&bytes)?;
        debug!(session = %session.id, resource = %resource.id(), "Session metrics loaded");
        Ok(session)
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Display for SessionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let logs = self
            .logs()
            .map(|l| l.len().to_string())
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "SessionMetrics[id={}, modules={}, artifacts={}, dependencies={}, plugins={}, tests={}, log={}]",
            self.id,
            read(&self.modules).list.len(),
            read(&self.artifacts).len(),
            read(&self.dependencies).len(),
            read(&self.plugins).len(),
            read(&self.tests).len(),
            logs
        )
    }
}

/// Persisted form of a session.
///
/// Everything but the version is optional so that payloads written before a
/// field existed still load; unknown fields from newer writers are ignored.
#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    version: u32,
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    goals: Vec<String>,
    #[serde(default)]
    host: Option<HostInfo>,
    #[serde(default)]
    process: Option<ProcessInfo>,
    #[serde(default)]
    modules: Vec<ModuleMetrics>,
    #[serde(default)]
    artifacts: Vec<ArtifactMetrics>,
    #[serde(default)]
    dependencies: Vec<DependencyMetrics>,
    #[serde(default)]
    plugins: Vec<PluginMetrics>,
    #[serde(default)]
    tests: Vec<TestMetrics>,
    #[serde(default)]
    trends: Vec<TrendMetrics>,
    // Since version 2
    #[serde(default)]
    lifecycle_events: Vec<LifecycleMetrics>,
    #[serde(default)]
    system_properties: BTreeMap<String, String>,
    #[serde(default)]
    process_metrics: SeriesStore,
    #[serde(default)]
    host_metrics: SeriesStore,
    #[serde(default)]
    logs: Option<String>,
}
