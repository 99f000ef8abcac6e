//! Periodic resource sampling into the session's time series
//!
//! Readings come from `/proc` and are only available on Linux; on other
//! platforms the sampler runs but appends nothing.

use crate::session::SessionMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Resident set size of the build process
pub const PROCESS_RSS: &str = "process.rss_bytes";
/// CPU time consumed by the build process
pub const PROCESS_CPU: &str = "process.cpu_seconds";
/// Thread count of the build process
pub const PROCESS_THREADS: &str = "process.threads";
/// One-minute load average of the host
pub const HOST_LOAD: &str = "host.load1";
/// Memory available on the host
pub const HOST_MEMORY_AVAILABLE: &str = "host.memory_available_bytes";

// Linux reports /proc/<pid>/stat times in USER_HZ ticks
const USER_HZ: f64 = 100.0;

/// Snapshot of one round of readings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSnapshot {
    /// Resident memory in bytes
    pub rss_bytes: Option<u64>,
    /// Threads in the process
    pub threads: Option<u64>,
    /// User + system CPU seconds
    pub cpu_seconds: Option<f64>,
    /// One-minute load average
    pub load1: Option<f64>,
    /// Available host memory in bytes
    pub memory_available_bytes: Option<u64>,
}

impl ResourceSnapshot {
    /// Read the current process and host state
    pub fn capture() -> Self {
        let mut snapshot = Self::default();
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            snapshot.rss_bytes = status_field(&status, "VmRSS:").map(|kb| kb * 1024);
            snapshot.threads = status_field(&status, "Threads:");
        }
        if let Ok(stat) = std::fs::read_to_string("/proc/self/stat") {
            snapshot.cpu_seconds = parse_cpu_seconds(&stat);
        }
        if let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") {
            snapshot.load1 = loadavg.split_whitespace().next().and_then(|v| v.parse().ok());
        }
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            snapshot.memory_available_bytes =
                status_field(&meminfo, "MemAvailable:").map(|kb| kb * 1024);
        }
        snapshot
    }

    /// Append every available reading to the session's stores
    pub fn record(&self, session: &SessionMetrics, timestamp_ms: i64) -> usize {
        let process = session.process_metrics();
        let host = session.host_metrics();
        let readings = [
            (process, PROCESS_RSS, self.rss_bytes.map(|v| v as f64)),
            (process, PROCESS_THREADS, self.threads.map(|v| v as f64)),
            (process, PROCESS_CPU, self.cpu_seconds),
            (host, HOST_LOAD, self.load1),
            (
                host,
                HOST_MEMORY_AVAILABLE,
                self.memory_available_bytes.map(|v| v as f64),
            ),
        ];
        let mut appended = 0;
        for (store, series, value) in readings {
            if let Some(value) = value {
                store.append(series, timestamp_ms, value);
                appended += 1;
            }
        }
        appended
    }
}

/// First numeric value after `name` in a `key: value [unit]` listing
fn status_field(text: &str, name: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix(name))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

/// utime + stime from `/proc/<pid>/stat`, in seconds
fn parse_cpu_seconds(stat: &str) -> Option<f64> {
    // The command name may contain spaces; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15; `rest` starts at field 3
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((utime + stime) as f64 / USER_HZ)
}

/// Samples resources on a fixed interval
#[derive(Debug, Clone)]
pub struct ResourceSampler {
    session: Arc<SessionMetrics>,
    interval: Duration,
}

impl ResourceSampler {
    /// Sampler writing into `session` every `interval`
    pub fn new(session: Arc<SessionMetrics>, interval: Duration) -> Self {
        Self {
            session,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    /// Take one round of readings now
    pub fn sample_once(&self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        ResourceSnapshot::capture().record(&self.session, now)
    }

    /// Start sampling on the current tokio runtime
    pub fn spawn(self) -> SamplerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        info!(interval_ms = %self.interval.as_millis(), "Starting resource sampler");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            let mut rounds = 0usize;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let appended = self.sample_once();
                        rounds += 1;
                        debug!(round = rounds, appended, "Resource sample");
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            rounds
        });

        SamplerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Running sampler
#[derive(Debug)]
pub struct SamplerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<usize>,
}

impl SamplerHandle {
    /// Stop sampling; returns how many rounds were taken
    pub async fn stop(mut self) -> usize {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match (&mut self.task).await {
            Ok(rounds) => {
                info!(rounds, "Resource sampler stopped");
                rounds
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resource sampler ended abnormally");
                0
            }
        }
    }
}
