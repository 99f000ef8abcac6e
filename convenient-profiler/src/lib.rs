//! Execution tracking and session metrics for multi-threaded builds
//!
//! Build workers report when steps start, succeed or fail. The
//! [`ExecutionTracker`] pairs those events per `(subject, step)` and feeds
//! finished records into a [`SessionMetrics`] aggregate, which also holds
//! sampled resource series and can be saved as a versioned payload.
//!
//! # Features
//!
//! - Lock-sharded pairing of begin/end events from any thread
//! - Append-only metric collections with a trimmed artifact view
//! - Time series of process and host samples
//! - Compact progress output for quiet builds
//! - Layered configuration from files, properties and the environment
//!
//! # Example
//!
//! ```no_run
//! use convenient_profiler::{
//!     ExecutionTracker, MetricKind, SessionMetrics, Completion, FileResource, Compression,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(SessionMetrics::new(vec!["install".into()]));
//!     let tracker = ExecutionTracker::new(Arc::clone(&session));
//!
//!     tracker.begin(MetricKind::Plugin, "compiler:compile", "core")?;
//!     tracker.end(MetricKind::Plugin, "compiler:compile", "core", Completion::Success)?;
//!
//!     session.close();
//!     session.save(&FileResource::new("target/profile.json.zst"), Compression::Zstd)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod codec;
pub mod config;
pub mod error;
pub mod listener;
pub mod model;
pub mod progress;
pub mod report;
pub mod resource;
pub mod sampler;
pub mod series;
pub mod session;
pub mod tracker;

pub use codec::Compression;
pub use config::{ConfigProvider, EnvProperties, Layered, ProfilerConfig, Properties};
pub use error::{Mismatch, ProfilerError, ProfilerResult};
pub use listener::{ProfilerListener, StepListener};
pub use model::{
    ArtifactMetrics, DependencyMetrics, HostInfo, LifecycleMetrics, Metric, MetricKind,
    MetricRecord, ModuleIndex, ModuleMetrics, Outcome, PluginMetrics, ProcessInfo, TestMetrics,
    TrendMetrics,
};
pub use progress::{ProgressCoalescer, StepLabels};
pub use report::SessionSummary;
pub use resource::{FileResource, MemoryResource, Resource};
pub use sampler::{ResourceSampler, SamplerHandle};
pub use series::{Sample, SeriesRange, SeriesStore};
pub use session::SessionMetrics;
pub use tracker::{BeginToken, Completion, ExecutionTracker};
