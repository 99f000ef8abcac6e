//! Read-only configuration lookups
//!
//! Options arrive already resolved by the host (system properties, a flat
//! YAML file, the environment). The profiler only ever reads them, so any
//! provider can be shared across threads without coordination.

use crate::error::{ProfilerError, ProfilerResult};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Named, read-only option source
pub trait ConfigProvider: Send + Sync {
    /// Raw value of an option, if set
    fn get(&self, name: &str) -> Option<String>;

    /// Typed lookup falling back to `default` when the option is unset.
    ///
    /// A value that is present but fails to parse is reported and the
    /// default is used instead.
    fn get_option<T: ConfigValue>(&self, name: &str, default: T) -> T
    where
        Self: Sized,
    {
        match self.get(name) {
            Some(raw) => T::parse_value(&raw).unwrap_or_else(|| {
                warn!(option = %name, value = %raw, "Ignoring unparseable option value");
                default
            }),
            None => default,
        }
    }

    /// Typed lookup that fails on a malformed value
    fn try_get_option<T: ConfigValue>(&self, name: &str, default: T) -> ProfilerResult<T>
    where
        Self: Sized,
    {
        match self.get(name) {
            Some(raw) => T::parse_value(&raw).ok_or_else(|| ProfilerError::Config {
                name: name.to_string(),
                value: raw,
            }),
            None => Ok(default),
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProvider for &P {
    fn get(&self, name: &str) -> Option<String> {
        (**self).get(name)
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProvider for Box<P> {
    fn get(&self, name: &str) -> Option<String> {
        (**self).get(name)
    }
}

/// Types an option value can be read as
pub trait ConfigValue: Sized {
    /// Parse from the raw textual value
    fn parse_value(raw: &str) -> Option<Self>;
}

impl ConfigValue for bool {
    fn parse_value(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigValue for u64 {
    fn parse_value(raw: &str) -> Option<Self> {
        u64::from_str(raw.trim()).ok()
    }
}

impl ConfigValue for String {
    fn parse_value(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

impl ConfigValue for Duration {
    fn parse_value(raw: &str) -> Option<Self> {
        parse_duration(raw)
    }
}

/// Parse `"150ms"`, `"2s"`, `"1m"` or a bare number of milliseconds
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}

/// In-memory option map
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// Create an empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let _ = self.values.insert(name.into(), value.into());
        self
    }

    /// Parse `key=value` pairs (as given with `-D` on the command line)
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> ProfilerResult<Self> {
        let mut props = Self::new();
        for pair in pairs {
            let (key, value) = pair.split_once('=').ok_or_else(|| ProfilerError::Config {
                name: pair.to_string(),
                value: String::new(),
            })?;
            let _ = props.set(key.trim(), value.trim());
        }
        Ok(props)
    }

    /// Parse a YAML document; nested mappings become dotted keys
    /// (`console: { enabled: false }` is `console.enabled`).
    pub fn from_yaml_str(content: &str) -> ProfilerResult<Self> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| ProfilerError::ConfigFile(e.to_string()))?;
        let mut props = Self::new();
        if !doc.is_null() {
            flatten_yaml("", &doc, &mut props)?;
        }
        Ok(props)
    }

    /// Load a YAML option file
    pub fn load(path: impl AsRef<Path>) -> ProfilerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProfilerError::storage(path.display().to_string(), e))?;
        Self::from_yaml_str(&content)
    }

    /// Number of options
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no option is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut Properties) -> ProfilerResult<()> {
    use serde_yaml::Value;

    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let key = match key {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(ProfilerError::ConfigFile(format!(
                            "unsupported key {:?}",
                            other
                        )));
                    }
                };
                let name = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_yaml(&name, child, out)?;
            }
        }
        Value::String(s) => {
            let _ = out.set(prefix, s.as_str());
        }
        Value::Bool(b) => {
            let _ = out.set(prefix, b.to_string());
        }
        Value::Number(n) => {
            let _ = out.set(prefix, n.to_string());
        }
        Value::Null => {}
        other => {
            return Err(ProfilerError::ConfigFile(format!(
                "option '{}' must be a scalar, got {:?}",
                prefix, other
            )));
        }
    }
    Ok(())
}

impl ConfigProvider for Properties {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Options read from the process environment.
///
/// `console.enabled` is looked up as `PROFILER_CONSOLE_ENABLED`.
#[derive(Debug, Clone)]
pub struct EnvProperties {
    prefix: String,
}

impl EnvProperties {
    /// Environment provider with the default `PROFILER_` prefix
    pub fn new() -> Self {
        Self::with_prefix("PROFILER_")
    }

    /// Environment provider with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable(&self, name: &str) -> String {
        let mut var = self.prefix.clone();
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                var.push(c.to_ascii_uppercase());
            } else {
                var.push('_');
            }
        }
        var
    }
}

impl Default for EnvProperties {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigProvider for EnvProperties {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(self.variable(name)).ok()
    }
}

/// Ordered stack of providers; the first one holding an option wins
#[derive(Default)]
pub struct Layered {
    layers: Vec<Box<dyn ConfigProvider>>,
}

impl Layered {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider with lower precedence than the ones already added
    pub fn with(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.layers.push(Box::new(provider));
        self
    }
}

impl ConfigProvider for Layered {
    fn get(&self, name: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }
}

/// Option names understood by the profiler
pub mod keys {
    /// Minimum duration for a step to appear in the summary
    pub const MINIMUM_DURATION: &str = "minimumDuration";
    /// Print summaries to the console
    pub const CONSOLE_ENABLED: &str = "console.enabled";
    /// Master switch for the event listener
    pub const EXTENSION_ENABLED: &str = "extension.enabled";
    /// Execution tracking switch
    pub const PERFORMANCE_ENABLED: &str = "performance.enabled";
    /// Open the report once written
    pub const REPORT_OPEN: &str = "report.open";
    /// Disable trimmed views
    pub const VERBOSE: &str = "verbose";
    /// Host build runs quiet
    pub const QUIET: &str = "quiet";
    /// Show the progress stream while quiet
    pub const PROGRESS: &str = "progress";
    /// Resource sampling period
    pub const SAMPLING_INTERVAL: &str = "sampling.interval";
}

/// Profiler options, resolved once from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    /// Minimum duration for a step to be a candidate for visualization
    pub minimum_duration: Duration,
    /// Whether the console displays reports and summaries
    pub console_enabled: bool,
    /// Whether the listener is active at all
    pub extension_enabled: bool,
    performance_enabled: bool,
    /// Whether the report should be opened after the session
    pub report_open: bool,
    /// Whether retrieval returns untrimmed collections
    pub verbose: bool,
    /// Whether the host build is quiet
    pub quiet: bool,
    /// Whether progress markers are printed while quiet
    pub progress: bool,
    /// Resource sampling period
    pub sampling_interval: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            minimum_duration: Duration::from_millis(100),
            console_enabled: true,
            extension_enabled: true,
            performance_enabled: true,
            report_open: false,
            verbose: false,
            quiet: false,
            progress: true,
            sampling_interval: Duration::from_secs(1),
        }
    }
}

impl ProfilerConfig {
    /// Resolve all options, using defaults for unset or malformed values
    pub fn resolve(provider: &impl ConfigProvider) -> Self {
        let defaults = Self::default();
        Self {
            minimum_duration: provider.get_option(keys::MINIMUM_DURATION, defaults.minimum_duration),
            console_enabled: provider.get_option(keys::CONSOLE_ENABLED, defaults.console_enabled),
            extension_enabled: provider.get_option(keys::EXTENSION_ENABLED, defaults.extension_enabled),
            performance_enabled: provider
                .get_option(keys::PERFORMANCE_ENABLED, defaults.performance_enabled),
            report_open: provider.get_option(keys::REPORT_OPEN, defaults.report_open),
            verbose: provider.get_option(keys::VERBOSE, defaults.verbose),
            quiet: provider.get_option(keys::QUIET, defaults.quiet),
            progress: provider.get_option(keys::PROGRESS, defaults.progress),
            sampling_interval: provider.get_option(keys::SAMPLING_INTERVAL, defaults.sampling_interval),
        }
    }

    /// Tracking is enabled only when the listener itself is enabled
    pub fn performance_enabled(&self) -> bool {
        self.extension_enabled && self.performance_enabled
    }

    /// Whether the progress coalescer should print
    pub fn quiet_with_progress(&self) -> bool {
        self.quiet && self.progress
    }
}
