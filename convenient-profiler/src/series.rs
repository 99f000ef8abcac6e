//! Append-only store of timestamped samples grouped by series name
//!
//! Each series is an independent log. Appends to different series only
//! contend when they hash to the same shard; appends to the same series are
//! serialized by the shard lock. Reads copy the requested window out, so a
//! range is a consistent snapshot taken at call time.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One sampled value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Sampled value
    pub value: f64,
}

impl Sample {
    /// Sample taken now
    pub fn now(value: f64) -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            value,
        }
    }

    /// Wall-clock time of the sample
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

/// In-memory time-series store
#[derive(Debug, Default)]
pub struct SeriesStore {
    series: DashMap<String, Vec<Sample>>,
}

impl SeriesStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample to a series, creating the series on first use
    pub fn append(&self, series: &str, timestamp_ms: i64, value: f64) {
        let sample = Sample {
            timestamp_ms,
            value,
        };
        if let Some(mut samples) = self.series.get_mut(series) {
            samples.push(sample);
            return;
        }
        self.series
            .entry(series.to_string())
            .or_default()
            .push(sample);
    }

    /// Append a sample stamped with the current time
    pub fn append_now(&self, series: &str, value: f64) {
        let sample = Sample::now(value);
        self.append(series, sample.timestamp_ms, sample.value);
    }

    /// Samples of `series` with `from <= timestamp < to`, in append order.
    ///
    /// The returned range is restartable (it is `Clone`) and does not see
    /// appends made after this call.
    pub fn range(&self, series: &str, from: i64, to: i64) -> SeriesRange {
        let samples: Vec<Sample> = self
            .series
            .get(series)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.timestamp_ms >= from && s.timestamp_ms < to)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        SeriesRange {
            samples: Arc::from(samples),
            position: 0,
        }
    }

    /// Every sample of a series
    pub fn all(&self, series: &str) -> SeriesRange {
        self.range(series, i64::MIN, i64::MAX)
    }

    /// Names of all series, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of samples in a series
    pub fn len(&self, series: &str) -> usize {
        self.series.get(series).map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the store holds no series at all
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Highest value seen in a series
    pub fn max(&self, series: &str) -> Option<f64> {
        self.series
            .get(series)?
            .iter()
            .map(|s| s.value)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
    }

    /// Average of a series
    pub fn average(&self, series: &str) -> Option<f64> {
        let samples = self.series.get(series)?;
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().map(|s| s.value).sum();
        Some(sum / samples.len() as f64)
    }

    fn snapshot(&self) -> BTreeMap<String, Vec<Sample>> {
        self.series
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Clone for SeriesStore {
    fn clone(&self) -> Self {
        Self {
            series: self.snapshot().into_iter().collect(),
        }
    }
}

impl Serialize for SeriesStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SeriesStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let series = BTreeMap::<String, Vec<Sample>>::deserialize(deserializer)?;
        Ok(Self {
            series: series.into_iter().collect(),
        })
    }
}

/// Snapshot of a window of one series
#[derive(Debug, Clone)]
pub struct SeriesRange {
    samples: Arc<[Sample]>,
    position: usize,
}

impl SeriesRange {
    /// Samples in the window
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Start over from the first sample
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for SeriesRange {
    type Item = (i64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.samples.get(self.position)?;
        self.position += 1;
        Some((sample.timestamp_ms, sample.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.samples.len() - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for SeriesRange {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_append_and_range() {
        let store = SeriesStore::new();
        store.append("cpu", 10, 1.0);
        store.append("cpu", 20, 2.0);
        store.append("cpu", 30, 3.0);
        store.append("memory", 15, 100.0);

        let window: Vec<_> = store.range("cpu", 15, 30).collect();
        assert_eq!(window, vec![(20, 2.0)]);
        assert_eq!(store.all("cpu").len(), 3);
        assert_eq!(store.names(), vec!["cpu".to_string(), "memory".to_string()]);
        assert_eq!(store.range("missing", 0, 100).count(), 0);
    }

    #[test]
    fn test_range_is_snapshot_and_restartable() {
        let store = SeriesStore::new();
        store.append("cpu", 1, 1.0);
        let mut range = store.all("cpu");
        store.append("cpu", 2, 2.0);

        assert_eq!(range.next(), Some((1, 1.0)));
        assert_eq!(range.next(), None);
        range.restart();
        assert_eq!(range.count(), 1);
        assert_eq!(store.len("cpu"), 2);
    }

    #[test]
    fn test_aggregates() {
        let store = SeriesStore::new();
        assert_eq!(store.max("cpu"), None);
        store.append("cpu", 1, 2.0);
        store.append("cpu", 2, 6.0);
        assert_eq!(store.max("cpu"), Some(6.0));
        assert_eq!(store.average("cpu"), Some(4.0));
    }

    #[test]
    fn test_concurrent_appenders() {
        let store = Arc::new(SeriesStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let name = if t % 2 == 0 { "shared" } else { "odd" };
                    for i in 0..500 {
                        store.append(name, i, t as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len("shared"), 2000);
        assert_eq!(store.len("odd"), 2000);
    }

    #[test]
    fn test_serde_shape() {
        let store = SeriesStore::new();
        store.append("host.load1", 5, 0.5);
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json["host.load1"][0]["timestamp_ms"], 5);

        let back: SeriesStore = serde_json::from_value(json).unwrap();
        assert_eq!(back.all("host.load1").collect::<Vec<_>>(), vec![(5, 0.5)]);
    }
}
