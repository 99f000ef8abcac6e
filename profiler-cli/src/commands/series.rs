//! Dump a sampled series as CSV

use super::CommandError;
use convenient_profiler::{FileResource, SessionMetrics};
use std::io::Write;
use std::path::Path;

/// Print `name` from `file` as `timestamp_ms,value` rows
pub fn execute(
    file: &Path,
    name: &str,
    host: bool,
    from: Option<i64>,
    to: Option<i64>,
) -> Result<(), CommandError> {
    let session = SessionMetrics::load(&FileResource::new(file))?;
    let store = if host {
        session.host_metrics()
    } else {
        session.process_metrics()
    };
    if store.len(name) == 0 {
        let known = store.names().join(", ");
        return Err(format!("no series '{}' (available: {})", name, known).into());
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_csv(
        &mut out,
        store.range(name, from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX)),
    )?;
    Ok(())
}

fn write_csv(out: &mut impl Write, samples: impl Iterator<Item = (i64, f64)>) -> std::io::Result<usize> {
    writeln!(out, "timestamp_ms,value")?;
    let mut rows = 0;
    for (timestamp, value) in samples {
        writeln!(out, "{},{}", timestamp, value)?;
        rows += 1;
    }
    out.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_profiler::SeriesStore;

    #[test]
    fn test_csv_rows_respect_range() {
        let store = SeriesStore::new();
        store.append("process.threads", 1_000, 4.0);
        store.append("process.threads", 2_000, 6.0);
        store.append("process.threads", 3_000, 5.5);

        let mut out = Vec::new();
        let rows = write_csv(&mut out, store.range("process.threads", 2_000, 3_000)).unwrap();
        assert_eq!(rows, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "timestamp_ms,value\n2000,6\n");
    }
}
