//! Print the summary of a saved session

use super::CommandError;
use convenient_profiler::{FileResource, ProfilerConfig, SessionMetrics, SessionSummary};
use std::path::Path;

/// Load `file` and print its summary as text or JSON
pub fn execute(config: &ProfilerConfig, file: &Path, format: &str) -> Result<(), CommandError> {
    let session = SessionMetrics::load(&FileResource::new(file))?;
    session.set_verbose(config.verbose);
    let summary = SessionSummary::build(&session, config);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        "text" => print!("{}", summary),
        other => return Err(format!("unknown format '{}', expected text or json", other).into()),
    }
    Ok(())
}
