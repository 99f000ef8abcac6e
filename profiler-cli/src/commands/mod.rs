//! Profiler command-line interface
//!
//! - `run`: execute a command under observation and save the session
//! - `summary`: print the summary of a saved session
//! - `series`: dump one sampled time series as CSV

use clap::{Parser, Subcommand};
use convenient_profiler::{EnvProperties, Layered, ProfilerConfig, Properties};
use std::path::{Path, PathBuf};

pub mod run;
pub mod series;
pub mod summary;

/// Error type shared by the commands
pub type CommandError = Box<dyn std::error::Error + Send + Sync>;

/// Profiler - execution tracking for build pipelines
#[derive(Parser)]
#[command(name = "profiler")]
#[command(about = "Record and inspect build session metrics")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command and record its session
    Run {
        /// Where to write the session payload (`.zst` is compressed)
        #[arg(short, long, default_value = "profile.json.zst")]
        output: PathBuf,

        /// YAML option file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Option override, e.g. `-D minimumDuration=250ms`
        #[arg(short = 'D', value_name = "KEY=VALUE")]
        define: Vec<String>,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print the summary of a saved session
    Summary {
        /// Session payload
        file: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print a sampled series as CSV
    Series {
        /// Session payload
        file: PathBuf,

        /// Series name, e.g. `process.rss_bytes`
        name: String,

        /// Read from the host store instead of the process store
        #[arg(long)]
        host: bool,

        /// First timestamp (ms since epoch, inclusive)
        #[arg(long)]
        from: Option<i64>,

        /// Last timestamp (ms since epoch, exclusive)
        #[arg(long)]
        to: Option<i64>,
    },
}

/// Resolve options: `-D` overrides, then the option file, then the environment
pub fn load_config(defines: &[String], file: Option<&Path>) -> Result<ProfilerConfig, CommandError> {
    let mut layers = Layered::new().with(Properties::from_pairs(defines.iter().map(String::as_str))?);
    if let Some(file) = file {
        layers = layers.with(Properties::load(file)?);
    }
    let layers = layers.with(EnvProperties::new());
    Ok(ProfilerConfig::resolve(&layers))
}

/// Options from the environment only
pub fn env_config() -> ProfilerConfig {
    ProfilerConfig::resolve(&EnvProperties::new())
}
