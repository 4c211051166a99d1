//! Log output setup.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where `--trace` writes unless told otherwise.
pub const DEFAULT_TRACE_FILE: &str = "/tmp/clam_unpacker.log";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Console at DEBUG instead of INFO.
    pub verbose: bool,
    /// No console output at all.
    pub quiet: bool,
    /// Also write everything down to TRACE into this file, truncating it.
    pub trace_file: Option<PathBuf>,
}

/// Install the global subscriber. `RUST_LOG` overrides the console level.
pub fn init(config: &LogConfig) -> Result<()> {
    let console = if config.quiet {
        None
    } else {
        let default_filter = if config.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_filter.into())
            .from_env()?;

        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_filter(env_filter),
        )
    };

    let trace = match &config.trace_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Unable to open trace file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(LevelFilter::TRACE),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(trace)
        .try_init()?;

    Ok(())
}
