//! Tracing subscriber setup
//!
//! Shared by the `termgroups` binary and its tests. Output goes to a log file when
//! one is configured and to stderr otherwise, so it never mixes with the process
//! output the binary prints on stdout.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to `default_level` when unset or invalid
pub fn env_filter(default_level: tracing::Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()))
}

/// Initialize the global tracing subscriber.
///
/// With a log file the file is truncated and receives everything at DEBUG and
/// above; without one, INFO and above go to stderr.
pub fn init_global(log_file_path: Option<&Path>) -> anyhow::Result<()> {
    match log_file_path {
        Some(path) => {
            let log_file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            build_subscriber(Arc::new(log_file), env_filter(tracing::Level::DEBUG))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        None => {
            build_subscriber(std::io::stderr, env_filter(tracing::Level::INFO))
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
    }
    Ok(())
}

/// Build the subscriber used in production and tests.
pub fn build_subscriber<W>(writer: W, filter: EnvFilter) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fmt_layer = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry().with(fmt_layer).with(filter)
}
