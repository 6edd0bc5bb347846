//! Log output for the daemon and its one-shot commands.

use std::env::var;
use std::io::stderr;

use eyre::Result as EyreResult;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, EnvFilter};

#[cfg(test)]
#[path = "tests/logging.rs"]
mod tests;

/// Targets shown when `RUST_LOG` is unset.
const TARGETS: [&str; 2] = ["reposwarmd", "reposwarm_"];

/// Installs the global subscriber. A non-empty `RUST_LOG` overrides
/// `verbosity`.
///
/// Everything goes to stderr since `fetch` may stream object content to
/// stdout.
pub fn init(verbosity: u8) -> EyreResult<()> {
    let directives = match var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default_directives(verbosity),
    };

    registry()
        .with(EnvFilter::builder().parse(directives)?)
        .with(layer().with_writer(stderr))
        .init();

    Ok(())
}

fn default_directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}
