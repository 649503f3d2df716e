//! Logging setup: console on stderr, optional append-only log file.
//!
//! Level comes from the merged settings (`debug` > `verbose` > info) unless
//! `RUST_LOG` is set.

use super::types::Settings;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Level directive implied by the verbosity settings.
pub fn level_for(settings: &Settings) -> &'static str {
    if settings.debug {
        "trace"
    } else if settings.verbose {
        "debug"
    } else {
        "info"
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create log dir {}: {}", parent.display(), e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))
}

/// Install the global subscriber. Fails if the log file cannot be opened or a
/// subscriber is already installed.
pub fn init(settings: &Settings) -> Result<(), String> {
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file = match &settings.log {
        Some(path) => Some(
            fmt::layer()
                .with_writer(Mutex::new(open_log_file(path)?))
                .with_ansi(false),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(level_for(settings)))
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| format!("logging already initialised: {}", e))
}

/// Root span labelling every record with the process id.
pub fn process_span() -> tracing::Span {
    tracing::info_span!("stretch", pid = std::process::id())
}
