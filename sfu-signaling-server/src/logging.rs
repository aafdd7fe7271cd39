//! Process-wide tracing subscriber for the signaling server

use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use sfu_signaling::LoggingConfig;

/// Crates whose events follow the configured level; everything else logs warnings only
const OWN_TARGETS: &[&str] = &["sfu_signaling", "sfu_signaling_server", "tower_http"];

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the generated filter entirely when set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let directives = filter_directives(&config.level)?;
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directives))?;
    let writer = make_writer(config.file_path.as_deref())?;

    let (json, pretty) = if config.format == "json" {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_ansi(config.file_path.is_none())
            .with_writer(writer);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()?;

    info!(
        level = %config.level,
        format = %config.format,
        file = config.file_path.as_deref().unwrap_or("stdout"),
        "Logging initialized"
    );
    Ok(())
}

/// `warn` globally, the configured level for the server's own crates
fn filter_directives(level: &str) -> anyhow::Result<String> {
    let level = parse_log_level(level)?.to_string().to_lowercase();
    let mut directives = vec![Level::WARN.to_string().to_lowercase()];
    directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={level}")));
    Ok(directives.join(","))
}

fn make_writer(file_path: Option<&str>) -> anyhow::Result<BoxMakeWriter> {
    match file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {path}: {e}"))?;
            Ok(BoxMakeWriter::new(Arc::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stdout)),
    }
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
