//! Tracing subscriber setup
//!
//! Console output is always on; a log file is added when
//! `logging.file_path` is set. The file is written through a non-blocking
//! worker, so the returned guard has to live until shutdown or buffered
//! lines are lost.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{ConfigError, MonitorError, Result};

/// Parse a level name, falling back to INFO for anything unrecognized
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the `RUST_LOG`-aware filter with the crate directive on top
pub fn build_filter(level: Level) -> Result<EnvFilter> {
    let directive = |d: String| {
        d.parse::<Directive>().map_err(|_| ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            value: d.clone(),
        })
    };

    Ok(EnvFilter::from_default_env()
        .add_directive(directive(format!("hostwatch={}", level))?)
        .add_directive(directive("lettre=warn".to_string())?)
        .add_directive(directive("tokio=warn".to_string())?))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn console_layer(json: bool) -> BoxedLayer {
    if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    }
}

fn file_layer(path: &Path, json: bool) -> Result<(BoxedLayer, WorkerGuard)> {
    let file_name = path.file_name().ok_or_else(|| ConfigError::InvalidValue {
        field: "logging.file_path".to_string(),
        value: path.display().to_string(),
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
    };
    Ok((layer, guard))
}

/// Install the global subscriber
///
/// `level` and `json` come from the command line and win over the config
/// file when given.
pub fn init(config: &LoggingConfig, level: Option<&str>, json: bool) -> Result<Option<WorkerGuard>> {
    let level = parse_level(level.unwrap_or(&config.level));
    let json = json || config.json;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(json)];
    let mut guard = None;
    if let Some(path) = &config.file_path {
        let (layer, file_guard) = file_layer(path, json)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(level)?)
        .try_init()
        .map_err(|e| MonitorError::Generic(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}
