//! Diagnostic logging setup
//!
//! Diagnostics go through `tracing` to stderr so that stdout carries only staged
//! application output. Container output never passes through here.
//!
//! # Example
//!
//! ```no_run
//! use localstage::util::logging;
//!
//! // LOCALSTAGE_LOG_LEVEL=debug LOCALSTAGE_LOG_JSON=true
//! logging::init_from_env();
//!
//! tracing::info!(app = "some-app", "Staging application");
//! ```

use std::env;
use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Dependencies that are capped at `warn` unless `RUST_LOG` says otherwise
const NOISY_TARGETS: [&str; 3] = ["bollard", "hyper", "h2"];

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for this crate's own events
    pub level: Level,

    /// Emit one JSON object per event
    pub use_json: bool,

    /// Include the module target (e.g. localstage::stager)
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ID and name
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Debug level with targets, for troubleshooting a stage
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ..Default::default()
        }
    }
}

/// Parses a log level, case-insensitively.
///
/// Unknown values fall back to `INFO` with a warning on stderr.
///
/// ```
/// use localstage::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("bogus"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn directive(spec: String) -> Option<Directive> {
    spec.parse().ok()
}

fn build_filter(level: Level, rust_log_set: bool) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if let Some(own) = directive(format!("{}={}", env!("CARGO_PKG_NAME"), level)) {
        filter = filter.add_directive(own);
    }
    if !rust_log_set {
        for target in NOISY_TARGETS {
            if let Some(capped) = directive(format!("{}=warn", target)) {
                filter = filter.add_directive(capped);
            }
        }
    }
    filter
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level, env::var_os("RUST_LOG").is_some());

        let layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.use_json {
            registry.with(layer.json()).try_init()
        } else {
            registry.with(layer).try_init()
        };
        if let Err(e) = result {
            eprintln!("Logging was already initialized: {}", e);
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `LOCALSTAGE_LOG_LEVEL` and `LOCALSTAGE_LOG_JSON`.
///
/// `RUST_LOG` directives are honoured on top of the level.
pub fn init_from_env() {
    let level_str = env::var("LOCALSTAGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let use_json = env::var("LOCALSTAGE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig {
        level: parse_level(&level_str),
        use_json,
        ..Default::default()
    });
}
