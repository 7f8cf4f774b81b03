//! Structured logging setup.
//!
//! Logs go to stderr so `synth` and `buildspec` output on stdout stays
//! machine readable. Configuration comes from the CLI or from
//! `ECR_CI_LOG_LEVEL` / `ECR_CI_LOG_JSON`; `RUST_LOG` directives still apply
//! on top.

use std::env;
use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable holding the default level.
pub const LOG_LEVEL_ENV: &str = "ECR_CI_LOG_LEVEL";

/// Environment variable switching to JSON lines.
pub const LOG_JSON_ENV: &str = "ECR_CI_LOG_JSON";

/// Crates whose events follow the configured level.
const OWN_TARGETS: &[&str] = &["ecr_ci_pipeline", "ecr_ci", "ecr_build_runner", "ecr_buildspec"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for this workspace's crates
    pub level: Level,

    /// Emit JSON lines instead of the human format
    pub use_json: bool,

    /// Include the module target in each line
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
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

    /// Read `ECR_CI_LOG_LEVEL` and `ECR_CI_LOG_JSON`.
    pub fn from_env() -> Self {
        let level = env::var(LOG_LEVEL_ENV)
            .map(|s| parse_level(&s))
            .unwrap_or(Level::INFO);
        let use_json = env::var(LOG_JSON_ENV)
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);
        Self {
            level,
            use_json,
            ..Default::default()
        }
    }
}

/// Parse a level name, case-insensitive. Unknown names fall back to INFO.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
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

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    for target in OWN_TARGETS {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(io::stderr)
                        .with_target(config.include_target),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_target(config.include_target),
                )
                .init();
        }
    });
}

/// Initialize from the environment, letting an explicit level win.
pub fn init_from_env(level_override: Option<&str>) {
    let mut config = LoggingConfig::from_env();
    if let Some(level) = level_override {
        config.level = parse_level(level);
    }
    init_logging(config);
}
