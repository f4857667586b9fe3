//! Configuration management for localstage
//!
//! Settings are loaded from environment variables with sensible defaults. They cover the
//! stack image staging runs in and the directory layout inside the build container.
//!
//! # Environment Variables
//!
//! - `LOCALSTAGE_STACK_IMAGE`: Stack image with the buildpacks installed - default: "cloudfoundry/cflinuxfs2:1.86.0"
//! - `LOCALSTAGE_STACK_NAME`: Stack name exported as `CF_STACK` - default: "cflinuxfs2"
//! - `LOCALSTAGE_BUILD_DIR`: Where the app source is extracted - default: "/tmp/app"
//! - `LOCALSTAGE_CACHE_DIR`: Buildpack cache directory - default: "/tmp/cache"
//! - `LOCALSTAGE_OUTPUT_DIR`: Release output and staging results - default: "/tmp/staging"
//! - `LOCALSTAGE_BUILDPACKS_DIR`: Installed buildpacks - default: "/tmp/buildpacks"
//! - `LOCALSTAGE_MEMORY_LIMIT`: Default `MEMORY_LIMIT` - default: "1024m"
//! - `LOCALSTAGE_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use localstage::StagerConfig;
//!
//! let config = StagerConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_STACK_IMAGE: &str = "cloudfoundry/cflinuxfs2:1.86.0";
const DEFAULT_STACK_NAME: &str = "cflinuxfs2";
const DEFAULT_BUILD_DIR: &str = "/tmp/app";
const DEFAULT_CACHE_DIR: &str = "/tmp/cache";
const DEFAULT_OUTPUT_DIR: &str = "/tmp/staging";
const DEFAULT_BUILDPACKS_DIR: &str = "/tmp/buildpacks";
const DEFAULT_MEMORY_LIMIT: &str = "1024m";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings for [`Stager`](crate::stager::Stager)
///
/// `Default::default()` loads from `LOCALSTAGE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagerConfig {
    /// Image used for both staging and artifact fetching
    pub stack_image: String,

    /// Stack name exported to buildpacks
    pub stack_name: String,

    /// App source and compiled output location inside the container
    pub build_dir: String,

    /// Buildpack cache, mounted empty for every stage
    pub cache_dir: String,

    /// Receives release output and the selected buildpack
    pub output_dir: String,

    /// Parent of the installed buildpacks
    pub buildpacks_dir: String,

    /// `MEMORY_LIMIT` when the app does not set one
    pub memory_limit: String,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Default for StagerConfig {
    fn default() -> Self {
        Self {
            stack_image: env_or("LOCALSTAGE_STACK_IMAGE", DEFAULT_STACK_IMAGE),
            stack_name: env_or("LOCALSTAGE_STACK_NAME", DEFAULT_STACK_NAME),
            build_dir: env_or("LOCALSTAGE_BUILD_DIR", DEFAULT_BUILD_DIR),
            cache_dir: env_or("LOCALSTAGE_CACHE_DIR", DEFAULT_CACHE_DIR),
            output_dir: env_or("LOCALSTAGE_OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
            buildpacks_dir: env_or("LOCALSTAGE_BUILDPACKS_DIR", DEFAULT_BUILDPACKS_DIR),
            memory_limit: env_or("LOCALSTAGE_MEMORY_LIMIT", DEFAULT_MEMORY_LIMIT),
            log_level: env_or("LOCALSTAGE_LOG_LEVEL", DEFAULT_LOG_LEVEL).to_lowercase(),
        }
    }
}

/// Parses a memory size such as `256m`, `1G` or `512` (megabytes) into megabytes.
pub fn parse_memory_mb(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();
    let value = value.strip_suffix('b').unwrap_or(&value);
    let (digits, scale): (&str, fn(u64) -> Option<u64>) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], |n| Some(n / 1024)),
        'm' => (&value[..value.len() - 1], Some),
        'g' => (&value[..value.len() - 1], |n| n.checked_mul(1024)),
        _ => (value, Some),
    };
    let number: u64 = digits.trim().parse().ok()?;
    scale(number).filter(|mb| *mb > 0)
}

impl StagerConfig {
    /// Validates the configuration
    ///
    /// Checks that the image is set, container directories are absolute and distinct,
    /// the memory limit parses and the log level is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_image.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Stack image must not be empty".to_string(),
            ));
        }

        let dirs = [
            ("build", &self.build_dir),
            ("cache", &self.cache_dir),
            ("output", &self.output_dir),
            ("buildpacks", &self.buildpacks_dir),
        ];
        for (label, dir) in dirs {
            let path = Path::new(dir.as_str());
            if !path.is_absolute() || path.parent().is_none() {
                return Err(ConfigError::ValidationFailed(format!(
                    "The {} directory must be an absolute path below /: {}",
                    label, dir
                )));
            }
        }
        for (i, (label, dir)) in dirs.iter().enumerate() {
            if let Some((other, _)) = dirs[i + 1..].iter().find(|(_, d)| d == dir) {
                return Err(ConfigError::ValidationFailed(format!(
                    "The {} and {} directories must differ: {}",
                    label, other, dir
                )));
            }
        }

        if parse_memory_mb(&self.memory_limit).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid memory limit: {}. Expected a size such as 256m or 1g",
                self.memory_limit
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }
}

impl fmt::Display for StagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Localstage Configuration:")?;
        writeln!(f, "  Stack Image: {}", self.stack_image)?;
        writeln!(f, "  Stack Name: {}", self.stack_name)?;
        writeln!(f, "  Build Dir: {}", self.build_dir)?;
        writeln!(f, "  Cache Dir: {}", self.cache_dir)?;
        writeln!(f, "  Output Dir: {}", self.output_dir)?;
        writeln!(f, "  Buildpacks Dir: {}", self.buildpacks_dir)?;
        writeln!(f, "  Memory Limit: {}", self.memory_limit)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
