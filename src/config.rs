//! # Engine Configuration
//!
//! Defaults for chunk size, concurrency, fault tolerance, step restart and logging.
//!
//! ## Sources
//!
//! Layered lowest first:
//!
//! 1. Built-in defaults ([`EngineConfig::default`])
//! 2. An optional configuration file (TOML, YAML or JSON, chosen by extension)
//! 3. Environment variables prefixed with `BATCH_`, sections separated by `__`
//!    (for example `BATCH_CHUNK__SIZE=25` or `BATCH_FAULT_TOLERANCE__SKIP_LIMIT=3`)
//!
//! ```rust,no_run
//! use batch_core::config::EngineConfig;
//!
//! let config = EngineConfig::from_env().expect("valid configuration");
//! assert!(config.chunk.size > 0);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BatchError, BatchResult};

pub const ENV_PREFIX: &str = "BATCH";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk: ChunkConfig,
    pub fault_tolerance: FaultToleranceConfig,
    pub step: StepConfig,
    pub logging: LoggingConfig,
}

/// Chunk-oriented step defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Items per chunk (commit interval)
    pub size: usize,
    /// Maximum chunks in flight with a concurrent task executor
    pub throttle_limit: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: 10,
            throttle_limit: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceConfig {
    pub retry_limit: u32,
    pub skip_limit: u32,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            retry_limit: 0,
            skip_limit: 10,
        }
    }
}

/// Step restart defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    pub start_limit: u32,
    pub allow_start_if_complete: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            start_limit: u32::MAX,
            allow_start_if_complete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` if given, then `BATCH_*` environment overrides
    pub fn load(path: Option<&Path>) -> BatchResult<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(BatchError::Configuration(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            chunk_size = config.chunk.size,
            throttle_limit = config.chunk.throttle_limit,
            retry_limit = config.fault_tolerance.retry_limit,
            skip_limit = config.fault_tolerance.skip_limit,
            "⚙️ CONFIG: Engine configuration loaded"
        );
        Ok(config)
    }

    pub fn from_env() -> BatchResult<Self> {
        Self::load(None)
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.chunk.size == 0 {
            return Err(BatchError::Configuration(
                "chunk.size must be greater than 0".to_string(),
            ));
        }
        if self.chunk.throttle_limit == 0 {
            return Err(BatchError::Configuration(
                "chunk.throttle_limit must be greater than 0".to_string(),
            ));
        }
        if self.step.start_limit == 0 {
            return Err(BatchError::Configuration(
                "step.start_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
