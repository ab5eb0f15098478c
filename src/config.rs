//! Engine configuration
//!
//! Values are layered, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file: the explicit `config_path`, else `$NETFLOW_CONFIG_PATH`,
//!    else `./netflow.toml` if it exists
//! 3. `NETFLOW__<SECTION>__<KEY>` environment variables
//!    (e.g. `NETFLOW__EXECUTION__MAX_LOOP_SNAPSHOTS=64`)
//! 4. Builder overrides
//!
//! ```toml
//! [execution]
//! isolate_blocks = true
//! max_loop_snapshots = 1024
//!
//! [gradient]
//! missing_gradient = "fail"
//!
//! [logging]
//! filter = "netflow_core=debug"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gradient::MissingGradient;

const DEFAULT_CONFIG_FILE: &str = "netflow.toml";
const CONFIG_PATH_VAR: &str = "NETFLOW_CONFIG_PATH";
const ENV_PREFIX: &str = "NETFLOW";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub gradient: GradientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Whether `NetBuilder` marks `If`/`While` blocks as isolated
    pub isolate_blocks: bool,
    /// Per-loop cap on retained iteration snapshots; unbounded when unset
    pub max_loop_snapshots: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            isolate_blocks: true,
            max_loop_snapshots: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    pub missing_gradient: MissingGradient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default file and the environment
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Parse a TOML document over the defaults, without file or environment
    /// lookup
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Failed to parse configuration")
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    max_loop_snapshots: Option<usize>,
    missing_gradient: Option<MissingGradient>,
    log_filter: Option<String>,
}

impl ConfigBuilder {
    /// Explicit config file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn max_loop_snapshots(mut self, limit: Option<usize>) -> Self {
        self.max_loop_snapshots = limit;
        self
    }

    pub fn missing_gradient(mut self, policy: Option<MissingGradient>) -> Self {
        self.missing_gradient = policy;
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn build(self) -> Result<Config> {
        // A missing .env is fine
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        let explicit = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from));
        builder = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder.add_source(config::File::from(path))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(limit) = self.max_loop_snapshots {
            builder = builder.set_override("execution.max_loop_snapshots", limit as i64)?;
        }
        if let Some(policy) = self.missing_gradient {
            let name = match policy {
                MissingGradient::Fail => "fail",
                MissingGradient::Zero => "zero",
            };
            builder = builder.set_override("gradient.missing_gradient", name)?;
        }
        if let Some(filter) = self.log_filter {
            builder = builder.set_override("logging.filter", filter)?;
        }

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Failed to load configuration")?;

        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }
}
