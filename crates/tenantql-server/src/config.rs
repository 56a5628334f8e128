//! Configuration for the tenantql binary
//!
//! Loads configuration from:
//! 1. config.yaml - engine, storage, execution, llm and logging settings
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tenantql_duck::ExecutionLimits;
use tenantql_engine::EngineConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvVar { name: String, value: String },

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Where tenant schemas come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    /// `<schema_dir>/<tenant>/schema.yaml`
    Yaml,
    /// `<database_dir>/<tenant>.duckdb`
    Duckdb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStoreKind {
    Memory,
    Json,
    Duckdb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub schema_source: SchemaSource,
    pub schema_dir: PathBuf,

    /// Tenant DuckDB files, used by the executor and the duckdb schema source
    pub database_dir: PathBuf,

    pub mapping_store: MappingStoreKind,
    pub mapping_path: PathBuf,

    /// Replacement canonical vocabulary; the builtin one is used when absent
    pub canonical_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            schema_source: SchemaSource::Yaml,
            schema_dir: PathBuf::from("./tenants"),
            database_dir: PathBuf::from("./tenants"),
            mapping_store: MappingStoreKind::Json,
            mapping_path: PathBuf::from("./data/mappings.json"),
            canonical_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// OpenAI-compatible endpoint; the public API when absent
    pub api_base: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            api_base: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub execution: ExecutionLimits,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Like [`Config::load`], falling back to defaults when the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `TENANTQL_*`, `RUST_LOG` and `LOG_*` values looked up through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("TENANTQL_CONFIDENCE_FLOOR") {
            self.engine.confidence_floor = parse("TENANTQL_CONFIDENCE_FLOOR", v)?;
        }
        if let Some(v) = var("TENANTQL_SAMPLE_ROWS") {
            self.engine.sample_rows = parse("TENANTQL_SAMPLE_ROWS", v)?;
        }
        if let Some(v) = var("TENANTQL_GENERATION_TIMEOUT_SECS") {
            self.engine.generation.timeout_secs = parse("TENANTQL_GENERATION_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = var("TENANTQL_GENERATION_MAX_ATTEMPTS") {
            self.engine.generation.max_attempts = parse("TENANTQL_GENERATION_MAX_ATTEMPTS", v)?;
        }

        if let Some(v) = var("TENANTQL_SCHEMA_SOURCE") {
            self.storage.schema_source = parse_enum("TENANTQL_SCHEMA_SOURCE", v)?;
        }
        if let Some(v) = var("TENANTQL_SCHEMA_DIR") {
            self.storage.schema_dir = PathBuf::from(v);
        }
        if let Some(v) = var("TENANTQL_DATABASE_DIR") {
            self.storage.database_dir = PathBuf::from(v);
        }
        if let Some(v) = var("TENANTQL_MAPPING_STORE") {
            self.storage.mapping_store = parse_enum("TENANTQL_MAPPING_STORE", v)?;
        }
        if let Some(v) = var("TENANTQL_MAPPING_PATH") {
            self.storage.mapping_path = PathBuf::from(v);
        }
        if let Some(v) = var("TENANTQL_CANONICAL_PATH") {
            self.storage.canonical_path = Some(PathBuf::from(v));
        }

        if let Some(v) = var("TENANTQL_MAX_ROWS") {
            self.execution.max_rows = parse("TENANTQL_MAX_ROWS", v)?;
        }
        if let Some(v) = var("TENANTQL_EXECUTION_TIMEOUT_SECS") {
            self.execution.timeout_secs = parse("TENANTQL_EXECUTION_TIMEOUT_SECS", v)?;
        }

        if let Some(v) = var("TENANTQL_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("OPENAI_API_BASE") {
            self.llm.api_base = Some(v);
        }

        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = var("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value,
        })
}

fn parse_enum<T: serde::de::DeserializeOwned>(name: &str, value: String) -> Result<T, ConfigError> {
    serde_yaml::from_str(value.trim()).map_err(|_| ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value,
    })
}
