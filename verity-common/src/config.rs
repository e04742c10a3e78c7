//! Configuration loading and root folder resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`VERITY_ROOT_FOLDER`, `VERITY_PORT`, `VERITY_ENV`)
//! 3. TOML configuration file
//! 4. Compiled defaults

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ENV_ROOT_FOLDER: &str = "VERITY_ROOT_FOLDER";
/// Environment variable overriding the listening port
pub const ENV_PORT: &str = "VERITY_PORT";
/// Environment variable selecting development or production mode
pub const ENV_ENVIRONMENT: &str = "VERITY_ENV";

/// Deployment environment
///
/// Development mode exposes internal error detail in HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(Error::Config(format!("Unknown environment: {}", other))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Service configuration loaded from TOML, then overridden by the environment
#[derive(Debug, Clone, Deserialize)]
pub struct VerityConfig {
    /// Root folder holding the database, uploads and staging directories
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,

    /// Similarity percentage a candidate must strictly exceed to conflict
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Edge length of the normalized square image the signature is derived from
    #[serde(default = "default_signature_size")]
    pub signature_size: u32,

    /// Lifetime of issued session tokens
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    /// Maximum accepted upload body size
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_similarity_threshold() -> f64 {
    85.0
}

fn default_signature_size() -> u32 {
    32
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for VerityConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
            similarity_threshold: default_similarity_threshold(),
            signature_size: default_signature_size(),
            session_ttl_hours: default_session_ttl_hours(),
            max_upload_bytes: default_max_upload_bytes(),
            logging: LoggingConfig::default(),
        }
    }
}

impl VerityConfig {
    /// Load configuration
    ///
    /// An explicitly requested file must exist and parse. Without one, the
    /// platform config file is used when present; a missing file is not an
    /// error and yields compiled defaults. Environment overrides are applied
    /// last and the result is validated.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_file() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply `VERITY_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var(ENV_ROOT_FOLDER) {
            if !root.trim().is_empty() {
                self.root_folder = Some(PathBuf::from(root));
            }
        }

        if let Ok(port) = std::env::var(ENV_PORT) {
            self.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {}: {}", ENV_PORT, e)))?;
        }

        if let Ok(env) = std::env::var(ENV_ENVIRONMENT) {
            self.environment = env.parse()?;
        }

        Ok(())
    }

    /// Reject values the services cannot operate with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..100.0).contains(&self.similarity_threshold) {
            return Err(Error::Config(format!(
                "similarity_threshold must be in [0, 100), got {}",
                self.similarity_threshold
            )));
        }
        if self.signature_size == 0 {
            return Err(Error::Config("signature_size must be non-zero".to_string()));
        }
        if self.session_ttl_hours <= 0 {
            return Err(Error::Config("session_ttl_hours must be positive".to_string()));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Resolve the root folder: CLI argument, then config/env value, then
    /// the OS default
    pub fn resolve_root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Some(path) = &self.root_folder {
            return path.clone();
        }
        default_root_folder()
    }
}

/// Platform config file path (`~/.config/verity/verity.toml` on Linux)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("verity").join("verity.toml"))
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("verity"))
        .unwrap_or_else(|| PathBuf::from("./verity_data"))
}

/// Directory layout under the root folder
#[derive(Debug, Clone)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("verity.db")
    }

    /// Committed profile pictures
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Uploads awaiting a conflict decision
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Create the root folder and its subdirectories if missing
    pub fn ensure_directories_exist(&self) -> Result<()> {
        for dir in [self.root.clone(), self.uploads_dir(), self.staging_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }
}
