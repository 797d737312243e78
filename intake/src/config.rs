//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `INTAKE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, optional)
//! 2. **Environment variables** - Variables prefixed with `INTAKE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `INTAKE_STORAGE__ROOT=/srv/uploads` sets the `storage.root` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! INTAKE_PORT=8080
//! INTAKE_STORAGE__ROOT=/var/lib/intake/uploads
//! INTAKE_LIMITS__UPLOADS__MAX_FILE_SIZE=10485760
//! INTAKE_UPLOADS__REJECT_SIZE_MISMATCH=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "INTAKE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementations, so an empty (or missing)
/// config file yields a runnable service that stores uploads under `tmp/uploads`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Where and how uploaded files are persisted
    pub storage: StorageConfig,
    /// Transport behaviour for the two upload endpoints
    pub uploads: UploadsConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// CORS settings for the browser client
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory uploads are written into. Created on demand.
    pub root: PathBuf,
    /// Caller-facing path prefix reported for stored files (default: `/uploads`)
    pub public_path: String,
    /// Maximum number of files of one request written concurrently (default: 4)
    pub write_concurrency: usize,
    /// Serve stored files under `public_path` (default: true)
    pub serve_files: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tmp/uploads"),
            public_path: "/uploads".to_string(),
            write_concurrency: 4,
            serve_files: true,
        }
    }
}

/// Transport adapter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Multipart field name that carries files (default: `files`)
    pub form_field: String,
    /// Fail structured uploads whose declared size differs from the decoded size.
    /// When false, mismatches are only logged.
    pub reject_size_mismatch: bool,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            form_field: "files".to_string(),
            reject_size_mismatch: false,
        }
    }
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Upload size and concurrency limits
    pub uploads: UploadLimitsConfig,
}

/// Upload limits configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadLimitsConfig {
    /// Maximum request body size in bytes, for either transport.
    /// Default: 100MB
    pub max_request_size: u64,
    /// Maximum size in bytes of a single decoded file.
    /// Default: 25MB
    pub max_file_size: u64,
    /// Maximum number of upload requests processed concurrently.
    /// Set to 0 for unlimited.
    /// Default: 0 (unlimited)
    pub max_concurrent_uploads: usize,
    /// Maximum number of uploads that can wait in queue for a slot.
    /// When this limit is reached, new uploads receive HTTP 429 immediately.
    /// Set to 0 for an unlimited waiting queue.
    /// Default: 20
    pub max_waiting_uploads: usize,
    /// Maximum time in seconds to wait for an upload slot before returning HTTP 429.
    /// Set to 0 to reject immediately when no slot is available.
    /// Default: 60
    pub max_upload_wait_secs: u64,
}

impl Default for UploadLimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 100 * 1024 * 1024, // 100MB
            max_file_size: 25 * 1024 * 1024,     // 25MB
            max_concurrent_uploads: 0,
            max_waiting_uploads: 20,
            max_upload_wait_secs: 60,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(
                Url::parse("http://localhost:3000").expect("static URL is valid"),
            )],
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            storage: StorageConfig::default(),
            uploads: UploadsConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(Error::Internal {
                operation: "validate config: storage.root cannot be empty".to_string(),
            });
        }

        let public_path = self.storage.public_path.trim_end_matches('/');
        if !self.storage.public_path.starts_with('/') || public_path.is_empty() {
            return Err(Error::Internal {
                operation: format!(
                    "validate config: storage.public_path ({}) must start with '/' and name a prefix other than '/'",
                    self.storage.public_path
                ),
            });
        }

        if self.storage.write_concurrency == 0 {
            return Err(Error::Internal {
                operation: "validate config: storage.write_concurrency must be at least 1".to_string(),
            });
        }

        if self.uploads.form_field.is_empty() {
            return Err(Error::Internal {
                operation: "validate config: uploads.form_field cannot be empty".to_string(),
            });
        }

        let limits = &self.limits.uploads;
        if limits.max_request_size == 0 || limits.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "validate config: limits.uploads.max_request_size and max_file_size must be greater than 0".to_string(),
            });
        }

        if limits.max_file_size > limits.max_request_size {
            return Err(Error::Internal {
                operation: format!(
                    "validate config: max_file_size ({}) cannot be greater than max_request_size ({})",
                    limits.max_file_size, limits.max_request_size
                ),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "validate config: cors.allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values; INTAKE_CONFIG is the CLI's own variable
            .merge(Env::prefixed("INTAKE_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
