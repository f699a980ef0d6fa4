use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::verify::VerificationPolicy;

pub const DEFAULT_SETTINGS_REL_PATH: &str = "config/hdr.settings.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("static/uploads"),
            processed_dir: PathBuf::from("static/processed"),
            assets_dir: PathBuf::from("assets"),
            max_upload_bytes: 32 * 1024 * 1024,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Rebase relative directories onto `app_root`.
    pub fn resolved_against(mut self, app_root: &Path) -> Self {
        self.upload_dir = absolutize(app_root, self.upload_dir);
        self.processed_dir = absolutize(app_root, self.processed_dir);
        self.assets_dir = absolutize(app_root, self.assets_dir);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub tool_program: String,
    pub profile_file_name: String,
    pub max_working_dimension: u32,
    pub gain: f32,
    pub highlight_exponent: f32,
    /// `0` disables the limit.
    pub transform_timeout_ms: u64,
    pub verification: VerificationPolicy,
    pub remove_working_artifact: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tool_program: String::from("magick"),
            profile_file_name: String::from("Profile ICC 2020.icc"),
            max_working_dimension: 1024,
            gain: 1.5,
            highlight_exponent: 0.9,
            transform_timeout_ms: 120_000,
            verification: VerificationPolicy::BestEffort,
            remove_working_artifact: true,
        }
    }
}

impl PipelineConfig {
    pub fn transform_timeout(&self) -> Option<Duration> {
        (self.transform_timeout_ms > 0).then(|| Duration::from_millis(self.transform_timeout_ms))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to read config '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse config TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("config field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },
}

/// Loads the TOML settings for `app_root`.
///
/// An explicit path must exist. Without one, `config/hdr.settings.toml` is
/// read when present and defaults are used otherwise.
pub fn load_app_config(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<AppConfig, ConfigError> {
    let explicit = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| absolutize(app_root, PathBuf::from(v)));

    let config = match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            parse_config_file(path.as_path())?
        }
        None => {
            let default_path = app_root.join(DEFAULT_SETTINGS_REL_PATH);
            if default_path.is_file() {
                parse_config_file(default_path.as_path())?
            } else {
                AppConfig::default()
            }
        }
    };

    validate_config(&config)?;
    Ok(config.resolved_against(app_root))
}

pub fn parse_config_str(raw: &str, path_label: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str::<AppConfig>(raw).map_err(|e| ConfigError::ParseToml {
        path: path_label.to_string(),
        message: e.to_string(),
    })
}

fn parse_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_config_str(raw.as_str(), path.display().to_string().as_str())
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.max_upload_bytes == 0 {
        return Err(invalid("max_upload_bytes", "must be positive"));
    }
    let pipeline = &config.pipeline;
    if pipeline.tool_program.trim().is_empty() {
        return Err(invalid("pipeline.tool_program", "must not be empty"));
    }
    if pipeline.max_working_dimension == 0 {
        return Err(invalid("pipeline.max_working_dimension", "must be positive"));
    }
    if !(pipeline.gain.is_finite() && pipeline.gain > 0.0) {
        return Err(invalid("pipeline.gain", "must be a positive number"));
    }
    if !(pipeline.highlight_exponent.is_finite() && pipeline.highlight_exponent > 0.0) {
        return Err(invalid(
            "pipeline.highlight_exponent",
            "must be a positive number",
        ));
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn absolutize(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

/// App root used when `HDR_BACKEND_APP_ROOT` is unset.
pub fn default_app_root_from_manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn resolve_app_root() -> PathBuf {
    std::env::var("HDR_BACKEND_APP_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_app_root_from_manifest_dir)
}

pub fn config_path_from_env() -> Option<String> {
    std::env::var("HDR_BACKEND_CONFIG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
