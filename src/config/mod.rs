// Configuration module

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ALLOWED_EXTS, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MAX_IMAGE_SIZE,
    DEFAULT_MIN_WATERMARK_IMAGE_WIDTH, DEFAULT_TMP_DIR, DEFAULT_TRANSFORM_WORKERS,
    DEFAULT_WATERMARK_OPACITY,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared secret for authorization hashes
    pub private_key: String,

    /// Reject requests for originals; only signed variant requests succeed
    #[serde(default)]
    pub deny_original: bool,

    /// Scratch directory for pipeline runs
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<WatermarkConfig>,
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TMP_DIR)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Fixed size of the transform worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Permit upscaling beyond the source dimensions
    #[serde(default)]
    pub allow_upscale: bool,

    /// Imply the watermark flag for every resize request
    #[serde(default)]
    pub auto_watermark_on_resize: bool,

    /// Sources narrower than this are never watermarked
    #[serde(default = "default_min_watermark_image_width")]
    pub min_watermark_image_width: u32,
}

fn default_workers() -> usize {
    DEFAULT_TRANSFORM_WORKERS
}

fn default_min_watermark_image_width() -> u32 {
    DEFAULT_MIN_WATERMARK_IMAGE_WIDTH
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            allow_upscale: false,
            auto_watermark_on_resize: false,
            min_watermark_image_width: default_min_watermark_image_width(),
        }
    }
}

/// Gravity anchor for watermark composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    Center,
    East,
    SouthWest,
    South,
    #[default]
    SouthEast,
}

impl Gravity {
    /// Argument form understood by the external transform tool.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::NorthWest => "NorthWest",
            Self::North => "North",
            Self::NorthEast => "NorthEast",
            Self::West => "West",
            Self::Center => "Center",
            Self::East => "East",
            Self::SouthWest => "SouthWest",
            Self::South => "South",
            Self::SouthEast => "SouthEast",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Path to the watermark overlay asset
    pub path: PathBuf,

    /// Composite opacity, 0.0 (transparent) to 1.0 (opaque)
    #[serde(default = "default_opacity")]
    pub opacity: f32,

    /// Composite anchor (default: south-east)
    #[serde(default)]
    pub gravity: Gravity,
}

fn default_opacity() -> f32 {
    DEFAULT_WATERMARK_OPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Accepted file extensions, dot included
    #[serde(default = "default_allowed_exts")]
    pub allowed_exts: Vec<String>,

    /// Maximum accepted payload size in bytes
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,
}

fn default_allowed_exts() -> Vec<String> {
    DEFAULT_ALLOWED_EXTS.iter().map(|s| s.to_string()).collect()
}

fn default_max_image_size() -> usize {
    DEFAULT_MAX_IMAGE_SIZE
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_exts: default_allowed_exts(),
            max_image_size: default_max_image_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout for URL imports in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        // Now perform the substitution (we know all vars exist)
        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        let config: Config = serde_yaml::from_str(&substituted).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.private_key.is_empty() {
            return Err("private_key must not be empty".to_string());
        }
        if self.private_key.len() < 16 {
            return Err("private_key must be at least 16 characters".to_string());
        }
        if self.transform.workers == 0 {
            return Err("transform.workers must be at least 1".to_string());
        }
        if self.transform.min_watermark_image_width == 0 {
            return Err("transform.min_watermark_image_width must be positive".to_string());
        }
        if self.upload.max_image_size == 0 {
            return Err("upload.max_image_size must be positive".to_string());
        }
        for ext in &self.upload.allowed_exts {
            if !ext.starts_with('.') {
                return Err(format!(
                    "upload.allowed_exts entries must start with '.', got '{}'",
                    ext
                ));
            }
        }
        if self.fetch.timeout_secs == 0 {
            return Err("fetch.timeout_secs must be positive".to_string());
        }
        if let Some(watermark) = &self.watermark {
            if !watermark.opacity.is_finite() || !(0.0..=1.0).contains(&watermark.opacity) {
                return Err(format!(
                    "watermark.opacity must be between 0.0 and 1.0, got {}",
                    watermark.opacity
                ));
            }
            if watermark.path.as_os_str().is_empty() {
                return Err("watermark.path must not be empty".to_string());
            }
        }
        Ok(())
    }
}
