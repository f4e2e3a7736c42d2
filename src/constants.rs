// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Image defaults
// =============================================================================

/// Quality assigned to images when none is specified
pub const DEFAULT_QUALITY: u32 = 100;

/// Length of a hex-encoded content hash (SHA-1)
pub const CONTENT_HASH_LEN: usize = 40;

/// Format string for the coarse-date locality key (yyyymmdd)
pub const COARSE_DATE_FORMAT: &str = "%Y%m%d";

// =============================================================================
// Upload defaults
// =============================================================================

/// Default maximum accepted image size (12 MiB)
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 12 * 1024 * 1024;

/// File extensions accepted by default
pub const DEFAULT_ALLOWED_EXTS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif"];

// =============================================================================
// Transform defaults
// =============================================================================

/// Default number of concurrent transform workers
pub const DEFAULT_TRANSFORM_WORKERS: usize = 4;

/// Minimum source width (px) for a watermark to be applied at all
pub const DEFAULT_MIN_WATERMARK_IMAGE_WIDTH: u32 = 460;

/// Default watermark opacity (0.0 transparent - 1.0 opaque)
pub const DEFAULT_WATERMARK_OPACITY: f32 = 0.5;

/// Default scratch directory for pipeline runs
pub const DEFAULT_TMP_DIR: &str = "/tmp";

// =============================================================================
// Fetch defaults
// =============================================================================

/// Default timeout for URL imports in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
