//! Variant parameter canonicalization and key generation
//!
//! Every place that names a variant — cache lookups, persistence, and the
//! authorization hash — goes through `CanonicalParams`. Divergent
//! canonicalization between producer and validator is a correctness bug
//! class, so the defaulting rules live here and nowhere else.

pub mod signature;

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::constants::DEFAULT_QUALITY;
use crate::error::ServiceError;

pub use signature::{compute_auth_hash, validate_auth_hash};

/// Raw transformation options as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u32>,
    pub watermark: Option<bool>,
}

impl VariantOptions {
    /// Parse from query parameters (`width`, `height`, `quality`, `watermark`).
    ///
    /// Unknown keys are ignored; malformed values are rejected before any I/O.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, ServiceError> {
        let mut options = Self::default();
        if let Some(w) = params.get("width") {
            options.width = Some(parse_dimension("width", w)?);
        }
        if let Some(h) = params.get("height") {
            options.height = Some(parse_dimension("height", h)?);
        }
        if let Some(q) = params.get("quality") {
            let quality: u32 = q
                .parse()
                .map_err(|_| ServiceError::invalid_input("quality", "must be a number"))?;
            if !(1..=100).contains(&quality) {
                return Err(ServiceError::invalid_input("quality", "must be 1-100"));
            }
            options.quality = Some(quality);
        }
        if let Some(wm) = params.get("watermark") {
            options.watermark = Some(wm == "1" || wm == "true");
        }
        Ok(options)
    }

    /// True when the caller asked for any resizing.
    pub fn wants_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }
}

fn parse_dimension(field: &'static str, value: &str) -> Result<u32, ServiceError> {
    let px: u32 = value
        .parse()
        .map_err(|_| ServiceError::invalid_input(field, "must be a number"))?;
    if px == 0 {
        return Err(ServiceError::invalid_input(field, "must be positive"));
    }
    Ok(px)
}

/// Fully canonicalized variant parameters.
///
/// Defaults are applied once, here: quality 100, watermark off, missing
/// dimensions zero. Equal logical parameters always canonicalize to the
/// same value regardless of how the caller spelled them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalParams {
    pub parent_id: String,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub watermark: bool,
}

impl CanonicalParams {
    pub fn canonicalize(parent_id: &str, options: &VariantOptions) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            width: options.width.unwrap_or(0),
            height: options.height.unwrap_or(0),
            quality: options.quality.unwrap_or(DEFAULT_QUALITY),
            watermark: options.watermark.unwrap_or(false),
        }
    }

    /// Watermark flag in its persisted form.
    pub fn watermark_flag(&self) -> &'static str {
        if self.watermark {
            "1"
        } else {
            "0"
        }
    }

    /// The canonical cache/storage key: SHA-1 over a fixed, sorted
    /// serialization of the parameter fields.
    pub fn variant_key(&self) -> String {
        let canonical = format!(
            "height={}&id={}&quality={}&watermark={}&width={}",
            self.height,
            self.parent_id,
            self.quality,
            self.watermark_flag(),
            self.width,
        );
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}
