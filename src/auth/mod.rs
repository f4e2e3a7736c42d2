//! Authorization Guard
//!
//! A stateless decision function deciding whether a request may read the
//! original image or trigger lazy computation of a variant. Rejections are
//! indistinguishable from "not found" at the boundary so responses never
//! act as an existence oracle.
//!
//! Decision table:
//!
//! | request shape | outcome |
//! |---|---|
//! | 40-hex id, no dimensions | serve the original (unless denied by config) |
//! | id + dimensions + valid hash | compute that exact variant |
//! | id + dimensions + missing/invalid hash | deny |

use std::collections::HashMap;

use crate::error::ServiceError;
use crate::model::is_content_hash;
use crate::variant::{compute_auth_hash, validate_auth_hash, CanonicalParams, VariantOptions};

/// A parsed variant-by-id request.
#[derive(Debug, Clone)]
pub struct VariantRequest {
    /// 40-hex content hash of the parent image
    pub id: String,
    pub options: VariantOptions,
    /// Authorization hash supplied by the caller, if any
    pub hash: Option<String>,
}

impl VariantRequest {
    /// Build a request from the path id and query parameters.
    pub fn from_query(id: &str, params: &HashMap<String, String>) -> Result<Self, ServiceError> {
        Ok(Self {
            id: id.to_string(),
            options: VariantOptions::from_query(params)?,
            hash: params.get("hash").cloned(),
        })
    }
}

/// Outcome of the guard for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Serve the stored original directly
    ServeOriginal,
    /// Authorize lazy computation of this exact variant
    ComputeVariant(CanonicalParams),
    /// Reject; surfaced to the caller as NotFound
    Deny,
}

/// Decide what a request is allowed to do.
pub fn authorize(request: &VariantRequest, secret: &str, deny_original: bool) -> AccessDecision {
    if !is_content_hash(&request.id) {
        return AccessDecision::Deny;
    }

    if !request.options.wants_resize() {
        if deny_original {
            return AccessDecision::Deny;
        }
        return AccessDecision::ServeOriginal;
    }

    let params = CanonicalParams::canonicalize(&request.id, &request.options);
    match &request.hash {
        Some(supplied) if validate_auth_hash(supplied, &params, secret) => {
            AccessDecision::ComputeVariant(params)
        }
        _ => AccessDecision::Deny,
    }
}

/// Build the signed URL a secret holder hands to clients for a thumbnail.
///
/// The query carries the canonicalized parameters plus their authorization
/// hash, e.g. `4415...f2.jpg?quality=100&width=120&height=90&hash=ab12...`.
pub fn thumb_url(id: &str, options: &VariantOptions, secret: &str, ext: &str) -> String {
    let params = CanonicalParams::canonicalize(id, options);
    let hash = compute_auth_hash(&params, secret);
    let mut url = format!(
        "{}{}?quality={}&width={}&height={}",
        id, ext, params.quality, params.width, params.height
    );
    if params.watermark {
        url.push_str("&watermark=1");
    }
    url.push_str("&hash=");
    url.push_str(&hash);
    url
}
