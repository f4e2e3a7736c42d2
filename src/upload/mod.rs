//! Upload payload validation
//!
//! The body/multipart parser is an external collaborator; it hands us
//! either parsed `(fields, files[])` or raw bytes plus the
//! content-length / content-type / x-filename headers. Everything here is
//! rejected before any I/O: disallowed extensions, missing content
//! length, non-binary payloads, oversized images.

use std::collections::HashMap;

use bytes::Bytes;

use crate::config::UploadConfig;
use crate::error::ServiceError;

/// One file from a parsed multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// What the external body parser produced.
#[derive(Debug, Clone)]
pub enum UploadPayload {
    /// Parsed multipart form
    Multipart {
        fields: HashMap<String, String>,
        files: Vec<UploadedFile>,
    },
    /// Raw request body plus headers
    Raw {
        data: Bytes,
        content_length: Option<u64>,
        content_type: Option<String>,
        filename: Option<String>,
    },
}

/// Validated upload content ready for identification and storage.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub data: Bytes,
    pub declared_type: Option<String>,
    pub name: Option<String>,
}

/// True when the filename carries an accepted extension.
pub fn is_allowed_ext(filename: &str, config: &UploadConfig) -> bool {
    let lowered = filename.to_lowercase();
    config.allowed_exts.iter().any(|ext| lowered.ends_with(ext))
}

/// Validate a payload against the upload limits.
pub fn validate(payload: UploadPayload, config: &UploadConfig) -> Result<ValidatedUpload, ServiceError> {
    match payload {
        UploadPayload::Multipart { files, .. } => {
            let file = files
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::invalid_input("files", "no file in request"))?;
            if !is_allowed_ext(&file.filename, config) {
                return Err(ServiceError::invalid_input(
                    "filename",
                    format!("invalid file extension: {}", file.filename),
                ));
            }
            check_binary(&file.data, config)?;
            Ok(ValidatedUpload {
                data: file.data,
                declared_type: file.content_type,
                name: Some(file.filename),
            })
        }
        UploadPayload::Raw {
            data,
            content_length,
            content_type,
            filename,
        } => {
            let declared_length = content_length
                .ok_or_else(|| ServiceError::invalid_input("content-length", "header missing"))?;
            if declared_length != data.len() as u64 {
                return Err(ServiceError::invalid_input(
                    "content-length",
                    "does not match body length",
                ));
            }
            if let Some(name) = &filename {
                if !is_allowed_ext(name, config) {
                    return Err(ServiceError::invalid_input(
                        "x-filename",
                        format!("invalid file extension: {}", name),
                    ));
                }
            }
            if let Some(mime) = &content_type {
                if mime.starts_with("text/") {
                    return Err(ServiceError::invalid_input(
                        "content-type",
                        "binary payload required",
                    ));
                }
            }
            check_binary(&data, config)?;
            Ok(ValidatedUpload {
                data,
                declared_type: content_type,
                name: filename,
            })
        }
    }
}

fn check_binary(data: &Bytes, config: &UploadConfig) -> Result<(), ServiceError> {
    if data.is_empty() {
        return Err(ServiceError::invalid_input("data", "empty payload"));
    }
    if data.len() > config.max_image_size {
        return Err(ServiceError::invalid_input(
            "data",
            format!(
                "payload of {} bytes exceeds limit of {} bytes",
                data.len(),
                config.max_image_size
            ),
        ));
    }
    Ok(())
}
