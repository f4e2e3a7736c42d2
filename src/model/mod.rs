//! Image data model
//!
//! Two tagged record types share one persisted document shape:
//!
//! - `OriginalImage` — immutable source image keyed by the SHA-1 hash of its
//!   bytes. Identical content never produces two records.
//! - `DerivedVariant` — a resized/recompressed/watermarked derivative, keyed
//!   by the canonical variant key of its parameters.
//!
//! The persisted shape (`ImageRecord`) mirrors the store document:
//!
//! ```text
//! {
//!   _id: '441547af33d49c4f37461fa87a5bb502b40687f2', // content hash / variant key
//!   filename: '441547af33d49c4f37461fa87a5bb502b40687f2',
//!   date: '20260805',       // coarse locality key
//!   type: 'image/jpeg',
//!   length: 77031,
//!   quality: 100,
//!   width: 200,
//!   height: 300,
//!   watermark: '0',
//!   created: ISODate(...),
//!   url: 'http://.../a.jpg', // originals imported from a URL only
//!   parent: '4415...',       // variants only
//!   data: <binary>
//! }
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::constants::{COARSE_DATE_FORMAT, CONTENT_HASH_LEN, DEFAULT_QUALITY};

/// Hex-encoded SHA-1 of the image bytes; the primary key for originals.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Coarse locality key (`yyyymmdd`) used as the secondary index prefix.
pub fn coarse_date(at: DateTime<Utc>) -> String {
    at.format(COARSE_DATE_FORMAT).to_string()
}

/// True for a well-formed 40-hex content hash or variant key.
pub fn is_content_hash(s: &str) -> bool {
    s.len() == CONTENT_HASH_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Map a tool-reported format name to a mime type.
pub fn mime_for_format(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Map a filename or URL extension to a mime type.
pub fn mime_for_extension(name: &str) -> Option<&'static str> {
    let ext = name.rsplit('.').next()?;
    let ext = ext.split(|c| c == '?' || c == '#').next().unwrap_or(ext);
    match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// File extension for a mime type, used for scratch-file naming.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

/// Common capability surface shared by originals and variants.
pub trait ImageDocument {
    fn id(&self) -> &str;
    fn data(&self) -> &Bytes;
    fn mime_type(&self) -> &str;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// Persisted document shape, common to both record kinds.
///
/// Binary payload is carried out-of-band of serde: the wire driver decides
/// how to encode it, and JSON views (`ImageMeta`) strip it entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub filename: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub watermark: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub length: u64,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip)]
    pub data: Bytes,
}

impl ImageRecord {
    /// True when this record is an original (not a derived variant).
    pub fn is_original(&self) -> bool {
        self.parent.is_none()
    }

    /// Validate the record against the schema, returning the names of all
    /// violated fields. An empty list means the record is valid.
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        let mut invalid = Vec::new();
        if !is_content_hash(&self.id) {
            invalid.push("_id");
        }
        if self.filename.is_empty() {
            invalid.push("filename");
        }
        if self.date.len() != 8 || !self.date.bytes().all(|b| b.is_ascii_digit()) {
            invalid.push("date");
        }
        if !self.mime_type.starts_with("image/") {
            invalid.push("type");
        }
        if self.data.is_empty() || self.length != self.data.len() as u64 {
            invalid.push("length");
        }
        if !(1..=100).contains(&self.quality) {
            invalid.push("quality");
        }
        if self.watermark != "0" && self.watermark != "1" {
            invalid.push("watermark");
        }
        if let Some(parent) = &self.parent {
            if !is_content_hash(parent) {
                invalid.push("parent");
            }
        }
        invalid
    }

    /// Clone with the binary payload stripped (metadata projection).
    pub fn without_data(&self) -> ImageRecord {
        ImageRecord {
            data: Bytes::new(),
            ..self.clone()
        }
    }
}

impl ImageDocument for ImageRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn data(&self) -> &Bytes {
        &self.data
    }
    fn mime_type(&self) -> &str {
        &self.mime_type
    }
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
}

/// An immutable source image, content-addressed by SHA-1.
#[derive(Debug, Clone)]
pub struct OriginalImage {
    pub id: String,
    pub data: Bytes,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub created: DateTime<Utc>,
    pub date: String,
    pub url: Option<String>,
    pub name: Option<String>,
}

impl OriginalImage {
    /// Build an original from raw bytes; the id is derived from content.
    pub fn from_bytes(
        data: Bytes,
        mime_type: String,
        width: u32,
        height: u32,
        name: Option<String>,
        url: Option<String>,
        created: DateTime<Utc>,
    ) -> Self {
        let id = content_hash(&data);
        let date = coarse_date(created);
        Self {
            id,
            data,
            mime_type,
            width,
            height,
            quality: DEFAULT_QUALITY,
            created,
            date,
            url,
            name,
        }
    }

    pub fn from_record(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            data: record.data,
            mime_type: record.mime_type,
            width: record.width,
            height: record.height,
            quality: record.quality,
            created: record.created,
            date: record.date,
            url: record.url,
            name: record.name,
        }
    }

    pub fn into_record(self) -> ImageRecord {
        let length = self.data.len() as u64;
        ImageRecord {
            filename: self.id.clone(),
            id: self.id,
            date: self.date,
            name: self.name,
            width: self.width,
            height: self.height,
            quality: self.quality,
            watermark: "0".to_string(),
            mime_type: self.mime_type,
            length,
            created: self.created,
            url: self.url,
            parent: None,
            data: self.data,
        }
    }
}

impl ImageDocument for OriginalImage {
    fn id(&self) -> &str {
        &self.id
    }
    fn data(&self) -> &Bytes {
        &self.data
    }
    fn mime_type(&self) -> &str {
        &self.mime_type
    }
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
}

/// A derivative of one original, keyed by its canonical parameter key.
/// Write-once: never invalidated or recomputed once present.
#[derive(Debug, Clone)]
pub struct DerivedVariant {
    pub variant_key: String,
    pub parent_id: String,
    pub data: Bytes,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub watermark: bool,
    pub created: DateTime<Utc>,
    pub date: String,
}

impl DerivedVariant {
    pub fn into_record(self) -> ImageRecord {
        let length = self.data.len() as u64;
        ImageRecord {
            filename: self.variant_key.clone(),
            id: self.variant_key,
            date: self.date,
            name: None,
            width: self.width,
            height: self.height,
            quality: self.quality,
            watermark: if self.watermark { "1" } else { "0" }.to_string(),
            mime_type: self.mime_type,
            length,
            created: self.created,
            url: None,
            parent: Some(self.parent_id),
            data: self.data,
        }
    }
}

impl ImageDocument for DerivedVariant {
    fn id(&self) -> &str {
        &self.variant_key
    }
    fn data(&self) -> &Bytes {
        &self.data
    }
    fn mime_type(&self) -> &str {
        &self.mime_type
    }
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
}

/// JSON view of a record with the binary payload stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub id: String,
    pub filename: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub watermark: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub length: u64,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl From<&ImageRecord> for ImageMeta {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            date: record.date.clone(),
            name: record.name.clone(),
            width: record.width,
            height: record.height,
            quality: record.quality,
            watermark: record.watermark.clone(),
            mime_type: record.mime_type.clone(),
            length: record.length,
            created: record.created,
            url: record.url.clone(),
            parent: record.parent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap()
    }

    fn sample_original() -> OriginalImage {
        OriginalImage::from_bytes(
            Bytes::from_static(b"sample image bytes"),
            "image/jpeg".to_string(),
            400,
            300,
            Some("test.jpg".to_string()),
            None,
            sample_created(),
        )
    }

    #[test]
    fn test_content_hash_is_40_hex() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 40);
        assert!(is_content_hash(&hash));
    }

    #[test]
    fn test_content_hash_deterministic() {
        assert_eq!(content_hash(b"same bytes"), content_hash(b"same bytes"));
        assert_ne!(content_hash(b"same bytes"), content_hash(b"other bytes"));
    }

    #[test]
    fn test_coarse_date_format() {
        assert_eq!(coarse_date(sample_created()), "20260805");
    }

    #[test]
    fn test_is_content_hash_rejects_bad_input() {
        assert!(!is_content_hash("short"));
        assert!(!is_content_hash(&"g".repeat(40)));
        assert!(is_content_hash(&"a1".repeat(20)));
    }

    #[test]
    fn test_mime_for_format() {
        assert_eq!(mime_for_format("JPEG"), "image/jpeg");
        assert_eq!(mime_for_format("png"), "image/png");
        assert_eq!(mime_for_format("gif"), "image/gif");
        assert_eq!(mime_for_format("tga"), "application/octet-stream");
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(
            mime_for_extension("http://example.com/photo.JPG"),
            Some("image/jpeg")
        );
        assert_eq!(mime_for_extension("a.png"), Some("image/png"));
        assert_eq!(mime_for_extension("archive.zip"), None);
    }

    #[test]
    fn test_original_record_roundtrip() {
        let original = sample_original();
        let id = original.id.clone();
        let record = original.into_record();
        assert_eq!(record.id, id);
        assert_eq!(record.filename, id);
        assert_eq!(record.quality, 100);
        assert_eq!(record.watermark, "0");
        assert!(record.is_original());
        assert!(record.invalid_fields().is_empty());

        let back = OriginalImage::from_record(record);
        assert_eq!(back.id, id);
        assert_eq!(back.width, 400);
    }

    #[test]
    fn test_variant_record_shape() {
        let parent = sample_original();
        let variant = DerivedVariant {
            variant_key: content_hash(b"key material"),
            parent_id: parent.id.clone(),
            data: Bytes::from_static(b"variant bytes"),
            mime_type: "image/jpeg".to_string(),
            width: 200,
            height: 150,
            quality: 80,
            watermark: true,
            created: sample_created(),
            date: "20260805".to_string(),
        };
        let record = variant.into_record();
        assert!(!record.is_original());
        assert_eq!(record.parent.as_deref(), Some(parent.id.as_str()));
        assert_eq!(record.watermark, "1");
        assert!(record.invalid_fields().is_empty());
    }

    #[test]
    fn test_invalid_fields_reported_by_name() {
        let mut record = sample_original().into_record();
        record.id = "not-a-hash".to_string();
        record.quality = 0;
        record.watermark = "maybe".to_string();
        record.length = 999; // does not match data
        let invalid = record.invalid_fields();
        assert!(invalid.contains(&"_id"));
        assert!(invalid.contains(&"quality"));
        assert!(invalid.contains(&"watermark"));
        assert!(invalid.contains(&"length"));
        assert!(!invalid.contains(&"type"));
    }

    #[test]
    fn test_meta_strips_data() {
        let record = sample_original().into_record();
        let meta = ImageMeta::from(&record);
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["type"], "image/jpeg");
        assert_eq!(json["width"], 400);
    }

    #[test]
    fn test_without_data_keeps_metadata() {
        let record = sample_original().into_record();
        let stripped = record.without_data();
        assert!(stripped.data.is_empty());
        assert_eq!(stripped.length, record.length);
        assert_eq!(stripped.id, record.id);
    }
}
