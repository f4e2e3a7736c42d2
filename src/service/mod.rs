//! Service facade
//!
//! `LazyImageService` is the explicit service object holding the store
//! handle, the shared secret, and all configuration, constructed once and
//! passed into every handler. The HTTP layer is an external collaborator:
//! handlers call `get_image` / `process_from_url` / `upload` and hand the
//! typed results to their response sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use crate::auth::{self, VariantRequest};
use crate::cache::DerivedVariantCache;
use crate::config::Config;
use crate::error::ServiceError;
use crate::fetch::{HttpFetcher, RemoteFetcher};
use crate::metrics::ServiceMetrics;
use crate::model::{
    content_hash, extension_for_mime, mime_for_extension, mime_for_format, ImageMeta, ImageRecord,
    OriginalImage,
};
use crate::pipeline::{
    GraphicsMagickTool, ImageTool, JpegoptimOptimizer, LosslessOptimizer, PipelineError,
    ScratchFile, TransformPipeline,
};
use crate::store::{BlobStore, DocumentStore, Projection};
use crate::upload::{self, UploadPayload};
use crate::variant::{CanonicalParams, VariantOptions};

/// Binary response for the external "send as file" sender.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Bytes,
    pub content_type: String,
    pub length: u64,
    pub etag: String,
}

impl ImagePayload {
    fn from_record(record: ImageRecord) -> Self {
        Self {
            etag: record.id,
            content_type: record.mime_type,
            length: record.length,
            data: record.data,
        }
    }
}

/// Options for the process-from-url operation.
#[derive(Debug, Clone)]
pub struct ProcessFromUrlOptions {
    pub url: String,
    pub no_lossless: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u32>,
}

impl ProcessFromUrlOptions {
    /// Parse from query parameters (`url`, `noLossless`, `width`, `height`,
    /// `quality`).
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, ServiceError> {
        let url = params
            .get("url")
            .cloned()
            .ok_or_else(|| ServiceError::invalid_input("url", "query parameter missing"))?;
        let options = VariantOptions::from_query(params)?;
        Ok(Self {
            url,
            no_lossless: params
                .get("noLossless")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(false),
            width: options.width,
            height: options.height,
            quality: options.quality,
        })
    }
}

pub struct LazyImageService {
    config: Config,
    store: BlobStore,
    cache: DerivedVariantCache,
    pipeline: Arc<TransformPipeline>,
    tool: Arc<dyn ImageTool>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl LazyImageService {
    pub async fn new(
        config: Config,
        backend: Arc<dyn DocumentStore>,
        tool: Arc<dyn ImageTool>,
        optimizer: Arc<dyn LosslessOptimizer>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|reason| ServiceError::invalid_input("config", reason))?;

        let store = BlobStore::new(backend);
        store.ensure_indexes().await?;

        let pipeline = Arc::new(TransformPipeline::new(
            tool.clone(),
            optimizer,
            store.clone(),
            &config,
        ));
        let cache = DerivedVariantCache::new(
            store.clone(),
            pipeline.clone(),
            config.private_key.clone(),
            config.deny_original,
        );

        tracing::info!(
            deny_original = config.deny_original,
            workers = config.transform.workers,
            watermark = config.watermark.is_some(),
            "service constructed"
        );

        Ok(Self {
            config,
            store,
            cache,
            pipeline,
            tool,
            fetcher,
        })
    }

    /// Construct with the production tool chain: GraphicsMagick, jpegoptim,
    /// and an HTTP fetcher bounded by the configured timeout.
    pub async fn with_defaults(
        config: Config,
        backend: Arc<dyn DocumentStore>,
    ) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(config.fetch.timeout_secs);
        Self::new(
            config,
            backend,
            Arc::new(GraphicsMagickTool::new()),
            Arc::new(JpegoptimOptimizer::new()),
            Arc::new(HttpFetcher::new(timeout)),
        )
        .await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve an original or lazily computed variant as a binary payload.
    pub async fn get_image(&self, request: &VariantRequest) -> Result<ImagePayload, ServiceError> {
        let record = self.cache.get_or_compute(request).await?;
        Ok(ImagePayload::from_record(record))
    }

    /// Store an uploaded image, deduplicating by content hash. The second
    /// upload of identical bytes returns the first record's metadata.
    pub async fn upload(&self, payload: UploadPayload) -> Result<ImageMeta, ServiceError> {
        let validated = upload::validate(payload, &self.config.upload)?;
        let record = self
            .save_image(validated.data, validated.declared_type, validated.name, None)
            .await?;
        ServiceMetrics::global().uploads.inc();
        Ok(ImageMeta::from(&record))
    }

    /// Import an image from a URL and produce its standard derivatives.
    ///
    /// Returns metadata for the original, the lossless-recompressed variant
    /// (unless `no_lossless`), and the resized variant (when dimensions are
    /// given), with binary payloads stripped.
    pub async fn process_from_url(
        &self,
        opts: &ProcessFromUrlOptions,
    ) -> Result<Vec<ImageMeta>, ServiceError> {
        let original = self.import_from_url(&opts.url).await?;
        let mut results = vec![ImageMeta::from(&original)];

        if !opts.no_lossless {
            let params = CanonicalParams::canonicalize(&original.id, &VariantOptions::default());
            let compressed = self.find_or_run(&original, &params, true).await?;
            results.push(ImageMeta::from(&compressed));
        }

        if opts.width.is_some() || opts.height.is_some() {
            let params = CanonicalParams::canonicalize(
                &original.id,
                &VariantOptions {
                    width: opts.width,
                    height: opts.height,
                    quality: opts.quality,
                    watermark: None,
                },
            );
            let resized = self.find_or_run(&original, &params, false).await?;
            results.push(ImageMeta::from(&resized));
        }

        Ok(results)
    }

    /// Build the signed URL for a thumbnail of a stored image.
    pub fn thumb_url(&self, id: &str, options: &VariantOptions, ext: &str) -> String {
        auth::thumb_url(id, options, &self.config.private_key, ext)
    }

    async fn find_or_run(
        &self,
        original: &ImageRecord,
        params: &CanonicalParams,
        force_lossless: bool,
    ) -> Result<ImageRecord, ServiceError> {
        let metrics = ServiceMetrics::global();
        if let Some(hit) = self
            .store
            .find_by_id(&params.variant_key(), Projection::Full)
            .await?
        {
            metrics.cache_hits.inc();
            return Ok(hit);
        }
        metrics.cache_misses.inc();
        Ok(self.pipeline.run(original, params, force_lossless).await?)
    }

    async fn import_from_url(&self, url: &str) -> Result<ImageRecord, ServiceError> {
        if let Some(existing) = self.store.find_by_url(url).await? {
            tracing::debug!(url, "url already imported");
            return Ok(existing);
        }

        let fetched = self.fetcher.fetch(url).await.map_err(|e| {
            ServiceMetrics::global().fetch_failures.inc();
            ServiceError::UpstreamFetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        ServiceMetrics::global().url_imports.inc();

        let declared = fetched
            .content_type
            .or_else(|| mime_for_extension(url).map(String::from));
        self.save_image(fetched.data, declared, None, Some(url.to_string()))
            .await
    }

    /// Identify, validate and store an original image, deduplicating by
    /// content hash.
    async fn save_image(
        &self,
        data: Bytes,
        declared_type: Option<String>,
        name: Option<String>,
        url: Option<String>,
    ) -> Result<ImageRecord, ServiceError> {
        let id = content_hash(&data);
        if let Some(existing) = self.store.find_by_id(&id, Projection::Full).await? {
            tracing::debug!(id = %id, "identical content already stored");
            return Ok(existing);
        }

        let ext = extension_for_mime(declared_type.as_deref().unwrap_or("image/jpeg"));
        let scratch = ScratchFile::create(&self.config.tmp_dir, ext, &data)
            .await
            .map_err(|e| ServiceError::Transform(PipelineError::Materialize(e)))?;
        let info = self
            .tool
            .identify(scratch.path())
            .await
            .map_err(|e| ServiceError::Transform(PipelineError::Identify(e)))?;
        if let Err(e) = scratch.remove().await {
            tracing::warn!(error = %e, "failed to remove scratch file after identify");
        }

        let tool_mime = mime_for_format(&info.format);
        let mime_type = if tool_mime.starts_with("image/") {
            tool_mime.to_string()
        } else {
            declared_type
                .filter(|t| t.starts_with("image/"))
                .ok_or_else(|| {
                    ServiceError::invalid_input("content-type", "unrecognized image format")
                })?
        };

        let record = OriginalImage::from_bytes(
            data,
            mime_type,
            info.width,
            info.height,
            name,
            url,
            Utc::now(),
        )
        .into_record();

        let invalid = record.invalid_fields();
        if !invalid.is_empty() {
            return Err(ServiceError::invalid_input(
                "image",
                format!("invalid fields: {}", invalid.join(", ")),
            ));
        }

        Ok(self.store.insert_if_absent(record).await?)
    }
}
