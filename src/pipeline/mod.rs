//! Transform pipeline
//!
//! Five ordered stages over one scratch file per run:
//!
//! A. Materialize — write the original bytes to a fresh scratch path
//! B. Compress — lossless optimizer pass when quality drops (or is forced)
//! C. Resize — aspect-ratio completion of the missing dimension, then the
//!    external resize at the target quality
//! D. Watermark — composite the configured overlay, with an upscale /
//!    composite / downscale dance for images narrower than the overlay's
//!    natural application width
//! E. Persist & Cleanup — read back, persist via the idempotent store
//!    adapter, delete the scratch file
//!
//! The pipeline is strictly sequential and short-circuits on the first
//! typed failure. Durable state is only touched in stage E, so earlier
//! stages need no rollback; the scratch guard cleans up on every exit.
//! Runs hold a permit from a fixed-size worker pool for their whole
//! duration so unbounded parallel transforms cannot destroy serving
//! throughput.

pub mod mock;
pub mod scratch;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::{Config, TransformConfig, WatermarkConfig};
use crate::metrics::ServiceMetrics;
use crate::model::{coarse_date, extension_for_mime, mime_for_format, DerivedVariant, ImageRecord};
use crate::store::{BlobStore, StoreError};
use crate::variant::CanonicalParams;

pub use mock::{MockImageTool, MockOptimizer};
pub use scratch::ScratchFile;
pub use tools::{
    GraphicsMagickTool, ImageInfo, ImageTool, JpegoptimOptimizer, LosslessOptimizer, ToolError,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to materialize scratch file: {0}")]
    Materialize(#[source] std::io::Error),

    #[error("lossless compression failed: {0}")]
    Compress(#[source] ToolError),

    #[error("resize failed: {0}")]
    Resize(#[source] ToolError),

    #[error("watermark failed: {0}")]
    Watermark(#[source] ToolError),

    #[error("failed to read transformed output: {0}")]
    ReadBack(#[source] std::io::Error),

    #[error("unreadable output metadata: {0}")]
    Identify(#[source] ToolError),

    #[error("failed to persist variant: {0}")]
    Persist(#[from] StoreError),

    #[error("transform worker pool unavailable")]
    WorkerPool,
}

/// Runs transform jobs against original images and persists the results.
pub struct TransformPipeline {
    tool: Arc<dyn ImageTool>,
    optimizer: Arc<dyn LosslessOptimizer>,
    store: BlobStore,
    tmp_dir: PathBuf,
    transform: TransformConfig,
    watermark: Option<WatermarkConfig>,
    workers: Arc<Semaphore>,
}

impl TransformPipeline {
    pub fn new(
        tool: Arc<dyn ImageTool>,
        optimizer: Arc<dyn LosslessOptimizer>,
        store: BlobStore,
        config: &Config,
    ) -> Self {
        Self {
            tool,
            optimizer,
            store,
            tmp_dir: config.tmp_dir.clone(),
            transform: config.transform.clone(),
            watermark: config.watermark.clone(),
            workers: Arc::new(Semaphore::new(config.transform.workers)),
        }
    }

    /// Run the pipeline for one parameter set and persist the result.
    ///
    /// `force_lossless` requests a stage-B optimizer pass even when the
    /// target quality equals the source quality (URL-import recompression).
    pub async fn run(
        &self,
        original: &ImageRecord,
        params: &CanonicalParams,
        force_lossless: bool,
    ) -> Result<ImageRecord, PipelineError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| PipelineError::WorkerPool)?;

        let metrics = ServiceMetrics::global();
        metrics.pipeline_runs.inc();

        let result = self.run_stages(original, params, force_lossless).await;
        if let Err(e) = &result {
            metrics.pipeline_failures.inc();
            tracing::warn!(
                parent_id = %original.id,
                variant_key = %params.variant_key(),
                error = %e,
                "transform pipeline failed"
            );
        }
        result
    }

    async fn run_stages(
        &self,
        original: &ImageRecord,
        params: &CanonicalParams,
        force_lossless: bool,
    ) -> Result<ImageRecord, PipelineError> {
        // Stage A: materialize the original onto the scratch path
        let scratch = ScratchFile::create(
            &self.tmp_dir,
            extension_for_mime(&original.mime_type),
            &original.data,
        )
        .await
        .map_err(PipelineError::Materialize)?;

        // Stage B: lossless recompression
        if force_lossless || params.quality < original.quality {
            self.optimizer
                .optimize(scratch.path(), params.quality)
                .await
                .map_err(PipelineError::Compress)?;
        }

        // Stage C: resize with aspect-ratio completion
        let resize_requested = params.width > 0 || params.height > 0;
        let mut target = (original.width, original.height);
        if resize_requested {
            target = complete_dimensions(original.width, original.height, params.width, params.height);
            if !self.transform.allow_upscale {
                target = (
                    target.0.min(original.width).max(1),
                    target.1.min(original.height).max(1),
                );
            }
            self.tool
                .resize(scratch.path(), target.0, target.1, params.quality)
                .await
                .map_err(PipelineError::Resize)?;
        }

        // Stage D: watermark
        let wants_watermark =
            params.watermark || (self.transform.auto_watermark_on_resize && resize_requested);
        let mut watermarked = false;
        if wants_watermark {
            if let Some(wm) = &self.watermark {
                if original.width > self.transform.min_watermark_image_width {
                    self.apply_watermark(&scratch, wm, target, params.quality).await?;
                    watermarked = true;
                }
            }
        }

        // Stage E: persist & cleanup
        let data = scratch.read().await.map_err(PipelineError::ReadBack)?;
        let info = self
            .tool
            .identify(scratch.path())
            .await
            .map_err(PipelineError::Identify)?;

        // Mime type is inherited from the original unless the transform
        // produced a different format.
        let tool_mime = mime_for_format(&info.format);
        let mime_type = if tool_mime.starts_with("image/") && tool_mime != original.mime_type {
            tool_mime.to_string()
        } else {
            original.mime_type.clone()
        };

        let created = Utc::now();
        let variant = DerivedVariant {
            variant_key: params.variant_key(),
            parent_id: original.id.clone(),
            data,
            mime_type,
            width: info.width,
            height: info.height,
            quality: params.quality,
            watermark: params.watermark || watermarked,
            created,
            date: coarse_date(created),
        };

        let persisted = self.store.insert_if_absent(variant.into_record()).await;
        if let Err(e) = scratch.remove().await {
            tracing::warn!(error = %e, "failed to remove scratch file after persist");
        }
        Ok(persisted?)
    }

    /// Composite the overlay onto the scratch image.
    ///
    /// Images narrower than the overlay's natural application width are
    /// upscaled to that width first, composited, then resized back to the
    /// originally requested target dimensions.
    async fn apply_watermark(
        &self,
        scratch: &ScratchFile,
        wm: &WatermarkConfig,
        target: (u32, u32),
        quality: u32,
    ) -> Result<(), PipelineError> {
        let min_width = self.transform.min_watermark_image_width;
        let (width, height) = target;
        if width < min_width {
            let up_height = scale_to_width(width, height, min_width);
            self.tool
                .resize(scratch.path(), min_width, up_height, quality)
                .await
                .map_err(PipelineError::Watermark)?;
            self.tool
                .composite(scratch.path(), &wm.path, wm.gravity, wm.opacity)
                .await
                .map_err(PipelineError::Watermark)?;
            self.tool
                .resize(scratch.path(), width, height, quality)
                .await
                .map_err(PipelineError::Watermark)?;
        } else {
            self.tool
                .composite(scratch.path(), &wm.path, wm.gravity, wm.opacity)
                .await
                .map_err(PipelineError::Watermark)?;
        }
        Ok(())
    }
}

/// Complete missing target dimensions by preserving the source aspect ratio:
/// `missing = known * other_source_dimension / known_source_dimension`.
pub fn complete_dimensions(src_w: u32, src_h: u32, req_w: u32, req_h: u32) -> (u32, u32) {
    match (req_w, req_h) {
        (0, 0) => (src_w, src_h),
        (w, 0) => {
            if src_w == 0 {
                (w, src_h)
            } else {
                (w, ratio(w, src_h, src_w))
            }
        }
        (0, h) => {
            if src_h == 0 {
                (src_w, h)
            } else {
                (ratio(h, src_w, src_h), h)
            }
        }
        (w, h) => (w, h),
    }
}

fn ratio(known: u32, other_src: u32, known_src: u32) -> u32 {
    let scaled = (known as f64 * other_src as f64 / known_src as f64).round() as u32;
    scaled.max(1)
}

/// Scale height to match a new width, preserving aspect ratio.
fn scale_to_width(width: u32, height: u32, new_width: u32) -> u32 {
    if width == 0 {
        return height.max(1);
    }
    ratio(new_width, height, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Gravity, WatermarkConfig};
    use crate::model::OriginalImage;
    use crate::store::MemoryStore;
    use crate::variant::VariantOptions;
    use bytes::Bytes;

    fn test_config(tmp_dir: &std::path::Path) -> Config {
        Config {
            private_key: "a-long-enough-test-secret".to_string(),
            deny_original: false,
            tmp_dir: tmp_dir.to_path_buf(),
            transform: Default::default(),
            upload: Default::default(),
            fetch: Default::default(),
            watermark: None,
        }
    }

    fn original(width: u32, height: u32) -> ImageRecord {
        OriginalImage::from_bytes(
            Bytes::from_static(b"original image bytes"),
            "image/jpeg".to_string(),
            width,
            height,
            None,
            None,
            Utc::now(),
        )
        .into_record()
    }

    fn params(parent: &str, options: VariantOptions) -> CanonicalParams {
        CanonicalParams::canonicalize(parent, &options)
    }

    struct Harness {
        pipeline: TransformPipeline,
        tool: MockImageTool,
        optimizer: MockOptimizer,
        memory: MemoryStore,
        _dir: tempfile::TempDir,
    }

    fn harness(src_w: u32, src_h: u32, configure: impl FnOnce(&mut Config)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        configure(&mut config);
        let tool = MockImageTool::new(src_w, src_h, "JPEG");
        let optimizer = MockOptimizer::new();
        let memory = MemoryStore::new();
        let pipeline = TransformPipeline::new(
            Arc::new(tool.clone()),
            Arc::new(optimizer.clone()),
            BlobStore::new(Arc::new(memory.clone())),
            &config,
        );
        Harness {
            pipeline,
            tool,
            optimizer,
            memory,
            _dir: dir,
        }
    }

    #[test]
    fn test_complete_dimensions_width_only() {
        assert_eq!(complete_dimensions(400, 300, 200, 0), (200, 150));
    }

    #[test]
    fn test_complete_dimensions_height_only() {
        assert_eq!(complete_dimensions(400, 300, 0, 150), (200, 150));
    }

    #[test]
    fn test_complete_dimensions_both_given() {
        assert_eq!(complete_dimensions(400, 300, 120, 90), (120, 90));
    }

    #[test]
    fn test_complete_dimensions_none_given() {
        assert_eq!(complete_dimensions(400, 300, 0, 0), (400, 300));
    }

    #[tokio::test]
    async fn test_resize_run_persists_variant() {
        let h = harness(400, 300, |_| {});
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(200),
                ..Default::default()
            },
        );

        let stored = h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(stored.id, p.variant_key());
        assert_eq!(stored.parent.as_deref(), Some(src.id.as_str()));
        assert_eq!(stored.width, 200);
        assert_eq!(stored.height, 150);
        assert_eq!(h.tool.resizes(), vec![(200, 150, 100)]);
        assert_eq!(h.memory.record_count(), 1);
        // Quality not reduced, no lossless pass requested
        assert!(h.optimizer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_quality_drop_triggers_optimizer() {
        let h = harness(400, 300, |_| {});
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(200),
                quality: Some(70),
                ..Default::default()
            },
        );

        h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.optimizer.calls(), vec![70]);
        assert_eq!(h.tool.resizes(), vec![(200, 150, 70)]);
    }

    #[tokio::test]
    async fn test_forced_lossless_pass_without_resize() {
        let h = harness(400, 300, |_| {});
        let src = original(400, 300);
        let p = params(&src.id, VariantOptions::default());

        let stored = h.pipeline.run(&src, &p, true).await.unwrap();
        assert_eq!(h.optimizer.calls(), vec![100]);
        assert!(h.tool.resizes().is_empty());
        assert_eq!(stored.width, 400);
        assert_eq!(stored.height, 300);
    }

    #[tokio::test]
    async fn test_upscale_clamped_by_default() {
        let h = harness(400, 300, |_| {});
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(800),
                height: Some(600),
                ..Default::default()
            },
        );

        let stored = h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.resizes(), vec![(400, 300, 100)]);
        assert_eq!(stored.width, 400);
    }

    #[tokio::test]
    async fn test_upscale_allowed_when_configured() {
        let h = harness(400, 300, |c| c.transform.allow_upscale = true);
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(800),
                ..Default::default()
            },
        );

        h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.resizes(), vec![(800, 600, 100)]);
    }

    #[tokio::test]
    async fn test_resize_failure_cleans_scratch_and_persists_nothing() {
        let h = harness(400, 300, |_| {});
        h.tool.set_fail_resize(true);
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(200),
                ..Default::default()
            },
        );

        let result = h.pipeline.run(&src, &p, false).await;
        assert!(matches!(result, Err(PipelineError::Resize(_))));
        assert_eq!(h.memory.record_count(), 0);
        // The scratch guard must have removed the file on the failure path.
        let leftovers: Vec<_> = std::fs::read_dir(h._dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_compress_failure_aborts_before_resize() {
        let h = harness(400, 300, |_| {});
        h.optimizer.set_fail(true);
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(200),
                quality: Some(70),
                ..Default::default()
            },
        );

        let result = h.pipeline.run(&src, &p, false).await;
        assert!(matches!(result, Err(PipelineError::Compress(_))));
        assert!(h.tool.resizes().is_empty());
        assert_eq!(h.memory.record_count(), 0);
    }

    fn watermark_config(dir: &std::path::Path) -> WatermarkConfig {
        WatermarkConfig {
            path: dir.join("watermark.png"),
            opacity: 0.5,
            gravity: Gravity::SouthEast,
        }
    }

    #[tokio::test]
    async fn test_watermark_wide_image_composites_directly() {
        let h = harness(1000, 800, |c| {
            c.watermark = Some(watermark_config(&c.tmp_dir));
        });
        let src = original(1000, 800);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(500),
                watermark: Some(true),
                ..Default::default()
            },
        );

        let stored = h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.composite_count(), 1);
        // Only the requested resize, no upscale dance at 500px wide
        assert_eq!(h.tool.resizes(), vec![(500, 400, 100)]);
        assert_eq!(stored.watermark, "1");
    }

    #[tokio::test]
    async fn test_watermark_narrow_target_upscales_and_back() {
        let h = harness(1000, 800, |c| {
            c.watermark = Some(watermark_config(&c.tmp_dir));
        });
        let src = original(1000, 800);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(200),
                watermark: Some(true),
                ..Default::default()
            },
        );

        h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.composite_count(), 1);
        // requested resize, upscale to the minimum width, resize back
        assert_eq!(
            h.tool.resizes(),
            vec![(200, 160, 100), (460, 368, 100), (200, 160, 100)]
        );
    }

    #[tokio::test]
    async fn test_watermark_skipped_for_narrow_source() {
        let h = harness(300, 200, |c| {
            c.watermark = Some(watermark_config(&c.tmp_dir));
        });
        let src = original(300, 200);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(150),
                watermark: Some(true),
                ..Default::default()
            },
        );

        let stored = h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.composite_count(), 0);
        // The flag was requested, so the key and record still carry it.
        assert_eq!(stored.watermark, "1");
    }

    #[tokio::test]
    async fn test_watermark_skipped_without_asset() {
        let h = harness(1000, 800, |_| {});
        let src = original(1000, 800);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(500),
                watermark: Some(true),
                ..Default::default()
            },
        );

        h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.composite_count(), 0);
    }

    #[tokio::test]
    async fn test_auto_watermark_on_resize() {
        let h = harness(1000, 800, |c| {
            c.transform.auto_watermark_on_resize = true;
            c.watermark = Some(watermark_config(&c.tmp_dir));
        });
        let src = original(1000, 800);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(500),
                ..Default::default()
            },
        );

        let stored = h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(h.tool.composite_count(), 1);
        assert_eq!(stored.watermark, "1");
    }

    #[tokio::test]
    async fn test_racing_runs_both_succeed() {
        let h = harness(400, 300, |_| {});
        let src = original(400, 300);
        let p = params(
            &src.id,
            VariantOptions {
                width: Some(200),
                ..Default::default()
            },
        );

        let first = h.pipeline.run(&src, &p, false).await.unwrap();
        // A redundant second run persists nothing new and returns the
        // existing record.
        let second = h.pipeline.run(&src, &p, false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created, second.created);
        assert_eq!(h.memory.record_count(), 1);
    }
}
