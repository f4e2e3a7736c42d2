//! Mock transform tools for testing
//!
//! Record every invocation, track the simulated image dimensions, and fail
//! on demand at a chosen operation so failure paths can be exercised
//! without the external binaries.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::tools::{ImageInfo, ImageTool, LosslessOptimizer, ToolError};
use crate::config::Gravity;

fn simulated_failure(program: &'static str) -> ToolError {
    ToolError::CommandFailed {
        program,
        status: 1,
        stderr: "simulated failure".to_string(),
    }
}

/// Mock transform tool backed by simulated image metadata.
#[derive(Clone)]
pub struct MockImageTool {
    info: Arc<RwLock<ImageInfo>>,
    identify_calls: Arc<AtomicU64>,
    resize_calls: Arc<RwLock<Vec<(u32, u32, u32)>>>,
    composite_calls: Arc<AtomicU64>,
    fail_identify: Arc<RwLock<bool>>,
    fail_resize: Arc<RwLock<bool>>,
    fail_composite: Arc<RwLock<bool>>,
}

impl MockImageTool {
    /// Tool whose simulated source image is `width` x `height`.
    pub fn new(width: u32, height: u32, format: &str) -> Self {
        Self {
            info: Arc::new(RwLock::new(ImageInfo {
                width,
                height,
                format: format.to_string(),
            })),
            identify_calls: Arc::new(AtomicU64::new(0)),
            resize_calls: Arc::new(RwLock::new(Vec::new())),
            composite_calls: Arc::new(AtomicU64::new(0)),
            fail_identify: Arc::new(RwLock::new(false)),
            fail_resize: Arc::new(RwLock::new(false)),
            fail_composite: Arc::new(RwLock::new(false)),
        }
    }

    pub fn set_fail_identify(&self, enabled: bool) {
        *self.fail_identify.write() = enabled;
    }

    pub fn set_fail_resize(&self, enabled: bool) {
        *self.fail_resize.write() = enabled;
    }

    pub fn set_fail_composite(&self, enabled: bool) {
        *self.fail_composite.write() = enabled;
    }

    pub fn identify_count(&self) -> u64 {
        self.identify_calls.load(Ordering::Relaxed)
    }

    /// Recorded `(width, height, quality)` of every resize invocation.
    pub fn resizes(&self) -> Vec<(u32, u32, u32)> {
        self.resize_calls.read().clone()
    }

    pub fn composite_count(&self) -> u64 {
        self.composite_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ImageTool for MockImageTool {
    async fn identify(&self, _path: &Path) -> Result<ImageInfo, ToolError> {
        self.identify_calls.fetch_add(1, Ordering::Relaxed);
        if *self.fail_identify.read() {
            return Err(simulated_failure("gm"));
        }
        Ok(self.info.read().clone())
    }

    async fn resize(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u32,
    ) -> Result<(), ToolError> {
        self.resize_calls.write().push((width, height, quality));
        if *self.fail_resize.read() {
            return Err(simulated_failure("gm"));
        }
        {
            let mut info = self.info.write();
            info.width = width;
            info.height = height;
        }
        tokio::fs::write(path, format!("resized-{}x{}-q{}", width, height, quality))
            .await
            .map_err(|e| ToolError::Spawn {
                program: "gm",
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn composite(
        &self,
        base: &Path,
        _overlay: &Path,
        gravity: Gravity,
        opacity: f32,
    ) -> Result<(), ToolError> {
        self.composite_calls.fetch_add(1, Ordering::Relaxed);
        if *self.fail_composite.read() {
            return Err(simulated_failure("gm"));
        }
        let mut data = tokio::fs::read(base).await.unwrap_or_default();
        data.extend_from_slice(
            format!("+wm({},{})", gravity.as_arg(), opacity).as_bytes(),
        );
        tokio::fs::write(base, data).await.map_err(|e| ToolError::Spawn {
            program: "gm",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Mock lossless optimizer.
#[derive(Clone, Default)]
pub struct MockOptimizer {
    calls: Arc<RwLock<Vec<u32>>>,
    fail: Arc<RwLock<bool>>,
}

impl MockOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, enabled: bool) {
        *self.fail.write() = enabled;
    }

    /// Recorded max-quality argument of every invocation.
    pub fn calls(&self) -> Vec<u32> {
        self.calls.read().clone()
    }
}

#[async_trait]
impl LosslessOptimizer for MockOptimizer {
    async fn optimize(&self, path: &Path, max_quality: u32) -> Result<(), ToolError> {
        self.calls.write().push(max_quality);
        if *self.fail.read() {
            return Err(simulated_failure("jpegoptim"));
        }
        let mut data = tokio::fs::read(path).await.unwrap_or_default();
        data.extend_from_slice(format!("+opt(m{})", max_quality).as_bytes());
        tokio::fs::write(path, data).await.map_err(|e| ToolError::Spawn {
            program: "jpegoptim",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}
