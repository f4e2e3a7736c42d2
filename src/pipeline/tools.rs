//! External transform tools
//!
//! Pixel-level work is delegated to out-of-process utilities invoked as
//! black boxes: a general image-transform tool (identify / resize /
//! composite) and a lossless optimizer. Both sit behind traits so the
//! pipeline can be exercised without the binaries installed.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::Gravity;

#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool exited non-zero
    #[error("{program} exited with status {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        status: i32,
        stderr: String,
    },

    /// The tool could not be launched at all
    #[error("failed to launch {program}: {reason}")]
    Spawn {
        program: &'static str,
        reason: String,
    },

    /// The tool ran but its metadata output was unreadable
    #[error("unreadable image metadata: {0}")]
    BadMetadata(String),
}

/// Metadata reported by the transform tool for an image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Declared format name, e.g. "JPEG"
    pub format: String,
}

/// Out-of-process image transform operations, applied in place.
#[async_trait]
pub trait ImageTool: Send + Sync {
    async fn identify(&self, path: &Path) -> Result<ImageInfo, ToolError>;

    async fn resize(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u32,
    ) -> Result<(), ToolError>;

    async fn composite(
        &self,
        base: &Path,
        overlay: &Path,
        gravity: Gravity,
        opacity: f32,
    ) -> Result<(), ToolError>;
}

/// Out-of-process lossless recompression, applied in place.
#[async_trait]
pub trait LosslessOptimizer: Send + Sync {
    async fn optimize(&self, path: &Path, max_quality: u32) -> Result<(), ToolError>;
}

async fn run_tool(program: &'static str, args: &[&str]) -> Result<Output, ToolError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ToolError::Spawn {
            program,
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(ToolError::CommandFailed {
            program,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// GraphicsMagick-backed transform tool (`gm`).
#[derive(Debug, Clone, Default)]
pub struct GraphicsMagickTool;

impl GraphicsMagickTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageTool for GraphicsMagickTool {
    async fn identify(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        let path = path.to_string_lossy();
        let output = run_tool("gm", &["identify", "-format", "%w %h %m", path.as_ref()]).await?;
        parse_identify(&String::from_utf8_lossy(&output.stdout))
    }

    async fn resize(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u32,
    ) -> Result<(), ToolError> {
        let path = path.to_string_lossy();
        let geometry = format!("{}x{}", width, height);
        let quality = quality.to_string();
        run_tool(
            "gm",
            &[
                "convert",
                path.as_ref(),
                "-resize",
                geometry.as_str(),
                "-quality",
                quality.as_str(),
                "+profile",
                "*",
                path.as_ref(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn composite(
        &self,
        base: &Path,
        overlay: &Path,
        gravity: Gravity,
        opacity: f32,
    ) -> Result<(), ToolError> {
        let base = base.to_string_lossy();
        let overlay = overlay.to_string_lossy();
        let dissolve = ((opacity.clamp(0.0, 1.0) * 100.0).round() as u32).to_string();
        run_tool(
            "gm",
            &[
                "composite",
                "-dissolve",
                dissolve.as_str(),
                "-gravity",
                gravity.as_arg(),
                overlay.as_ref(),
                base.as_ref(),
                base.as_ref(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// First line of `identify -format "%w %h %m"` output.
fn parse_identify(stdout: &str) -> Result<ImageInfo, ToolError> {
    let line = stdout
        .lines()
        .next()
        .ok_or_else(|| ToolError::BadMetadata("empty identify output".to_string()))?;
    let mut parts = line.split_whitespace();
    let width = parts
        .next()
        .and_then(|w| w.parse().ok())
        .ok_or_else(|| ToolError::BadMetadata(format!("bad width in '{}'", line)))?;
    let height = parts
        .next()
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| ToolError::BadMetadata(format!("bad height in '{}'", line)))?;
    let format = parts
        .next()
        .ok_or_else(|| ToolError::BadMetadata(format!("missing format in '{}'", line)))?
        .to_string();
    Ok(ImageInfo {
        width,
        height,
        format,
    })
}

/// jpegoptim-backed lossless optimizer.
#[derive(Debug, Clone, Default)]
pub struct JpegoptimOptimizer;

impl JpegoptimOptimizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LosslessOptimizer for JpegoptimOptimizer {
    async fn optimize(&self, path: &Path, max_quality: u32) -> Result<(), ToolError> {
        let path = path.to_string_lossy();
        let max = format!("-m{}", max_quality);
        run_tool("jpegoptim", &[max.as_str(), path.as_ref()]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify_ok() {
        let info = parse_identify("400 300 JPEG\n").unwrap();
        assert_eq!(
            info,
            ImageInfo {
                width: 400,
                height: 300,
                format: "JPEG".to_string()
            }
        );
    }

    #[test]
    fn test_parse_identify_rejects_garbage() {
        assert!(matches!(
            parse_identify(""),
            Err(ToolError::BadMetadata(_))
        ));
        assert!(matches!(
            parse_identify("400\n"),
            Err(ToolError::BadMetadata(_))
        ));
        assert!(matches!(
            parse_identify("w h JPEG\n"),
            Err(ToolError::BadMetadata(_))
        ));
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::CommandFailed {
            program: "gm",
            status: 1,
            stderr: "no decode delegate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "gm exited with status 1: no decode delegate"
        );
    }
}
