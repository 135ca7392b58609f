//! 屏幕截图接口
//!
//! 截图本身由外部程序完成；核心只需要拿到 PNG 字节或失败。

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Screen capture is disabled")]
    Disabled,

    #[error("Capture failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError>;
}

/// 未配置截图来源
#[derive(Debug, Default)]
pub struct NoCapture;

#[async_trait]
impl ScreenCapture for NoCapture {
    async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError> {
        Err(CaptureError::Disabled)
    }
}

/// 读取外部截图程序写出的图片文件
#[derive(Debug)]
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScreenCapture for FileCapture {
    async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CaptureError::Failed(format!("{}: {}", self.path.display(), e)))?;
        if bytes.is_empty() {
            return Err(CaptureError::Failed("empty image".into()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.png");
        let capture = FileCapture::new(&path);
        assert!(matches!(capture.capture_screen().await, Err(CaptureError::Failed(_))));

        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        assert_eq!(capture.capture_screen().await.unwrap().len(), 4);
        assert_eq!(NoCapture.capture_screen().await, Err(CaptureError::Disabled));
    }
}
