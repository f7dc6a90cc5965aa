//! In-memory render surface
//!
//! Holds the most recent picture presented by a software decoder so it can
//! be captured. Hardware-style decoders that never present leave it empty.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use vdisplay_protocol::{DisplayError, RenderSurface, Result, RgbaFrame};

#[derive(Default)]
pub struct FrameBufferSurface {
    latest: Mutex<Option<RgbaFrame>>,
    released: AtomicBool,
    presented: AtomicU64,
}

impl FrameBufferSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the surface unusable; decoders are no longer built against it
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Number of pictures presented so far
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RenderSurface for FrameBufferSurface {
    fn is_valid(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    async fn copy_pixels(&self, width: u32, height: u32) -> Result<Vec<u8>> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let frame = latest
            .as_ref()
            .ok_or_else(|| DisplayError::capture("No picture has been presented yet"))?;

        if frame.width != width || frame.height != height {
            return Err(DisplayError::capture(format!(
                "Surface holds a {}x{} picture, expected {}x{}",
                frame.width, frame.height, width, height
            )));
        }
        Ok(frame.data.clone())
    }

    fn present(&self, frame: RgbaFrame) {
        if !self.is_valid() {
            return;
        }
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> RgbaFrame {
        RgbaFrame {
            width,
            height,
            data: vec![0xFF; RgbaFrame::expected_len(width, height)],
        }
    }

    #[tokio::test]
    async fn test_copy_returns_latest_picture() {
        let surface = FrameBufferSurface::new();
        assert!(surface.copy_pixels(4, 2).await.is_err());

        surface.present(frame(4, 2));
        let pixels = surface.copy_pixels(4, 2).await.unwrap();
        assert_eq!(pixels.len(), 32);
        assert_eq!(surface.presented(), 1);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_rejected() {
        let surface = FrameBufferSurface::new();
        surface.present(frame(8, 8));
        assert!(surface.copy_pixels(16, 8).await.is_err());
    }

    #[tokio::test]
    async fn test_released_surface_ignores_pictures() {
        let surface = FrameBufferSurface::new();
        surface.release();
        assert!(!surface.is_valid());

        surface.present(frame(2, 2));
        assert_eq!(surface.presented(), 0);
        assert!(surface.copy_pixels(2, 2).await.is_err());
    }
}
