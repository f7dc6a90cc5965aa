//! Video decoding
//!
//! The hardware decoder and the surface it renders into are platform
//! resources. They are reached only through the traits in this module so
//! the [`DecoderPipeline`] state machine can run against any backend.

mod pipeline;

pub use pipeline::{DecoderPipeline, PipelineStats};

use crate::display::VideoDimensions;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Decoder pipeline state
///
/// ```text
/// Uninitialized
///   ↓ (attach)
/// AwaitingConfig ──(SPS + PPS known)──→ Ready
///   ↑ (attach)                           ↓ (feed/drain error)
///                                      Faulted ──(next frame)──→ Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No surface attached
    Uninitialized,
    /// Surface attached, waiting for SPS/PPS
    AwaitingConfig,
    /// Decoder constructed and consuming frames
    Ready,
    /// Decoder released after a fault; SPS/PPS retained
    Faulted,
}

/// Decoded picture in RGBA8 layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaFrame {
    /// Expected buffer length for the given dimensions
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

/// Surface that decoded pictures are rendered into
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Whether the surface can still be rendered into
    fn is_valid(&self) -> bool {
        true
    }

    /// Copy the current surface contents into an RGBA buffer.
    ///
    /// May wait on the compositor; callers bound it with a timeout.
    async fn copy_pixels(&self, width: u32, height: u32) -> Result<Vec<u8>>;

    /// Receive a picture produced by a software decoder.
    ///
    /// Hardware decoders render directly and never call this.
    fn present(&self, _frame: RgbaFrame) {}
}

/// Parameters for constructing a decoder
pub struct DecoderConfig<'a> {
    pub surface: Arc<dyn RenderSurface>,
    pub dimensions: VideoDimensions,
    /// SPS in Annex-B layout
    pub csd0: &'a [u8],
    /// PPS in Annex-B layout
    pub csd1: &'a [u8],
}

/// Handle to a constructed H.264 decoder
pub trait VideoDecoder: Send {
    /// Submit one Annex-B access unit
    fn feed(&mut self, data: &[u8], timestamp_us: i64) -> Result<()>;

    /// Release every decoded output buffer for rendering.
    ///
    /// Returns the number of buffers released.
    fn drain(&mut self) -> Result<usize>;

    /// Release the underlying decoder resources
    fn release(&mut self);
}

/// Creates decoders once SPS/PPS are known
pub trait DecoderFactory: Send + Sync {
    fn create(&self, config: DecoderConfig<'_>) -> Result<Box<dyn VideoDecoder>>;
}
