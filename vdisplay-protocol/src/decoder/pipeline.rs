//! Decoder attachment state machine
//!
//! Owns the decoder handle for one display session. Binary frames from the
//! control channel arrive on the I/O task while `attach`/`detach`/capture
//! come from the UI side, so all state sits behind one mutex that is never
//! held across an await.
//!
//! SPS/PPS (csd0/csd1) survive detach and decoder faults. The server may
//! only send them once per connection, and losing them would leave a
//! re-attached surface black forever.

use super::{DecoderConfig, DecoderFactory, DecoderState, RenderSurface, RgbaFrame, VideoDecoder};
use crate::bitstream::{self, NAL_TYPE_IDR, NAL_TYPE_PPS, NAL_TYPE_SPS};
use crate::control::FrameSink;
use crate::display::VideoDimensions;
use crate::{DisplayError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on frames buffered while waiting for SPS/PPS
const MAX_PENDING_FRAMES: usize = 300;

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Binary frames handed to the pipeline
    pub frames_received: u64,
    /// Frames successfully submitted to a decoder
    pub frames_submitted: u64,
    /// Frames discarded (no surface, or pending queue overflow)
    pub frames_dropped: u64,
    /// Decoders constructed
    pub decoders_created: u64,
    /// Feed/drain failures that released the decoder
    pub faults: u64,
}

struct PipelineInner {
    state: DecoderState,
    decoder: Option<Box<dyn VideoDecoder>>,
    surface: Option<Arc<dyn RenderSurface>>,
    dimensions: Option<VideoDimensions>,
    csd0: Option<Vec<u8>>,
    csd1: Option<Vec<u8>>,
    // Set once SPS/PPS were captured in the current decoder generation
    csd0_fresh: bool,
    csd1_fresh: bool,
    pending: VecDeque<Vec<u8>>,
    // After an overflow, buffering resumes at the next IDR
    skip_to_idr: bool,
    stats: PipelineStats,
}

impl PipelineInner {
    fn new() -> Self {
        Self {
            state: DecoderState::Uninitialized,
            decoder: None,
            surface: None,
            dimensions: None,
            csd0: None,
            csd1: None,
            csd0_fresh: false,
            csd1_fresh: false,
            pending: VecDeque::new(),
            skip_to_idr: false,
            stats: PipelineStats::default(),
        }
    }

    fn release_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release();
            debug!("Decoder released");
        }
    }

    /// Drop the decoder and buffered frames; csd0/csd1 stay but the next
    /// SPS/PPS to arrive replaces them
    fn start_generation(&mut self) {
        self.release_decoder();
        self.pending.clear();
        self.skip_to_idr = false;
        self.csd0_fresh = false;
        self.csd1_fresh = false;
    }

    /// Queue a picture until the decoder exists
    fn buffer(&mut self, frame: Vec<u8>, nal_type: Option<u8>) {
        let is_idr = nal_type == Some(NAL_TYPE_IDR);
        if is_idr {
            self.skip_to_idr = false;
        } else if self.skip_to_idr {
            self.stats.frames_dropped += 1;
            return;
        }

        if self.pending.len() >= MAX_PENDING_FRAMES {
            // Buffered pictures all depend on the oldest IDR, so drop them
            // together and restart from a fresh one
            warn!(
                "Pending frame queue full ({} frames), waiting for next IDR",
                MAX_PENDING_FRAMES
            );
            self.stats.frames_dropped += self.pending.len() as u64;
            self.pending.clear();
            if !is_idr {
                self.skip_to_idr = true;
                self.stats.frames_dropped += 1;
                return;
            }
        }
        self.pending.push_back(frame);
    }

    fn on_frame(&mut self, factory: &dyn DecoderFactory, frame: &[u8]) {
        self.stats.frames_received += 1;
        let data = bitstream::to_annex_b(frame);

        if self.decoder.is_some() {
            self.feed(&data);
            return;
        }

        let nal_type = bitstream::nal_unit_type(&data);
        match nal_type {
            Some(NAL_TYPE_SPS) => {
                if !self.csd0_fresh {
                    debug!("Captured SPS ({} bytes)", data.len());
                    self.csd0 = Some(data.into_owned());
                    self.csd0_fresh = true;
                }
            }
            Some(NAL_TYPE_PPS) => {
                if !self.csd1_fresh {
                    debug!("Captured PPS ({} bytes)", data.len());
                    self.csd1 = Some(data.into_owned());
                    self.csd1_fresh = true;
                }
            }
            _ if self.state == DecoderState::Uninitialized => {
                self.stats.frames_dropped += 1;
                return;
            }
            _ => self.buffer(data.into_owned(), nal_type),
        }

        if self.state != DecoderState::Uninitialized {
            self.try_construct(factory);
        }
    }

    fn try_construct(&mut self, factory: &dyn DecoderFactory) {
        let (Some(csd0), Some(csd1)) = (self.csd0.as_deref(), self.csd1.as_deref()) else {
            return;
        };
        let Some(surface) = self.surface.clone() else {
            return;
        };
        let Some(dimensions) = self.dimensions.filter(|d| !d.is_empty()) else {
            return;
        };
        if !surface.is_valid() {
            warn!("Render surface is no longer valid, not constructing decoder");
            return;
        }

        let config = DecoderConfig {
            surface,
            dimensions,
            csd0,
            csd1,
        };

        match factory.create(config) {
            Ok(decoder) => {
                self.decoder = Some(decoder);
                self.state = DecoderState::Ready;
                self.stats.decoders_created += 1;
                info!(
                    "Decoder ready at {} ({} buffered frames)",
                    dimensions,
                    self.pending.len()
                );

                while let Some(frame) = self.pending.pop_front() {
                    if !self.feed(&frame) {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to construct decoder: {}", e);
            }
        }
    }

    /// Submit one frame and drain output. Returns false if the decoder faulted.
    fn feed(&mut self, data: &[u8]) -> bool {
        let Some(decoder) = self.decoder.as_mut() else {
            return false;
        };

        let timestamp_us = chrono::Utc::now().timestamp_micros();
        let result = decoder
            .feed(data, timestamp_us)
            .and_then(|()| decoder.drain());

        match result {
            Ok(rendered) => {
                self.stats.frames_submitted += 1;
                if rendered > 0 {
                    debug!("Released {} decoded buffer(s) for render", rendered);
                }
                true
            }
            Err(e) => {
                warn!("Decoder fault, releasing decoder: {}", e);
                self.start_generation();
                self.state = DecoderState::Faulted;
                self.stats.faults += 1;
                false
            }
        }
    }
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        self.release_decoder();
    }
}

/// Drives a [`VideoDecoder`] from the live H.264 stream
pub struct DecoderPipeline {
    factory: Arc<dyn DecoderFactory>,
    inner: Mutex<PipelineInner>,
}

impl DecoderPipeline {
    /// Create a pipeline that builds decoders with `factory`
    pub fn new(factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(PipelineInner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a render surface and start a new decoder generation.
    ///
    /// Any previous decoder is released. Previously captured SPS/PPS are
    /// kept so the stream can resume without the server resending them.
    pub fn attach(&self, surface: Arc<dyn RenderSurface>, dimensions: VideoDimensions) {
        let mut inner = self.lock();
        inner.start_generation();
        inner.surface = Some(surface);
        inner.dimensions = Some(dimensions);
        inner.state = DecoderState::AwaitingConfig;
        info!("Decoder pipeline attached at {}", dimensions);
    }

    /// Release the decoder and forget the surface. SPS/PPS are kept.
    pub fn detach(&self) {
        let mut inner = self.lock();
        inner.start_generation();
        inner.surface = None;
        inner.dimensions = None;
        inner.state = DecoderState::Uninitialized;
        info!("Decoder pipeline detached");
    }

    /// Detach and discard SPS/PPS. Used on full subsystem shutdown.
    pub fn reset(&self) {
        self.detach();
        let mut inner = self.lock();
        inner.csd0 = None;
        inner.csd1 = None;
        debug!("Decoder configuration cleared");
    }

    /// Handle one binary frame from the server
    pub fn on_frame(&self, frame: &[u8]) {
        let mut inner = self.lock();
        inner.on_frame(self.factory.as_ref(), frame);
    }

    pub fn state(&self) -> DecoderState {
        self.lock().state
    }

    pub fn stats(&self) -> PipelineStats {
        self.lock().stats
    }

    pub fn dimensions(&self) -> Option<VideoDimensions> {
        self.lock().dimensions
    }

    /// Whether both SPS and PPS are known
    pub fn has_config(&self) -> bool {
        let inner = self.lock();
        inner.csd0.is_some() && inner.csd1.is_some()
    }

    /// Copy the picture currently shown on the attached surface.
    ///
    /// The surface and dimensions are read under the lock; the pixel copy
    /// itself runs outside it, bounded by `timeout`.
    pub async fn capture_frame(&self, timeout: Duration) -> Result<RgbaFrame> {
        let (surface, dimensions) = {
            let inner = self.lock();
            (inner.surface.clone(), inner.dimensions)
        };

        let surface = surface.ok_or(DisplayError::NoSurface)?;
        let VideoDimensions { width, height } = dimensions
            .filter(|d| !d.is_empty())
            .ok_or(DisplayError::NoDimensions)?;

        let data = tokio::time::timeout(timeout, surface.copy_pixels(width, height))
            .await
            .map_err(|_| DisplayError::Timeout(timeout))??;

        let expected = RgbaFrame::expected_len(width, height);
        if data.len() != expected {
            return Err(DisplayError::capture(format!(
                "Surface returned {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        Ok(RgbaFrame {
            width,
            height,
            data,
        })
    }
}

impl FrameSink for DecoderPipeline {
    fn on_frame(&self, frame: &[u8]) {
        DecoderPipeline::on_frame(self, frame);
    }
}
