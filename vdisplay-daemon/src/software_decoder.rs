//! Software H.264 decoding with OpenH264
//!
//! Decoded pictures are converted to RGBA and presented to the surface on
//! drain, matching how a hardware decoder releases output buffers.

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use std::sync::Arc;
use tracing::debug;
use vdisplay_protocol::{
    DecoderConfig, DecoderFactory, DisplayError, RenderSurface, Result, RgbaFrame, VideoDecoder,
};

#[derive(Debug, Default)]
pub struct SoftwareDecoderFactory;

impl DecoderFactory for SoftwareDecoderFactory {
    fn create(&self, config: DecoderConfig<'_>) -> Result<Box<dyn VideoDecoder>> {
        let decoder = Decoder::new().map_err(|e| DisplayError::decoder(e.to_string()))?;
        let mut decoder = SoftwareDecoder {
            decoder,
            surface: config.surface,
            ready: Vec::new(),
        };

        // Prime with the parameter sets; they produce no picture
        decoder.feed(config.csd0, 0)?;
        decoder.feed(config.csd1, 0)?;
        debug!("Software decoder created at {}", config.dimensions);
        Ok(Box::new(decoder))
    }
}

pub struct SoftwareDecoder {
    decoder: Decoder,
    surface: Arc<dyn RenderSurface>,
    ready: Vec<RgbaFrame>,
}

impl VideoDecoder for SoftwareDecoder {
    fn feed(&mut self, data: &[u8], _timestamp_us: i64) -> Result<()> {
        let picture = self
            .decoder
            .decode(data)
            .map_err(|e| DisplayError::decoder(e.to_string()))?;

        if let Some(yuv) = picture {
            let (width, height) = yuv.dimensions();
            let mut rgba = vec![0u8; width * height * 4];
            yuv.write_rgba8(&mut rgba);
            self.ready.push(RgbaFrame {
                width: width as u32,
                height: height as u32,
                data: rgba,
            });
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<usize> {
        let count = self.ready.len();
        for frame in self.ready.drain(..) {
            self.surface.present(frame);
        }
        Ok(count)
    }

    fn release(&mut self) {
        self.ready.clear();
    }
}
