//! Elementary stream recorder
//!
//! A decoder backend that writes the normalized Annex-B stream to disk
//! instead of decoding it. The output plays in any H.264-aware player
//! (`ffplay capture.h264`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use vdisplay_protocol::{DecoderConfig, DecoderFactory, Result, VideoDecoder};

type SharedWriter = Arc<Mutex<BufWriter<File>>>;

/// Creates [`RecordingDecoder`]s that all append to one file
pub struct RecordingDecoderFactory {
    path: PathBuf,
    writer: SharedWriter,
}

impl RecordingDecoderFactory {
    /// Truncate or create `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        info!("Recording H.264 stream to {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DecoderFactory for RecordingDecoderFactory {
    fn create(&self, config: DecoderConfig<'_>) -> Result<Box<dyn VideoDecoder>> {
        // Every decoder generation starts with its parameter sets so the
        // file stays decodable across reattaches
        {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(config.csd0)?;
            writer.write_all(config.csd1)?;
        }
        debug!("Recording decoder created at {}", config.dimensions);

        Ok(Box::new(RecordingDecoder {
            writer: self.writer.clone(),
            unflushed: 0,
        }))
    }
}

pub struct RecordingDecoder {
    writer: SharedWriter,
    unflushed: usize,
}

impl VideoDecoder for RecordingDecoder {
    fn feed(&mut self, data: &[u8], _timestamp_us: i64) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(data)?;
        self.unflushed += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<usize> {
        let written = std::mem::take(&mut self.unflushed);
        if written > 0 {
            self.writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .flush()?;
        }
        // Nothing is ever rendered
        Ok(0)
    }

    fn release(&mut self) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.flush() {
            warn!("Failed to flush recording: {}", e);
        }
    }
}
