//! Remote Virtual Display Protocol
//!
//! Client side of the Android virtual display server: an off-screen
//! display hosted by a companion process, mirrored as an H.264 stream and
//! controlled with text commands over one loopback WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │ ServerLifecycleManager│────▶│  ControlChannel  │────▶│ DecoderPipeline │
//! │ (spawn / kill / ping) │     │  (WebSocket)     │     │ (SPS/PPS, feed) │
//! └───────────────────────┘     └──────────────────┘     └─────────────────┘
//!                                        │                        │
//!                                        │ acks, screenshots      │ decoded pictures
//!                                        ▼                        ▼
//!                                     callers               RenderSurface
//! ```
//!
//! [`VirtualDisplayContext`] wires the three together and bounds their
//! lifetime with `init`/`shutdown`.

pub mod bitstream;
pub mod context;
pub mod control;
pub mod decoder;
pub mod display;
pub mod server;

mod error;
pub use error::{DisplayError, Result};

pub use context::VirtualDisplayContext;
pub use control::{ChannelConfig, Command, ConnectionState, ControlChannel, FrameSink};
pub use decoder::{
    DecoderConfig, DecoderFactory, DecoderPipeline, DecoderState, PipelineStats, RenderSurface,
    RgbaFrame, VideoDecoder,
};
pub use display::{align_dimension, DisplayConfig, VideoDimensions, VirtualDisplayId};
pub use server::{CommandRunner, LifecycleConfig, LocalShell, ServerLifecycleManager};

/// Loopback port the display server listens on
pub const DEFAULT_SERVER_PORT: u16 = 8765;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_SERVER_PORT, 8765);
        assert!(ChannelConfig::default().url.ends_with(":8765"));
        assert_eq!(LifecycleConfig::default().port, DEFAULT_SERVER_PORT);
    }
}
