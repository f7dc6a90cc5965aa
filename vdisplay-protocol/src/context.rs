//! Virtual display session context
//!
//! One explicit object owns the server lifecycle, the control socket and
//! the decoder pipeline. It replaces process-wide singletons: create it
//! with [`VirtualDisplayContext::init`], drop it after
//! [`VirtualDisplayContext::shutdown`].

use crate::control::{ChannelConfig, ControlChannel};
use crate::decoder::{DecoderFactory, DecoderPipeline, RenderSurface, RgbaFrame};
use crate::display::{DisplayConfig, VideoDimensions};
use crate::server::{CommandRunner, LifecycleConfig, ServerLifecycleManager};
use crate::{DisplayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct VirtualDisplayContext {
    lifecycle: ServerLifecycleManager,
    channel: ControlChannel,
    pipeline: Arc<DecoderPipeline>,
}

impl VirtualDisplayContext {
    /// Wire the server manager, control channel and decoder pipeline
    pub fn init(
        lifecycle: LifecycleConfig,
        channel: ChannelConfig,
        runner: Arc<dyn CommandRunner>,
        factory: Arc<dyn DecoderFactory>,
    ) -> Self {
        let pipeline = Arc::new(DecoderPipeline::new(factory));
        let channel = ControlChannel::new(channel);
        channel.set_frame_sink(pipeline.clone());

        Self {
            lifecycle: ServerLifecycleManager::new(lifecycle, runner),
            channel,
            pipeline,
        }
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    pub fn pipeline(&self) -> &Arc<DecoderPipeline> {
        &self.pipeline
    }

    pub fn lifecycle(&self) -> &ServerLifecycleManager {
        &self.lifecycle
    }

    /// Start mirroring a new virtual display into `surface`.
    ///
    /// Ensures the server runs, attaches the decoder at the aligned
    /// dimensions and requests the display. Returns the dimensions the
    /// stream will use.
    pub async fn start_display(
        &self,
        surface: Arc<dyn RenderSurface>,
        display: &DisplayConfig,
    ) -> Result<VideoDimensions> {
        if !self.lifecycle.ensure_running().await {
            return Err(DisplayError::Server(
                "Display server is not reachable".to_string(),
            ));
        }
        if !self.channel.ensure_connected().await {
            return Err(DisplayError::NotConnected);
        }

        let dimensions = display.dimensions();
        self.channel.set_frame_sink(self.pipeline.clone());
        self.pipeline.attach(surface, dimensions);

        if !self.channel.create_display(display).await {
            self.pipeline.detach();
            return Err(DisplayError::NotConnected);
        }

        info!("Virtual display session started at {}", dimensions);
        Ok(dimensions)
    }

    /// Tear down the display but keep the connection open
    pub async fn stop_display(&self) -> bool {
        self.pipeline.detach();
        self.channel.destroy_display().await
    }

    pub async fn capture_frame(&self, timeout: Duration) -> Result<RgbaFrame> {
        self.pipeline.capture_frame(timeout).await
    }

    /// End the session: destroy the display, close the socket and drop
    /// all decoder configuration
    pub async fn shutdown(&self) {
        self.pipeline.detach();
        self.channel.shutdown().await;
        self.pipeline.reset();
        info!("Virtual display context shut down");
    }
}
