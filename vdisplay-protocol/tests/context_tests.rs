//! End-to-end session tests: lifecycle liveness check, control socket and decoder
//! pipeline wired through one context

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{eventually, MockServer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vdisplay_protocol::server::CommandOutput;
use vdisplay_protocol::{
    ChannelConfig, CommandRunner, DecoderConfig, DecoderFactory, DecoderState, DisplayConfig,
    LifecycleConfig, RenderSurface, VideoDecoder, VideoDimensions, VirtualDisplayContext,
};

const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F];
const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80];
const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];

/// Records every command; the server is already listening so none should run
#[derive(Default)]
struct RecordingRunner {
    commands: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str) -> vdisplay_protocol::Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            code: Some(0),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct CountingFactory {
    fed: Arc<Mutex<Vec<Vec<u8>>>>,
}

struct CountingDecoder {
    fed: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl DecoderFactory for CountingFactory {
    fn create(&self, config: DecoderConfig<'_>) -> vdisplay_protocol::Result<Box<dyn VideoDecoder>> {
        assert_eq!(config.csd0, SPS);
        assert_eq!(config.csd1, PPS);
        Ok(Box::new(CountingDecoder {
            fed: self.fed.clone(),
        }))
    }
}

impl VideoDecoder for CountingDecoder {
    fn feed(&mut self, data: &[u8], _timestamp_us: i64) -> vdisplay_protocol::Result<()> {
        self.fed.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn drain(&mut self) -> vdisplay_protocol::Result<usize> {
        Ok(1)
    }

    fn release(&mut self) {}
}

struct GreySurface;

#[async_trait]
impl RenderSurface for GreySurface {
    async fn copy_pixels(&self, width: u32, height: u32) -> vdisplay_protocol::Result<Vec<u8>> {
        Ok(vec![0x80; width as usize * height as usize * 4])
    }
}

fn context_for(
    server: &MockServer,
    runner: Arc<RecordingRunner>,
    factory: Arc<CountingFactory>,
) -> VirtualDisplayContext {
    let lifecycle = LifecycleConfig {
        port: server.port,
        ..Default::default()
    };
    let channel = ChannelConfig::default().with_url(server.url());
    VirtualDisplayContext::init(lifecycle, channel, runner, factory)
}

#[tokio::test]
async fn test_session_streams_into_decoder() -> Result<()> {
    let mut server = MockServer::spawn().await?;
    let runner = Arc::new(RecordingRunner::default());
    let factory = Arc::new(CountingFactory::default());
    let context = context_for(&server, runner.clone(), factory.clone());

    let display = DisplayConfig {
        width: 642,
        height: 1085,
        ..Default::default()
    };
    let dimensions = context.start_display(Arc::new(GreySurface), &display).await?;
    assert_eq!(dimensions, VideoDimensions::new(640, 1080));
    assert!(runner.commands.lock().unwrap().is_empty());

    assert_eq!(server.recv_line().await?, "DESTROY_DISPLAY");
    assert_eq!(server.recv_line().await?, "CREATE_DISPLAY 640 1080 320");
    assert_eq!(context.pipeline().state(), DecoderState::AwaitingConfig);

    // A picture before the parameter sets is buffered, then replayed
    server.send_binary(IDR);
    server.send_binary(SPS);
    server.send_binary(PPS);
    server.send_binary(IDR);

    let pipeline = context.pipeline().clone();
    assert!(eventually(|| pipeline.state() == DecoderState::Ready).await);
    assert!(eventually(|| factory.fed.lock().unwrap().len() == 2).await);
    assert_eq!(*factory.fed.lock().unwrap(), vec![IDR.to_vec(), IDR.to_vec()]);

    let frame = context.capture_frame(Duration::from_secs(1)).await?;
    assert_eq!((frame.width, frame.height), (640, 1080));
    assert_eq!(frame.data.len(), 640 * 1080 * 4);

    context.shutdown().await;
    assert_eq!(server.recv_line().await?, "DESTROY_DISPLAY");
    assert_eq!(context.pipeline().state(), DecoderState::Uninitialized);
    assert!(!context.pipeline().has_config());
    assert!(context.capture_frame(Duration::from_secs(1)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_reattach_reuses_parameter_sets() -> Result<()> {
    let mut server = MockServer::spawn().await?;
    let factory = Arc::new(CountingFactory::default());
    let context = context_for(&server, Arc::new(RecordingRunner::default()), factory.clone());

    context
        .start_display(Arc::new(GreySurface), &DisplayConfig::default())
        .await?;
    server.recv_line().await?;
    server.recv_line().await?;

    server.send_binary(SPS);
    server.send_binary(PPS);
    let pipeline = context.pipeline().clone();
    assert!(eventually(|| pipeline.state() == DecoderState::Ready).await);

    assert!(context.stop_display().await);
    assert_eq!(server.recv_line().await?, "DESTROY_DISPLAY");
    assert_eq!(pipeline.state(), DecoderState::Uninitialized);
    assert!(pipeline.has_config());

    // The server does not resend SPS/PPS; the next IDR is enough
    context
        .start_display(Arc::new(GreySurface), &DisplayConfig::default())
        .await?;
    server.send_binary(IDR);
    assert!(eventually(|| pipeline.state() == DecoderState::Ready).await);
    assert!(eventually(|| factory.fed.lock().unwrap().last().map(Vec::as_slice) == Some(IDR)).await);
    assert_eq!(pipeline.stats().decoders_created, 2);

    context.shutdown().await;
    Ok(())
}
