mod config;
mod recorder;
#[cfg(feature = "software-decoder")]
mod software_decoder;
mod surface;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use config::Config;
use recorder::RecordingDecoderFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use surface::FrameBufferSurface;
use tracing::{debug, info, warn};
use vdisplay_protocol::{
    ControlChannel, DecoderFactory, DisplayConfig, LocalShell, RgbaFrame, ServerLifecycleManager,
    VirtualDisplayContext,
};

/// How often `mirror` logs pipeline statistics
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Bound on the final frame capture in `mirror --capture`
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "vdisplay")]
#[command(about = "Mirror and drive a remote Android virtual display", version)]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/vdisplay/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Control socket URL, overriding the configuration
    #[arg(long, global = true, env = "VDISPLAY_URL")]
    url: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the display server process
    #[command(subcommand)]
    Server(ServerCommand),
    /// Create a virtual display and stream it until Ctrl-C
    Mirror(MirrorArgs),
    /// Tap at a display coordinate
    Tap { x: i32, y: i32 },
    /// Swipe between two display coordinates
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        /// Gesture duration in milliseconds
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Send an Android key code
    Key { code: i32 },
    /// Launch an app on the virtual display
    Launch { package: String },
    /// Save a screenshot of the virtual display
    Screenshot { output: PathBuf },
    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ServerCommand {
    /// Start the server unless it is already listening
    Start,
    /// Kill the server process
    Stop,
    /// Report whether the server port answers
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(Args, Debug)]
struct MirrorArgs {
    #[command(flatten)]
    display: DisplayArgs,

    /// Launch this package once the display exists
    #[arg(long, value_name = "PACKAGE")]
    app: Option<String>,

    /// Write the H.264 stream to a file
    #[arg(long, value_name = "PATH")]
    record: Option<PathBuf>,

    /// Save the last decoded picture as PNG on exit
    #[arg(long, value_name = "PATH")]
    capture: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct DisplayArgs {
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    dpi: Option<u32>,
    /// Encoder bitrate in kbps
    #[arg(long)]
    bitrate: Option<u32>,
}

impl DisplayArgs {
    fn apply(&self, display: &mut DisplayConfig) {
        if let Some(width) = self.width {
            display.width = width;
        }
        if let Some(height) = self.height {
            display.height = height;
        }
        if let Some(dpi) = self.dpi {
            display.dpi = dpi;
        }
        if self.bitrate.is_some() {
            display.bitrate_kbps = self.bitrate;
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path().context("Could not determine config directory")?,
    };
    let mut config = Config::load(&config_path)?;
    if let Some(url) = cli.url {
        config.channel.url = url;
    }

    match cli.command {
        Command::Server(command) => server(&config, command).await,
        Command::Mirror(args) => mirror(&config, args).await,
        Command::Tap { x, y } => input(&config, |channel| async move { channel.tap(x, y).await }).await,
        Command::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration,
        } => {
            input(&config, |channel| async move {
                channel.swipe(x1, y1, x2, y2, duration).await
            })
            .await
        }
        Command::Key { code } => {
            input(&config, |channel| async move { channel.key(code).await }).await
        }
        Command::Launch { package } => {
            input(&config, |channel| async move { channel.launch_app(&package).await }).await
        }
        Command::Screenshot { output } => screenshot(&config, &output).await,
        Command::Config(command) => config_command(&config, &config_path, command),
    }
}

fn lifecycle(config: &Config) -> ServerLifecycleManager {
    let runner = Arc::new(LocalShell::new(&config.server.shell));
    ServerLifecycleManager::new(config.server.clone(), runner)
}

async fn server(config: &Config, command: ServerCommand) -> anyhow::Result<()> {
    let manager = lifecycle(config);
    match command {
        ServerCommand::Start => {
            if !manager.ensure_running().await {
                bail!(
                    "Display server did not start on port {}",
                    config.server.port
                );
            }
            println!("Display server listening on port {}", config.server.port);
        }
        ServerCommand::Stop => {
            if !manager.stop_server().await {
                bail!("Failed to run the kill command");
            }
            println!("Display server stopped");
        }
        ServerCommand::Status => {
            if manager.is_running().await {
                println!("running (port {})", config.server.port);
            } else {
                println!("stopped");
            }
        }
    }
    Ok(())
}

/// Send one input command over a short-lived connection
async fn input<F, Fut>(config: &Config, send: F) -> anyhow::Result<()>
where
    F: FnOnce(ControlChannel) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let channel = ControlChannel::new(config.channel.clone());
    if !channel.ensure_connected().await {
        bail!(
            "Display server not reachable at {} (try `vdisplay server start`)",
            config.channel.url
        );
    }

    let sent = send(channel.clone()).await;
    channel.close().await;
    if !sent {
        bail!("Command was rejected or could not be sent");
    }
    Ok(())
}

async fn screenshot(config: &Config, output: &Path) -> anyhow::Result<()> {
    let channel = ControlChannel::new(config.channel.clone());
    let bytes = channel.request_screenshot().await;
    channel.close().await;

    let Some(bytes) = bytes else {
        bail!("No screenshot received from {}", config.channel.url);
    };
    std::fs::write(output, &bytes).with_context(|| format!("Failed to write {:?}", output))?;
    println!("Saved screenshot to {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

#[cfg(feature = "software-decoder")]
fn live_decoder() -> anyhow::Result<Arc<dyn DecoderFactory>> {
    Ok(Arc::new(software_decoder::SoftwareDecoderFactory))
}

#[cfg(not(feature = "software-decoder"))]
fn live_decoder() -> anyhow::Result<Arc<dyn DecoderFactory>> {
    bail!("No decoder available: pass --record <PATH> or build with the software-decoder feature")
}

fn decoder_factory(record: Option<&Path>) -> anyhow::Result<Arc<dyn DecoderFactory>> {
    match record {
        Some(path) => {
            let factory = RecordingDecoderFactory::open(path)
                .with_context(|| format!("Failed to open recording {:?}", path))?;
            debug!("Recording to {:?}", factory.path());
            Ok(Arc::new(factory))
        }
        None => live_decoder(),
    }
}

async fn mirror(config: &Config, args: MirrorArgs) -> anyhow::Result<()> {
    let mut display = config.display.clone();
    args.display.apply(&mut display);

    let factory = decoder_factory(args.record.as_deref())?;
    let runner = Arc::new(LocalShell::new(&config.server.shell));
    let context = VirtualDisplayContext::init(
        config.server.clone(),
        config.channel.clone(),
        runner,
        factory,
    );

    let surface = Arc::new(FrameBufferSurface::new());
    let dimensions = context
        .start_display(surface.clone(), &display)
        .await
        .context("Failed to start virtual display")?;
    println!("Mirroring {} virtual display, press Ctrl-C to stop", dimensions);

    if let Some(package) = &args.app {
        if !context.channel().launch_app(package).await {
            warn!("Could not launch {}", package);
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = status.tick() => {
                let stats = context.pipeline().stats();
                info!(
                    display_id = ?context.channel().display_id(),
                    state = ?context.pipeline().state(),
                    received = stats.frames_received,
                    submitted = stats.frames_submitted,
                    dropped = stats.frames_dropped,
                    presented = surface.presented(),
                    "Mirror status"
                );
            }
        }
    }

    if let Some(path) = &args.capture {
        match context.capture_frame(CAPTURE_TIMEOUT).await {
            Ok(frame) => {
                save_png(&frame, path)?;
                println!("Saved frame to {}", path.display());
            }
            Err(e) => warn!("Frame capture failed: {}", e),
        }
    }

    context.shutdown().await;
    surface.release();
    info!("Mirror stopped");
    Ok(())
}

fn save_png(frame: &RgbaFrame, path: &Path) -> anyhow::Result<()> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .context("Frame buffer does not match its dimensions")?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

fn config_command(config: &Config, path: &Path, command: ConfigCommand) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!("{:?} already exists (use --force to overwrite)", path);
            }
            Config::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigCommand::Show => {
            println!("# {}", path.display());
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
