//! WebSocket connection to the display server
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Disconnected
//!   ↓ (ensure_connected)
//! Connecting ──(timeout / failure)──→ Disconnected
//!   ↓ (socket open)
//! Connected
//!   ↓ (close, error or shutdown)
//! Disconnected
//! ```
//!
//! Every command method connects on demand and reports failure as
//! `false`/`None`. There is no retry loop here; callers decide.

use super::command::Command;
use super::message::{decode_screenshot, scrape_display_id, ServerMessage};
use super::pending::PendingRequest;
use super::FrameSink;
use crate::display::{DisplayConfig, VideoDimensions, VirtualDisplayId};
use crate::{DisplayError, Result, DEFAULT_SERVER_PORT};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Bound on a connect attempt (and on waiting for someone else's attempt)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait for a screenshot reply
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long shutdown waits for the socket to close cleanly
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket URL of the display server
    pub url: String,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Screenshot reply timeout in milliseconds
    pub screenshot_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{}", DEFAULT_SERVER_PORT),
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            screenshot_timeout_ms: SCREENSHOT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ChannelConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn screenshot_timeout(&self) -> Duration {
        Duration::from_millis(self.screenshot_timeout_ms)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between callers and the socket task
struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Bumped on every successful connect so a stale socket task cannot
    /// tear down a newer connection
    connection_generation: AtomicU64,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
    display_id: Mutex<Option<VirtualDisplayId>>,
    dimensions: Mutex<Option<VideoDimensions>>,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    screenshot: PendingRequest<Vec<u8>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(ConnectionState::Disconnected),
            connection_generation: AtomicU64::new(0),
            outgoing: Mutex::new(None),
            io_task: Mutex::new(None),
            display_id: Mutex::new(None),
            dimensions: Mutex::new(None),
            sink: RwLock::new(None),
            screenshot: PendingRequest::new(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Queue one text line. Returns false if there is no open socket.
    fn send_line(&self, line: String) -> bool {
        let outgoing = lock(&self.outgoing);
        match outgoing.as_ref() {
            Some(tx) => {
                debug!("→ {}", line);
                tx.send(Message::Text(line.into())).is_ok()
            }
            None => false,
        }
    }

    fn handle_text(&self, text: &str) {
        match ServerMessage::parse(text) {
            ServerMessage::ScreenshotData(payload) => match decode_screenshot(&payload) {
                Ok(bytes) => {
                    debug!("Received screenshot ({} bytes)", bytes.len());
                    if !self.screenshot.resolve(Some(bytes)) {
                        debug!("Ignoring screenshot reply with no pending request");
                    }
                }
                Err(e) => {
                    warn!("Malformed screenshot payload: {}", e);
                    self.screenshot.resolve(None);
                }
            },
            ServerMessage::ScreenshotError(reason) => {
                warn!("Server could not take screenshot: {}", reason);
                self.screenshot.resolve(None);
            }
            ServerMessage::Info(text) => {
                debug!("← {}", text);
                if let Some(id) = scrape_display_id(&text) {
                    info!("Virtual display id is {}", id);
                    *lock(&self.display_id) = Some(id);
                }
            }
        }
    }

    fn handle_binary(&self, data: &[u8]) {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match sink {
            Some(sink) => sink.on_frame(data),
            None => debug!("No frame sink registered, dropping {} bytes", data.len()),
        }
    }

    fn connection_closed(&self, generation: u64) {
        if self.connection_generation.load(Ordering::SeqCst) != generation {
            return;
        }
        lock(&self.outgoing).take();
        self.set_state(ConnectionState::Disconnected);
        self.screenshot.cancel();
    }
}

/// Claim on the `Connecting` state for one connect attempt.
///
/// Dropping it puts a still-`Connecting` channel back to `Disconnected`,
/// so an attempt abandoned mid-handshake does not wedge later callers.
struct ConnectAttempt<'a> {
    shared: &'a Shared,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

/// Persistent control connection to the display server
#[derive(Clone)]
pub struct ControlChannel {
    config: ChannelConfig,
    shared: Arc<Shared>,
}

impl ControlChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Display id announced by the server for the current session
    pub fn display_id(&self) -> Option<VirtualDisplayId> {
        *lock(&self.shared.display_id)
    }

    /// Dimensions of the current display session
    pub fn dimensions(&self) -> Option<VideoDimensions> {
        *lock(&self.shared.dimensions)
    }

    /// Route binary frames to `sink`, replacing any previous sink
    pub fn set_frame_sink(&self, sink: Arc<dyn FrameSink>) {
        *self
            .shared
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn clear_frame_sink(&self) {
        self.shared
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Make sure the socket is open.
    ///
    /// Joins an in-flight attempt instead of opening a second socket.
    pub async fn ensure_connected(&self) -> bool {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !claimed {
            return self.wait_for_connection().await;
        }

        let _attempt = ConnectAttempt {
            shared: &self.shared,
        };
        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.config.url, e);
                false
            }
        }
    }

    async fn wait_for_connection(&self) -> bool {
        let mut rx = self.shared.state.subscribe();
        let result = timeout(
            self.config.connect_timeout(),
            rx.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await;

        matches!(result, Ok(Ok(state)) if *state == ConnectionState::Connected)
    }

    async fn connect(&self) -> Result<()> {
        info!("Connecting to display server at {}", self.config.url);
        let wait = self.config.connect_timeout();

        let (stream, _response) = timeout(wait, connect_async(self.config.url.as_str()))
            .await
            .map_err(|_| DisplayError::Timeout(wait))??;

        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let generation = self.shared.connection_generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.shared.outgoing) = Some(tx);
        self.shared.set_state(ConnectionState::Connected);

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => match outgoing {
                        Some(message) => {
                            if let Err(e) = write.send(message).await {
                                warn!("Failed to send to display server: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                        Some(Ok(Message::Binary(data))) => shared.handle_binary(&data),
                        Some(Ok(Message::Close(frame))) => {
                            info!("Display server closed connection: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Control channel error: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }

            let _ = write.close().await;
            shared.connection_closed(generation);
            debug!("Control channel task stopped");
        });

        if let Some(previous) = lock(&self.shared.io_task).replace(task) {
            previous.abort();
        }

        info!("Connected to display server");
        Ok(())
    }

    async fn send(&self, command: Command) -> bool {
        if let Err(e) = command.validate() {
            warn!("Not sending {}: {}", command.verb(), e);
            return false;
        }
        if !self.ensure_connected().await {
            debug!("Dropping {}: not connected", command.verb());
            return false;
        }
        self.shared.send_line(command.to_string())
    }

    /// Request a new virtual display.
    ///
    /// Dimensions are aligned down to multiples of 8 and become the
    /// session's video dimensions. Any existing display is destroyed
    /// first. The display id arrives later through the server log.
    pub async fn create_display(&self, display: &DisplayConfig) -> bool {
        if !self.ensure_connected().await {
            return false;
        }

        let dimensions = display.dimensions();
        self.shared.send_line(Command::DestroyDisplay.to_string());
        *lock(&self.shared.display_id) = None;
        *lock(&self.shared.dimensions) = Some(dimensions);

        let dpi = display.dpi;
        info!("Creating virtual display {} @ {} dpi", dimensions, dpi);
        self.send(Command::CreateDisplay {
            width: dimensions.width,
            height: dimensions.height,
            dpi: display.dpi,
            bitrate_kbps: display.bitrate_kbps,
        })
        .await
    }

    pub async fn destroy_display(&self) -> bool {
        self.send(Command::DestroyDisplay).await
    }

    pub async fn launch_app(&self, package: &str) -> bool {
        self.send(Command::LaunchApp {
            package: package.to_string(),
        })
        .await
    }

    pub async fn tap(&self, x: i32, y: i32) -> bool {
        self.send(Command::Tap { x, y }).await
    }

    pub async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: Option<u32>) -> bool {
        self.send(Command::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration_ms,
        })
        .await
    }

    pub async fn touch_down(&self, x: i32, y: i32) -> bool {
        self.send(Command::TouchDown { x, y }).await
    }

    pub async fn touch_move(&self, x: i32, y: i32) -> bool {
        self.send(Command::TouchMove { x, y }).await
    }

    pub async fn touch_up(&self, x: i32, y: i32) -> bool {
        self.send(Command::TouchUp { x, y }).await
    }

    pub async fn key(&self, code: i32) -> bool {
        self.send(Command::Key { code }).await
    }

    /// Request a screenshot with the configured timeout
    pub async fn request_screenshot(&self) -> Option<Vec<u8>> {
        self.request_screenshot_with_timeout(self.config.screenshot_timeout())
            .await
    }

    /// Request a screenshot over the control socket.
    ///
    /// A request still waiting for its reply is failed first. On timeout
    /// the slot is abandoned, so a late reply is ignored.
    pub async fn request_screenshot_with_timeout(&self, wait: Duration) -> Option<Vec<u8>> {
        if !self.ensure_connected().await {
            return None;
        }

        let ticket = self.shared.screenshot.begin();
        let generation = ticket.generation();

        if !self.shared.send_line(Command::Screenshot.to_string()) {
            self.shared.screenshot.abandon(generation);
            return None;
        }

        match timeout(wait, ticket.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Screenshot request timed out after {:?}", wait);
                self.shared.screenshot.abandon(generation);
                None
            }
        }
    }

    /// Close the socket after flushing queued lines.
    ///
    /// The display is left running; the session fields are kept.
    pub async fn close(&self) {
        // Dropping the sender flushes queued lines, then closes the socket
        lock(&self.shared.outgoing).take();
        let task = lock(&self.shared.io_task).take();
        if let Some(mut task) = task {
            if timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                debug!("Control channel did not close in time, aborting");
                task.abort();
            }
        }

        self.shared.screenshot.cancel();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Destroy the display, close the socket and forget the session
    pub async fn shutdown(&self) {
        info!("Shutting down control channel");

        if self.is_connected() {
            self.shared.send_line(Command::DestroyDisplay.to_string());
        }
        self.close().await;

        *lock(&self.shared.display_id) = None;
        *lock(&self.shared.dimensions) = None;
        self.clear_frame_sink();
    }
}
