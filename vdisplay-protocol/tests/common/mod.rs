//! In-process display server double for integration tests

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Loopback WebSocket server that records text lines and lets the test
/// push messages back to the client
pub struct MockServer {
    pub port: u16,
    lines: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<Message>,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn spawn() -> anyhow::Result<Self> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (line_tx, lines) = mpsc::unbounded_channel();
        let (outgoing, out_rx) = mpsc::unbounded_channel::<Message>();
        let out_rx = Arc::new(Mutex::new(out_rx));
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let line_tx = line_tx.clone();
                let out_rx = out_rx.clone();
                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    let mut out_rx = out_rx.lock().await;
                    loop {
                        tokio::select! {
                            msg = out_rx.recv() => match msg {
                                Some(msg) => {
                                    let closing = matches!(msg, Message::Close(_));
                                    if write.send(msg).await.is_err() || closing {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            incoming = read.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = line_tx.send(text.as_str().to_owned());
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Ok(Self {
            port,
            lines,
            outgoing,
            connections,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Next text line sent by the client
    pub async fn recv_line(&mut self) -> anyhow::Result<String> {
        timeout(RECV_TIMEOUT, self.lines.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("mock server stopped"))
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.outgoing.send(Message::Text(text.to_string().into()));
    }

    pub fn send_binary(&self, data: &[u8]) {
        let _ = self.outgoing.send(Message::Binary(data.to_vec().into()));
    }

    pub fn close_client(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Route library logs to the test harness output (`RUST_LOG=debug`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or three seconds pass
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
