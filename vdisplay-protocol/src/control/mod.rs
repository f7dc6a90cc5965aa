//! Control channel to the display server
//!
//! One WebSocket carries everything: text command lines from us, text
//! log/screenshot messages from the server, and binary H.264 payloads
//! that are routed to a single [`FrameSink`].

mod channel;
mod command;
mod message;
mod pending;

pub use channel::{ChannelConfig, ConnectionState, ControlChannel};
pub use command::Command;
pub use message::{decode_screenshot, scrape_display_id, ServerMessage, DISPLAY_ID_MARKER};
pub use pending::{PendingRequest, PendingTicket};

/// Receiver for binary frames from the server
///
/// Exactly one sink is registered at a time; registering a new one
/// replaces the previous sink.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &[u8]);
}

impl<F> FrameSink for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn on_frame(&self, frame: &[u8]) {
        self(frame);
    }
}
