//! Server → client text messages

use crate::display::VirtualDisplayId;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const SCREENSHOT_DATA_PREFIX: &str = "SCREENSHOT_DATA ";
const SCREENSHOT_ERROR_VERB: &str = "SCREENSHOT_ERROR";

/// Marker the server prints in its log line after creating a display
pub const DISPLAY_ID_MARKER: &str = "Virtual display id=";

/// Parsed text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Base64 payload of a requested screenshot
    ScreenshotData(String),
    /// Screenshot could not be taken
    ScreenshotError(String),
    /// Informational text (server log output)
    Info(String),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Self {
        if let Some(payload) = text.strip_prefix(SCREENSHOT_DATA_PREFIX) {
            return Self::ScreenshotData(payload.trim().to_string());
        }
        if let Some(reason) = text.strip_prefix(SCREENSHOT_ERROR_VERB) {
            // The verb must stand alone or be followed by a space
            if reason.is_empty() || reason.starts_with(' ') {
                return Self::ScreenshotError(reason.trim().to_string());
            }
        }
        Self::Info(text.to_string())
    }
}

/// Decode a `SCREENSHOT_DATA` payload into image bytes
pub fn decode_screenshot(payload: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(payload)?)
}

/// Find a display id announced in a log line.
///
/// Returns `None` if the marker is absent or not followed by digits.
pub fn scrape_display_id(text: &str) -> Option<VirtualDisplayId> {
    let start = text.find(DISPLAY_ID_MARKER)? + DISPLAY_ID_MARKER.len();
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());

    rest[..end].parse().ok()
}
