//! Virtual display session types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the server assigns to a virtual display
pub type VirtualDisplayId = u32;

/// Smallest dimension the server accepts
const MIN_DIMENSION: u32 = 2;

/// Align a display dimension down to a multiple of 8.
///
/// H.264 encoders on the server side work on 8-pixel aligned frames.
/// Results never drop below 2.
#[must_use]
pub fn align_dimension(value: u32) -> u32 {
    (value / 8 * 8).max(MIN_DIMENSION)
}

/// Width and height of the mirrored video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions with both sides aligned via [`align_dimension`]
    #[must_use]
    pub fn aligned(width: u32, height: u32) -> Self {
        Self {
            width: align_dimension(width),
            height: align_dimension(height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for VideoDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters for a `CREATE_DISPLAY` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Requested width in pixels (aligned before sending)
    pub width: u32,
    /// Requested height in pixels (aligned before sending)
    pub height: u32,
    /// Display density
    pub dpi: u32,
    /// Encoder bitrate hint in kbps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            dpi: 320,
            bitrate_kbps: None,
        }
    }
}

impl DisplayConfig {
    /// Dimensions the server will actually use
    pub fn dimensions(&self) -> VideoDimensions {
        VideoDimensions::aligned(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_dimension() {
        assert_eq!(align_dimension(1080), 1080);
        assert_eq!(align_dimension(1083), 1080);
        assert_eq!(align_dimension(2399), 2392);
        assert_eq!(align_dimension(8), 8);
        assert_eq!(align_dimension(7), 2);
        assert_eq!(align_dimension(0), 2);
    }

    #[test]
    fn test_display_config_dimensions() {
        let config = DisplayConfig {
            width: 721,
            height: 1605,
            dpi: 240,
            bitrate_kbps: Some(4000),
        };
        assert_eq!(config.dimensions(), VideoDimensions::new(720, 1600));
        assert_eq!(config.dimensions().to_string(), "720x1600");
    }

    #[test]
    fn test_empty_dimensions() {
        assert!(VideoDimensions::new(0, 100).is_empty());
        assert!(!VideoDimensions::new(2, 2).is_empty());
    }
}
