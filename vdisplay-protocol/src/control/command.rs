//! Client → server command lines

use crate::{DisplayError, Result};
use std::fmt;

/// A single text command. Each one is sent as one line without a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateDisplay {
        width: u32,
        height: u32,
        dpi: u32,
        bitrate_kbps: Option<u32>,
    },
    DestroyDisplay,
    LaunchApp {
        package: String,
    },
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: Option<u32>,
    },
    TouchDown {
        x: i32,
        y: i32,
    },
    TouchMove {
        x: i32,
        y: i32,
    },
    TouchUp {
        x: i32,
        y: i32,
    },
    Key {
        code: i32,
    },
    Screenshot,
}

impl Command {
    /// Protocol verb
    pub fn verb(&self) -> &'static str {
        match self {
            Self::CreateDisplay { .. } => "CREATE_DISPLAY",
            Self::DestroyDisplay => "DESTROY_DISPLAY",
            Self::LaunchApp { .. } => "LAUNCH_APP",
            Self::Tap { .. } => "TAP",
            Self::Swipe { .. } => "SWIPE",
            Self::TouchDown { .. } => "TOUCH_DOWN",
            Self::TouchMove { .. } => "TOUCH_MOVE",
            Self::TouchUp { .. } => "TOUCH_UP",
            Self::Key { .. } => "KEY",
            Self::Screenshot => "SCREENSHOT",
        }
    }

    /// Check that the command serializes to a single well-formed line
    pub fn validate(&self) -> Result<()> {
        if let Self::LaunchApp { package } = self {
            if package.is_empty() {
                return Err(DisplayError::InvalidCommand(
                    "Package name is empty".to_string(),
                ));
            }
            if package.chars().any(char::is_whitespace) {
                return Err(DisplayError::InvalidCommand(format!(
                    "Package name contains whitespace: {:?}",
                    package
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())?;
        match self {
            Self::CreateDisplay {
                width,
                height,
                dpi,
                bitrate_kbps,
            } => {
                write!(f, " {} {} {}", width, height, dpi)?;
                if let Some(kbps) = bitrate_kbps {
                    write!(f, " {}", kbps)?;
                }
                Ok(())
            }
            Self::LaunchApp { package } => write!(f, " {}", package),
            Self::Tap { x, y }
            | Self::TouchDown { x, y }
            | Self::TouchMove { x, y }
            | Self::TouchUp { x, y } => write!(f, " {} {}", x, y),
            Self::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                write!(f, " {} {} {} {}", x1, y1, x2, y2)?;
                if let Some(ms) = duration_ms {
                    write!(f, " {}", ms)?;
                }
                Ok(())
            }
            Self::Key { code } => write!(f, " {}", code),
            Self::DestroyDisplay | Self::Screenshot => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_display_line() {
        let cmd = Command::CreateDisplay {
            width: 720,
            height: 1280,
            dpi: 320,
            bitrate_kbps: None,
        };
        assert_eq!(cmd.to_string(), "CREATE_DISPLAY 720 1280 320");

        let cmd = Command::CreateDisplay {
            width: 720,
            height: 1280,
            dpi: 320,
            bitrate_kbps: Some(8000),
        };
        assert_eq!(cmd.to_string(), "CREATE_DISPLAY 720 1280 320 8000");
    }

    #[test]
    fn test_input_lines() {
        assert_eq!(Command::Tap { x: 10, y: 20 }.to_string(), "TAP 10 20");
        assert_eq!(
            Command::TouchDown { x: 1, y: 2 }.to_string(),
            "TOUCH_DOWN 1 2"
        );
        assert_eq!(
            Command::TouchMove { x: 3, y: 4 }.to_string(),
            "TOUCH_MOVE 3 4"
        );
        assert_eq!(Command::TouchUp { x: 5, y: 6 }.to_string(), "TOUCH_UP 5 6");
        assert_eq!(Command::Key { code: 4 }.to_string(), "KEY 4");
    }

    #[test]
    fn test_swipe_line() {
        let swipe = Command::Swipe {
            x1: 100,
            y1: 900,
            x2: 100,
            y2: 200,
            duration_ms: Some(300),
        };
        assert_eq!(swipe.to_string(), "SWIPE 100 900 100 200 300");

        let swipe = Command::Swipe {
            x1: 0,
            y1: 0,
            x2: 50,
            y2: 50,
            duration_ms: None,
        };
        assert_eq!(swipe.to_string(), "SWIPE 0 0 50 50");
    }

    #[test]
    fn test_bare_verbs() {
        assert_eq!(Command::DestroyDisplay.to_string(), "DESTROY_DISPLAY");
        assert_eq!(Command::Screenshot.to_string(), "SCREENSHOT");
    }

    #[test]
    fn test_launch_app_validation() {
        let ok = Command::LaunchApp {
            package: "com.android.settings".to_string(),
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.to_string(), "LAUNCH_APP com.android.settings");

        let empty = Command::LaunchApp {
            package: String::new(),
        };
        assert!(empty.validate().is_err());

        let injected = Command::LaunchApp {
            package: "com.example\nDESTROY_DISPLAY".to_string(),
        };
        assert!(injected.validate().is_err());
    }
}
