use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// macOS virtual key code (`kVK_*`).
pub type KeyCode = u16;

/// Signal kinds delivered by the event tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKeyEvent {
    KeyDown { keycode: KeyCode },
    FlagsChanged { keycode: KeyCode, flags: u64 },
}

impl RawKeyEvent {
    pub fn keycode(&self) -> KeyCode {
        match *self {
            RawKeyEvent::KeyDown { keycode } => keycode,
            RawKeyEvent::FlagsChanged { keycode, .. } => keycode,
        }
    }
}

/// An accepted key press, handed to the stats store and then dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub key_code: KeyCode,
    pub is_modifier: bool,
    pub timestamp: DateTime<Local>,
}
