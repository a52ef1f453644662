use serde::{Deserialize, Serialize};
use validator::Validate;

/// Control-loop behavior selector carried by inbound settings messages.
///
/// The closed enum makes the decision function's dispatch exhaustive: an
/// unrecognized mode string is rejected at decode time and can never reach
/// the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Manual,
    Automatic,
}

/// Desired lighting intent, decoded from one message-bus payload.
///
/// Missing fields fall back to the documented defaults; unknown top-level
/// fields are ignored. Range violations are caught by `validate()` at the
/// decode boundary and never re-checked downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct ControlSettings {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_temperature")]
    #[validate(range(min = 0.0, max = 255.0))]
    pub temperature: f32,
    #[serde(default = "default_brightness")]
    #[validate(range(min = 0.0, max = 255.0))]
    pub brightness: f32,
}

fn default_temperature() -> f32 {
    127.5
}

fn default_brightness() -> f32 {
    255.0
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            temperature: default_temperature(),
            brightness: default_brightness(),
        }
    }
}
