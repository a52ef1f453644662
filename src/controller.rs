// controller.rs
use crate::color::Color;
use crate::models::{ControlSettings, Mode};

/// Decides the lamp color for the current frame.
///
/// The temperature ramp runs red-to-blue: warm settings push red up and
/// blue down while green rises gently between 0.3 and 0.7. Brightness
/// scales the whole target. Manual mode emits the target as-is; automatic
/// mode emits only the deficit the room does not already provide, so lamp
/// plus ambient approximates the target.
pub fn decide_lamp_color(settings: &ControlSettings, room: Color) -> Color {
    let red = settings.temperature / 255.0;
    let blue = 1.0 - red;
    let green = 0.3 + (settings.temperature / 255.0) * 0.4;

    let scale = settings.brightness / 255.0;
    let target = Color::new(red * scale, green * scale, blue * scale);

    match settings.mode {
        Mode::Manual => target,
        Mode::Automatic => Color::new(
            (target.r - room.r).max(0.0),
            (target.g - room.g).max(0.0),
            (target.b - room.b).max(0.0),
        ),
    }
}
