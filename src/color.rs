// color.rs
use std::fmt;

/// An RGB color with each channel normalized into [0.0, 1.0].
///
/// Every constructor clamps its inputs, so a `Color` can never hold an
/// out-of-range channel no matter what arithmetic produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: r.clamp(0.0, 1.0),
            g: g.clamp(0.0, 1.0),
            b: b.clamp(0.0, 1.0),
        }
    }

    /// Builds a color from raw 0-255 channel values.
    pub fn from_raw(r: f32, g: f32, b: f32) -> Self {
        Self::new(r / 255.0, g / 255.0, b / 255.0)
    }

    /// The complement color, channel by channel.
    pub fn reverse(self) -> Self {
        Self::new(1.0 - self.r, 1.0 - self.g, 1.0 - self.b)
    }

    /// Additive mix of two colors, saturating at full intensity.
    pub fn mix(self, other: Self) -> Self {
        Self::new(self.r + other.r, self.g + other.g, self.b + other.b)
    }

    pub fn to_hex(self) -> String {
        format!(
            "#{:02X}{:02X}{:02X}",
            channel_to_byte(self.r),
            channel_to_byte(self.g),
            channel_to_byte(self.b)
        )
    }
}

fn channel_to_byte(channel: f32) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
