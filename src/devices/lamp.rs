// lamp.rs
use anyhow::Context;
use minifb::{Window, WindowOptions};
use tracing::info;

use crate::color::Color;
use crate::devices::LampOutput;
use crate::error::AppError;

/// A solid-color window standing in for the physical lamp.
///
/// The window content is unspecified until the first `set_color`; callers
/// must push a color before relying on what is shown.
pub struct LampWindow {
    window: Option<Window>,
    pixels: Vec<u32>,
    width: usize,
    height: usize,
}

impl LampWindow {
    pub fn turn_on(name: &str, height: usize, width: usize) -> Result<Self, AppError> {
        let window = Window::new(name, width, height, WindowOptions::default())
            .with_context(|| format!("failed to open lamp window {name:?}"))?;
        info!(name, height, width, "lamp on");
        Ok(Self {
            window: Some(window),
            pixels: vec![0; width * height],
            width,
            height,
        })
    }
}

impl LampOutput for LampWindow {
    fn set_color(&mut self, color: Color) -> Result<(), AppError> {
        if let Some(window) = self.window.as_mut() {
            self.pixels.fill(pack_pixel(color));
            window
                .update_with_buffer(&self.pixels, self.width, self.height)
                .context("failed to refresh lamp window")?;
        }
        Ok(())
    }

    fn turn_off(&mut self) {
        if self.window.take().is_some() {
            info!("lamp off");
        }
    }
}

/// 0RGB layout, as minifb expects.
fn pack_pixel(color: Color) -> u32 {
    let r = u32::from(channel_byte(color.r));
    let g = u32::from(channel_byte(color.g));
    let b = u32::from(channel_byte(color.b));
    (r << 16) | (g << 8) | b
}

fn channel_byte(channel: f32) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}
