// devices/mod.rs
mod camera;
mod lamp;

pub use camera::{CameraSource, FrameSample};
pub use lamp::LampWindow;

use crate::color::Color;
use crate::error::AppError;

/// Blocking frame supplier. The control loop is the only caller.
pub trait FrameGrabber {
    /// Blocks until the next frame is ready, up to the source's read
    /// timeout. A timeout or a device error is a `FrameReadFailure`.
    fn read_frame(&mut self) -> Result<FrameSample, AppError>;
    /// Releases the device handle. Idempotent.
    fn close(&mut self);
}

/// Solid-color output surface, the stand-in for a physical lamp.
pub trait LampOutput {
    fn set_color(&mut self, color: Color) -> Result<(), AppError>;
    /// Hides and releases the surface. Idempotent.
    fn turn_off(&mut self);
}
