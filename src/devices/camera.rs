// camera.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraIndex, ControlValueSetter, KnownCameraControl, RequestedFormat, RequestedFormatType,
};
use tracing::{debug, info, warn};

use crate::color::Color;
use crate::devices::FrameGrabber;
use crate::error::AppError;

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// One decoded camera frame: tightly packed RGB8 pixels, row-major.
///
/// Produced once per loop iteration and consumed immediately; never kept
/// across iterations.
#[derive(Debug, Clone)]
pub struct FrameSample {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameSample {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reduces the frame to a single room color by per-channel averaging.
    pub fn average_color(&self) -> Color {
        let pixels = self.data.chunks_exact(3);
        let count = pixels.len();
        if count == 0 {
            return Color::new(0.0, 0.0, 0.0);
        }
        let mut sums = [0.0f64; 3];
        for pixel in pixels {
            sums[0] += f64::from(pixel[0]);
            sums[1] += f64::from(pixel[1]);
            sums[2] += f64::from(pixel[2]);
        }
        let count = count as f64;
        Color::from_raw(
            (sums[0] / count) as f32,
            (sums[1] / count) as f32,
            (sums[2] / count) as f32,
        )
    }
}

/// Owns the webcam through a dedicated capture thread.
///
/// The thread owns the nokhwa handle outright; frames cross to the control
/// loop over a depth-1 channel so a slow consumer drops frames instead of
/// backing up. `read_frame` enforces the configured timeout, which keeps
/// shutdown prompt even when the device stops delivering.
pub struct CameraSource {
    frames: Receiver<Result<FrameSample, AppError>>,
    shutdown: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl CameraSource {
    pub fn open(index: u32, read_timeout: Duration) -> Result<Self, AppError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::sync_channel(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(index, &ready_tx, &frame_tx, &thread_shutdown))
            .map_err(|e| AppError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                info!(index, "camera opened");
                Ok(Self {
                    frames: frame_rx,
                    shutdown,
                    read_timeout,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::DeviceUnavailable(
                "camera did not come up before the open timeout".into(),
            )),
        }
    }
}

impl FrameGrabber for CameraSource {
    fn read_frame(&mut self) -> Result<FrameSample, AppError> {
        match self.frames.recv_timeout(self.read_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(AppError::FrameReadFailure(
                "no frame within the read timeout".into(),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(AppError::FrameReadFailure(
                "capture thread is gone".into(),
            )),
        }
    }

    fn close(&mut self) {
        // The capture thread drops the device handle on its next wakeup.
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_loop(
    index: u32,
    ready_tx: &mpsc::Sender<Result<(), AppError>>,
    frame_tx: &SyncSender<Result<FrameSample, AppError>>,
    shutdown: &AtomicBool,
) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::DeviceUnavailable(e.to_string())));
            return;
        }
    };

    disable_auto_processing(&mut camera);

    if let Err(e) = camera.open_stream() {
        let _ = ready_tx.send(Err(AppError::DeviceUnavailable(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !shutdown.load(Ordering::Relaxed) {
        let sample = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            .map(|image| {
                let (width, height) = (image.width(), image.height());
                FrameSample::new(width, height, image.into_raw())
            });
        match sample {
            Ok(sample) => {
                // Depth-1 channel: drop the frame if the loop is mid-iteration.
                if let Err(TrySendError::Disconnected(_)) = frame_tx.try_send(Ok(sample)) {
                    break;
                }
            }
            Err(e) => {
                let _ = frame_tx.send(Err(AppError::FrameReadFailure(e.to_string())));
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        debug!(error = %e, "camera stream teardown failed");
    }
}

/// Best-effort writes that take the sensor out of its automatic modes, so
/// sampled frames track the actual room light instead of the driver's
/// corrections. Hardware support varies, so a rejected write is only logged.
fn disable_auto_processing(camera: &mut Camera) {
    let writes = [
        (KnownCameraControl::Exposure, ControlValueSetter::Integer(-4)),
        (
            KnownCameraControl::WhiteBalance,
            ControlValueSetter::Integer(4000),
        ),
        (KnownCameraControl::Gain, ControlValueSetter::Integer(0)),
        (
            KnownCameraControl::BacklightComp,
            ControlValueSetter::Integer(0),
        ),
    ];
    for (control, value) in writes {
        if let Err(e) = camera.set_camera_control(control, value) {
            warn!(?control, error = %e, "camera control write rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn averages_each_channel_independently() {
        // Two pixels: (255, 0, 0) and (0, 0, 255).
        let sample = FrameSample::new(2, 1, vec![255, 0, 0, 0, 0, 255]);
        let color = sample.average_color();
        assert!(close(color.r, 0.5));
        assert!(close(color.g, 0.0));
        assert!(close(color.b, 0.5));
    }

    #[test]
    fn uniform_frame_averages_to_its_own_color() {
        let data = vec![10, 20, 30].repeat(100);
        let sample = FrameSample::new(10, 10, data);
        let color = sample.average_color();
        assert!(close(color.r, 10.0 / 255.0));
        assert!(close(color.g, 20.0 / 255.0));
        assert!(close(color.b, 30.0 / 255.0));
    }

    #[test]
    fn empty_frame_averages_to_black() {
        let sample = FrameSample::new(0, 0, Vec::new());
        assert_eq!(sample.average_color(), Color::new(0.0, 0.0, 0.0));
    }
}
