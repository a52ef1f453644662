// runloop.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::color::Color;
use crate::config::AppConfig;
use crate::controller::decide_lamp_color;
use crate::devices::{CameraSource, FrameGrabber, LampOutput, LampWindow};
use crate::error::AppError;
use crate::mqtt::{SettingsChannel, SettingsFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

/// Brings up the real devices and runs the control loop until a stop signal
/// or a fatal error. Executes on a blocking thread; the runtime handle hosts
/// the settings channel's background task.
///
/// Initialization failures are fatal with no retry. A partially brought-up
/// stack is torn down before the error is returned.
pub fn run(cfg: AppConfig, stop: Arc<AtomicBool>, handle: Handle) -> Result<(), AppError> {
    info!("initializing");
    let mut channel = SettingsChannel::start(&cfg.broker, &handle)?;
    let camera = match CameraSource::open(
        cfg.camera.index,
        Duration::from_millis(cfg.camera.read_timeout_ms),
    ) {
        Ok(camera) => camera,
        Err(e) => {
            channel.stop();
            return Err(e);
        }
    };
    let lamp = match LampWindow::turn_on(&cfg.lamp.name, cfg.lamp.height, cfg.lamp.width) {
        Ok(lamp) => lamp,
        Err(e) => {
            channel.stop();
            return Err(e);
        }
    };

    ControlLoop::new(camera, channel, lamp, stop).run()
}

/// The sample → decide → actuate loop.
///
/// Owns all three collaborators for its whole lifetime. `lamp_state` is the
/// last color pushed to the lamp; iterations without settings hold it
/// unchanged.
pub struct ControlLoop<C, S, L> {
    camera: C,
    channel: S,
    lamp: L,
    stop: Arc<AtomicBool>,
    state: LoopState,
    lamp_state: Option<Color>,
}

impl<C, S, L> ControlLoop<C, S, L>
where
    C: FrameGrabber,
    S: SettingsFeed,
    L: LampOutput,
{
    pub fn new(camera: C, channel: S, lamp: L, stop: Arc<AtomicBool>) -> Self {
        Self {
            camera,
            channel,
            lamp,
            stop,
            state: LoopState::Initializing,
            lamp_state: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn lamp_state(&self) -> Option<Color> {
        self.lamp_state
    }

    /// Runs until the stop flag is raised or a failure aborts the loop.
    /// Teardown always runs, in a fixed order: camera first, then the
    /// message-bus connection, then the lamp. Each step is best-effort and
    /// cannot prevent the ones after it.
    pub fn run(&mut self) -> Result<(), AppError> {
        self.state = LoopState::Running;
        info!("running");

        let outcome = self.drive();
        if let Err(e) = &outcome {
            error!(error = %e, "control loop aborting");
        }

        self.state = LoopState::ShuttingDown;
        info!("shutting down");
        self.camera.close();
        self.channel.stop();
        self.lamp.turn_off();

        self.state = LoopState::Stopped;
        info!("stopped");
        outcome
    }

    fn drive(&mut self) -> Result<(), AppError> {
        while !self.stop.load(Ordering::Relaxed) {
            let frame = self.camera.read_frame()?;
            let room = frame.average_color();

            let Some(settings) = self.channel.latest() else {
                debug!(
                    room = %room,
                    width = frame.width(),
                    height = frame.height(),
                    "no settings received yet, holding lamp state"
                );
                continue;
            };

            let lamp_color = decide_lamp_color(&settings, room);
            self.lamp.set_color(lamp_color)?;
            self.lamp_state = Some(lamp_color);
            info!(
                room = %room,
                lamp = %lamp_color,
                mixed = %room.mix(lamp_color),
                "frame processed"
            );
        }
        info!("stop signal observed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::FrameSample;
    use crate::models::{ControlSettings, Mode};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<&'static str>>>);

    impl EventLog {
        fn push(&self, event: &'static str) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct ScriptedCamera {
        frames: VecDeque<Result<FrameSample, AppError>>,
        stop_when_exhausted: Arc<AtomicBool>,
        log: EventLog,
    }

    impl FrameGrabber for ScriptedCamera {
        fn read_frame(&mut self) -> Result<FrameSample, AppError> {
            let next = self
                .frames
                .pop_front()
                .unwrap_or_else(|| Err(AppError::FrameReadFailure("script exhausted".into())));
            if self.frames.is_empty() {
                self.stop_when_exhausted.store(true, Ordering::Relaxed);
            }
            next
        }

        fn close(&mut self) {
            self.log.push("camera.close");
        }
    }

    struct StaticFeed {
        settings: Option<ControlSettings>,
        log: EventLog,
    }

    impl SettingsFeed for StaticFeed {
        fn latest(&self) -> Option<ControlSettings> {
            self.settings
        }

        fn stop(&mut self) {
            self.log.push("channel.stop");
        }
    }

    #[derive(Clone, Default)]
    struct RecordingLamp {
        colors: Arc<Mutex<Vec<Color>>>,
        log: EventLog,
    }

    impl LampOutput for RecordingLamp {
        fn set_color(&mut self, color: Color) -> Result<(), AppError> {
            self.colors.lock().unwrap().push(color);
            Ok(())
        }

        fn turn_off(&mut self) {
            self.log.push("lamp.turn_off");
        }
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    // One pixel at raw (51, 102, 153), i.e. room color (0.2, 0.4, 0.6).
    fn frame() -> FrameSample {
        FrameSample::new(1, 1, vec![51, 102, 153])
    }

    fn harness(
        frames: VecDeque<Result<FrameSample, AppError>>,
        settings: Option<ControlSettings>,
        stop: Arc<AtomicBool>,
        log: &EventLog,
    ) -> ControlLoop<ScriptedCamera, StaticFeed, RecordingLamp> {
        ControlLoop::new(
            ScriptedCamera {
                frames,
                stop_when_exhausted: Arc::clone(&stop),
                log: log.clone(),
            },
            StaticFeed {
                settings,
                log: log.clone(),
            },
            RecordingLamp {
                colors: Arc::default(),
                log: log.clone(),
            },
            stop,
        )
    }

    #[test]
    fn frame_read_failure_triggers_ordered_shutdown() {
        let log = EventLog::default();
        let stop = Arc::new(AtomicBool::new(false));
        let mut frames = VecDeque::new();
        frames.push_back(Err(AppError::FrameReadFailure("device unplugged".into())));
        let mut control = harness(frames, Some(ControlSettings::default()), stop, &log);

        let result = control.run();

        assert!(matches!(result, Err(AppError::FrameReadFailure(_))));
        assert_eq!(control.state(), LoopState::Stopped);
        assert_eq!(
            log.events(),
            vec!["camera.close", "channel.stop", "lamp.turn_off"]
        );
    }

    #[test]
    fn actuation_is_skipped_until_settings_arrive() {
        let log = EventLog::default();
        let stop = Arc::new(AtomicBool::new(false));
        let frames = VecDeque::from([Ok(frame()), Ok(frame())]);
        let mut control = harness(frames, None, stop, &log);

        let result = control.run();

        assert!(result.is_ok());
        assert_eq!(control.state(), LoopState::Stopped);
        assert_eq!(control.lamp_state(), None);
        assert!(control.lamp.colors.lock().unwrap().is_empty());
        // Shutdown still ran, but the lamp was never driven.
        assert_eq!(
            log.events(),
            vec!["camera.close", "channel.stop", "lamp.turn_off"]
        );
    }

    #[test]
    fn iteration_drives_the_lamp_with_the_decided_color() {
        let log = EventLog::default();
        let stop = Arc::new(AtomicBool::new(false));
        let frames = VecDeque::from([Ok(frame())]);
        let settings = ControlSettings {
            mode: Mode::Automatic,
            temperature: 127.5,
            brightness: 255.0,
        };
        let mut control = harness(frames, Some(settings), stop, &log);

        control.run().unwrap();

        // Target (0.5, 0.5, 0.5) against room (0.2, 0.4, 0.6).
        assert_eq!(control.lamp.colors.lock().unwrap().len(), 1);
        let lamp_state = control.lamp_state().unwrap();
        assert!(close(lamp_state.r, 0.3));
        assert!(close(lamp_state.g, 0.1));
        assert!(close(lamp_state.b, 0.0));
    }

    #[test]
    fn pre_armed_stop_flag_exits_without_reading_a_frame() {
        let log = EventLog::default();
        let stop = Arc::new(AtomicBool::new(true));
        let frames = VecDeque::from([Ok(frame())]);
        let mut control = harness(frames, Some(ControlSettings::default()), stop, &log);

        control.run().unwrap();

        assert_eq!(control.state(), LoopState::Stopped);
        assert_eq!(control.lamp_state(), None);
        assert_eq!(
            log.events(),
            vec!["camera.close", "channel.stop", "lamp.turn_off"]
        );
    }
}
