//! The animation pipeline
//!
//! An owned state machine ticked once per display frame:
//! `Idle -> RequestingInput -> Calibrating -> Listening -> Stopped | Error`.
//! Acquisition failure is terminal; `Listening` runs until an explicit
//! stop. All mutable signal state lives on the struct, so independent
//! instances can coexist and tests can drive ticks deterministically.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use crate::audio::{CaptureSource, SampleWindow, WINDOW_SAMPLES};
use crate::display::Display;
use crate::frames::FrameSet;
use crate::level::{self, CALIBRATION_WINDOW, Calibration, LevelMapper};

const STATUS_CALIBRATING: &str = "Calibrating, stay quiet for 1.5s";
const STATUS_LISTENING: &str = "Listening, speak to animate";
const STATUS_UNAVAILABLE: &str = "Microphone access denied or unavailable";
const STATUS_STOPPED: &str = "Stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    RequestingInput,
    Calibrating,
    Listening,
    Stopped,
    Error,
}

pub struct Pipeline<D: Display, S: CaptureSource> {
    state: PipelineState,
    display: D,
    frames: FrameSet,
    source: S,
    window: SampleWindow,
    scratch: Vec<f32>,
    stream: Option<S::Handle>,
    calibration: Option<Calibration>,
    calibration_deadline: Option<Instant>,
    mapper: Option<LevelMapper>,
    current_frame: Option<PathBuf>,
}

impl<D: Display, S: CaptureSource> Pipeline<D, S> {
    pub fn new(frames: FrameSet, display: D, source: S) -> Self {
        Self {
            state: PipelineState::Idle,
            display,
            frames,
            source,
            window: SampleWindow::new(),
            scratch: vec![0.0; WINDOW_SAMPLES],
            stream: None,
            calibration: None,
            calibration_deadline: None,
            mapper: None,
            current_frame: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// True while the pipeline still wants ticks.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            PipelineState::Calibrating | PipelineState::Listening
        )
    }

    /// Acquire the input device and begin calibrating.
    ///
    /// Idempotent: a no-op when a device handle already exists, and after
    /// a terminal acquisition failure (no retry). Acquisition failure is
    /// surfaced as a status message; it never propagates to the caller.
    pub fn start(&mut self) {
        if self.stream.is_some() || self.state == PipelineState::Error {
            return;
        }

        self.state = PipelineState::RequestingInput;
        match self.source.acquire(self.window.clone()) {
            Ok(handle) => {
                self.stream = Some(handle);
                self.calibration = Some(Calibration::new());
                self.calibration_deadline = Some(Instant::now() + CALIBRATION_WINDOW);
                self.current_frame = None;
                self.display.set_status(STATUS_CALIBRATING);
                self.state = PipelineState::Calibrating;
                info!("calibration started");
            }
            Err(err) => {
                error!("failed to acquire input device: {err}");
                self.display.set_status(STATUS_UNAVAILABLE);
                self.state = PipelineState::Error;
            }
        }
    }

    /// Advance the pipeline by one display frame.
    ///
    /// Ticks are strictly sequential; each runs to completion before the
    /// driver schedules the next one.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            PipelineState::Calibrating => self.tick_calibrating(now),
            PipelineState::Listening => self.tick_listening(),
            _ => {}
        }
    }

    fn tick_calibrating(&mut self, now: Instant) {
        self.window.snapshot(&mut self.scratch);
        let rms = level::rms(&self.scratch);
        if let Some(calibration) = self.calibration.as_mut() {
            calibration.observe(rms);
        }

        let expired = self
            .calibration_deadline
            .map(|deadline| now >= deadline)
            .unwrap_or(true);
        if expired {
            let range = self
                .calibration
                .take()
                .unwrap_or_else(Calibration::new)
                .finish();
            info!(
                noise_floor = range.noise_floor(),
                ceiling = range.ceiling(),
                frames = self.frames.count(),
                "calibration complete"
            );
            self.mapper = Some(LevelMapper::new(range));
            self.calibration_deadline = None;
            self.display.set_status(STATUS_LISTENING);
            self.display.hide_status();
            self.state = PipelineState::Listening;
        }
    }

    fn tick_listening(&mut self) {
        let Some(mapper) = self.mapper.as_mut() else {
            return;
        };

        self.window.snapshot(&mut self.scratch);
        let rms = level::rms(&self.scratch);
        mapper.update(rms);

        let index = mapper.frame_index(self.frames.count());
        let path = self.frames.frame_path(index);

        // Redundant identical assignments are suppressed.
        if self.current_frame.as_deref() != Some(path.as_path()) {
            self.display.show_frame(&path);
            self.current_frame = Some(path);
        }
    }

    /// Tear down the input device and halt the loop.
    ///
    /// Safe in every state, including mid-calibration. Stopping before
    /// start, or twice in a row, touches nothing.
    pub fn stop(&mut self) {
        let had_stream = self.stream.take().is_some();
        if !had_stream && !self.is_running() {
            return;
        }

        self.calibration = None;
        self.calibration_deadline = None;
        self.mapper = None;
        self.display.set_status(STATUS_STOPPED);
        self.state = PipelineState::Stopped;
        info!("pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CaptureError;
    use crate::level::AdaptiveRange;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingDisplay {
        frames: Vec<PathBuf>,
        statuses: Vec<String>,
        hidden: usize,
    }

    impl Display for RecordingDisplay {
        fn show_frame(&mut self, path: &Path) {
            self.frames.push(path.to_path_buf());
        }

        fn set_status(&mut self, text: &str) {
            self.statuses.push(text.to_string());
        }

        fn hide_status(&mut self) {
            self.hidden += 1;
        }
    }

    #[derive(Default)]
    struct FakeSource {
        acquisitions: usize,
        fail: bool,
    }

    impl CaptureSource for FakeSource {
        type Handle = ();

        fn acquire(&mut self, _window: SampleWindow) -> Result<(), CaptureError> {
            self.acquisitions += 1;
            if self.fail { Err(CaptureError::NoDevice) } else { Ok(()) }
        }
    }

    fn pipeline_with(frame_count: usize) -> Pipeline<RecordingDisplay, FakeSource> {
        let frames = FrameSet::new("frames", frame_count);
        Pipeline::new(frames, RecordingDisplay::default(), FakeSource::default())
    }

    fn listening_pipeline(frame_count: usize) -> Pipeline<RecordingDisplay, FakeSource> {
        let mut pipeline = pipeline_with(frame_count);
        pipeline.state = PipelineState::Listening;
        pipeline.mapper = Some(LevelMapper::new(AdaptiveRange::new(0.01, 0.5)));
        pipeline
    }

    #[test]
    fn test_start_acquires_and_calibrates() {
        let mut pipeline = pipeline_with(10);

        pipeline.start();

        assert_eq!(pipeline.source.acquisitions, 1);
        assert_eq!(pipeline.state(), PipelineState::Calibrating);
        assert_eq!(pipeline.display.statuses, vec![STATUS_CALIBRATING]);
    }

    #[test]
    fn test_second_start_performs_no_second_acquisition() {
        let mut pipeline = pipeline_with(10);

        pipeline.start();
        pipeline.start();

        assert_eq!(pipeline.source.acquisitions, 1);
        assert_eq!(pipeline.state(), PipelineState::Calibrating);
        assert_eq!(pipeline.display.statuses, vec![STATUS_CALIBRATING]);
    }

    #[test]
    fn test_failed_acquisition_is_terminal() {
        let mut pipeline = pipeline_with(10);
        pipeline.source.fail = true;

        pipeline.start();

        assert_eq!(pipeline.state(), PipelineState::Error);
        assert_eq!(pipeline.display.statuses, vec![STATUS_UNAVAILABLE]);

        // No retry: a later start does not touch the device again.
        pipeline.start();
        assert_eq!(pipeline.source.acquisitions, 1);
        assert_eq!(pipeline.state(), PipelineState::Error);
    }

    #[test]
    fn test_restart_after_stop_reacquires_once() {
        let mut pipeline = pipeline_with(10);

        pipeline.start();
        pipeline.stop();
        assert!(pipeline.stream.is_none());

        pipeline.start();
        assert_eq!(pipeline.source.acquisitions, 2);
        assert_eq!(pipeline.state(), PipelineState::Calibrating);
    }

    #[test]
    fn test_stop_before_start_is_a_noop() {
        let mut pipeline = pipeline_with(4);

        pipeline.stop();
        pipeline.stop();

        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.display.statuses.is_empty());
    }

    #[test]
    fn test_identical_frames_are_presented_once() {
        let mut pipeline = listening_pipeline(10);
        let now = Instant::now();

        // Silence every tick: the rest frame is computed each time but
        // presented only on the first.
        pipeline.tick(now);
        pipeline.tick(now + Duration::from_millis(16));
        pipeline.tick(now + Duration::from_millis(32));

        assert_eq!(pipeline.display.frames.len(), 1);
        assert_eq!(pipeline.display.frames[0], PathBuf::from("frames/0001.png"));
    }

    #[test]
    fn test_sustained_loud_input_reaches_last_frame() {
        let mut pipeline = listening_pipeline(10);
        pipeline.window.push(&vec![1.0; WINDOW_SAMPLES]);

        let mut now = Instant::now();
        for _ in 0..100 {
            pipeline.tick(now);
            now += Duration::from_millis(16);
        }

        assert_eq!(
            pipeline.display.frames.last(),
            Some(&PathBuf::from("frames/0010.png"))
        );
    }

    #[test]
    fn test_calibration_window_expiry_enters_listening() {
        let mut pipeline = pipeline_with(10);
        pipeline.state = PipelineState::Calibrating;
        pipeline.calibration = Some(Calibration::new());

        let start = Instant::now();
        pipeline.calibration_deadline = Some(start + CALIBRATION_WINDOW);

        pipeline.tick(start);
        assert_eq!(pipeline.state(), PipelineState::Calibrating);

        pipeline.tick(start + CALIBRATION_WINDOW);
        assert_eq!(pipeline.state(), PipelineState::Listening);
        assert!(pipeline.mapper.is_some());
        assert_eq!(pipeline.display.statuses, vec![STATUS_LISTENING]);
        assert_eq!(pipeline.display.hidden, 1);
    }

    #[test]
    fn test_silent_calibration_produces_minimum_range() {
        let mut pipeline = pipeline_with(10);
        pipeline.state = PipelineState::Calibrating;
        pipeline.calibration = Some(Calibration::new());
        pipeline.calibration_deadline = Some(Instant::now());

        pipeline.tick(Instant::now());

        let range = pipeline.mapper.as_ref().unwrap().range();
        assert_eq!(range.noise_floor(), 1e-5);
        assert_eq!(range.ceiling(), 1e-4);
    }

    #[test]
    fn test_stop_mid_calibration_discards_the_window() {
        let mut pipeline = pipeline_with(10);
        pipeline.start();
        assert_eq!(pipeline.state(), PipelineState::Calibrating);

        pipeline.stop();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.stream.is_none());
        assert!(pipeline.calibration.is_none());
        assert!(pipeline.mapper.is_none());
        assert_eq!(
            pipeline.display.statuses,
            vec![STATUS_CALIBRATING, STATUS_STOPPED]
        );

        // A later tick does nothing.
        pipeline.tick(Instant::now());
        assert!(pipeline.display.frames.is_empty());
    }

    #[test]
    fn test_single_frame_set_always_presents_frame_one() {
        let mut pipeline = listening_pipeline(1);
        pipeline.window.push(&vec![1.0; WINDOW_SAMPLES]);

        let mut now = Instant::now();
        for _ in 0..20 {
            pipeline.tick(now);
            now += Duration::from_millis(16);
        }

        assert_eq!(pipeline.display.frames.len(), 1);
        assert_eq!(pipeline.display.frames[0], PathBuf::from("frames/0001.png"));
    }
}
