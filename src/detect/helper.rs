use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use image::RgbImage;

use crate::detect::backend::{DetectorBackend, DetectorFactory};
use crate::detect::options::{DetectorOptions, RunningMode};
use crate::detect::result::{DetectorError, DetectorEvent, FrameDetections, ResultBundle};
use crate::frame::CameraFrame;
use crate::video::VideoSource;

/// Frames waiting for the live worker. Camera frames arriving while the
/// queue is full are dropped so results never lag far behind the preview.
const LIVE_QUEUE_DEPTH: usize = 2;

/// Adapter between detector configuration and a detection backend.
///
/// A helper is built for exactly one [`RunningMode`]; calling a detection
/// path for a different mode is a programming error and panics.
///
/// Configuration failures and live-stream results are delivered on the
/// listener channel as [`DetectorEvent`]s. Image and video detection return
/// their bundle directly.
pub struct ObjectDetectionHelper {
    options: DetectorOptions,
    factory: Arc<dyn DetectorFactory>,
    listener: Option<Sender<DetectorEvent>>,
    detector: Option<DetectorSlot>,
    stream_epoch: Instant,
}

enum DetectorSlot {
    Inline(Box<dyn DetectorBackend>),
    Live(LiveStreamWorker),
}

impl ObjectDetectionHelper {
    /// Create a helper and build its detector immediately.
    ///
    /// # Panics
    ///
    /// Live-stream mode without a listener has nowhere to deliver results
    /// and panics.
    pub fn new(
        options: DetectorOptions,
        factory: Arc<dyn DetectorFactory>,
        listener: Option<Sender<DetectorEvent>>,
    ) -> Self {
        let mut helper = Self {
            options,
            factory,
            listener,
            detector: None,
            stream_epoch: Instant::now(),
        };
        helper.setup();
        helper
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// True when a detector is built and ready to accept work.
    pub fn is_ready(&self) -> bool {
        self.detector.is_some()
    }

    /// (Re)build the detector from the current options. Failures are
    /// reported on the listener and leave the helper not-configured.
    pub fn setup(&mut self) {
        self.clear();

        if self.options.running_mode == RunningMode::LiveStream && self.listener.is_none() {
            panic!("live-stream detection requires a listener");
        }

        if let Err(e) = self.options.validate() {
            self.report(Err(DetectorError::other(format!(
                "object detector failed to initialize: {}",
                e
            ))));
            return;
        }

        let backend = match self.factory.create(&self.options) {
            Ok(backend) => backend,
            Err(err) => {
                log::error!("object detector failed to initialize: {}", err);
                self.report(Err(err));
                return;
            }
        };
        log::info!(
            "object detector ready: backend={} mode={:?} delegate={} model={} threshold={:.1} max_results={}",
            backend.name(),
            self.options.running_mode,
            self.options.delegate,
            self.options.model.display_name(),
            self.options.threshold,
            self.options.max_results
        );

        self.detector = match self.options.running_mode {
            RunningMode::Image | RunningMode::Video => Some(DetectorSlot::Inline(backend)),
            RunningMode::LiveStream => {
                let Some(listener) = self.listener.clone() else {
                    return;
                };
                match LiveStreamWorker::spawn(backend, listener) {
                    Ok(worker) => Some(DetectorSlot::Live(worker)),
                    Err(e) => {
                        self.report(Err(DetectorError::other(format!(
                            "failed to start live-stream worker: {}",
                            e
                        ))));
                        None
                    }
                }
            }
        };
        self.stream_epoch = Instant::now();
    }

    /// Replace the options and rebuild the detector.
    pub fn reconfigure(&mut self, options: DetectorOptions) {
        self.options = options;
        self.setup();
    }

    /// Release the detector. Subsequent calls behave as not-configured until
    /// [`setup`](Self::setup) runs again.
    pub fn clear(&mut self) {
        if self.detector.take().is_some() {
            log::debug!("object detector released");
        }
    }

    /// Submit one camera frame. The frame is converted to RGB, rotated
    /// upright and queued; the result arrives on the listener.
    ///
    /// Use the dimensions in the returned bundle when mapping boxes: after
    /// rotation they can differ from the camera's requested resolution.
    pub fn detect_live_stream_frame(&self, frame: CameraFrame) {
        self.require_mode(RunningMode::LiveStream, "detect_live_stream_frame");

        let Some(DetectorSlot::Live(worker)) = &self.detector else {
            log::debug!("live frame dropped: object detector not configured");
            return;
        };

        let captured_at = Instant::now();
        let timestamp_ms = self.stream_epoch.elapsed().as_millis() as u64;
        let image = match frame.into_upright_rgb() {
            Ok(image) => image,
            Err(e) => {
                self.report(Err(DetectorError::other(format!(
                    "camera frame could not be converted: {:#}",
                    e
                ))));
                return;
            }
        };

        worker.submit(LiveFrame {
            image,
            captured_at,
            timestamp_ms,
        });
    }

    /// Run detection on a single image.
    ///
    /// Returns `None` when no detector is configured or inference fails.
    pub fn detect_image(&mut self, image: &RgbImage) -> Option<ResultBundle> {
        self.require_mode(RunningMode::Image, "detect_image");

        let Some(DetectorSlot::Inline(backend)) = self.detector.as_mut() else {
            return None;
        };

        let start = Instant::now();
        match backend.detect(image, 0) {
            Ok(detections) => Some(ResultBundle {
                results: vec![FrameDetections {
                    timestamp_ms: 0,
                    detections,
                }],
                inference_time_ms: start.elapsed().as_millis() as u64,
                input_image_height: image.height(),
                input_image_width: image.width(),
            }),
            Err(e) => {
                log::error!("image detection failed: {:#}", e);
                None
            }
        }
    }

    /// Sample a video every `interval_ms` up to its duration and detect on
    /// each sampled frame.
    ///
    /// The run is all-or-nothing: if any frame cannot be decoded or
    /// detected, each failure is reported on the listener and the whole run
    /// returns `None`. The reported inference time is averaged per frame.
    pub fn detect_video(
        &mut self,
        source: &mut dyn VideoSource,
        interval_ms: u64,
    ) -> Option<ResultBundle> {
        self.require_mode(RunningMode::Video, "detect_video");

        if interval_ms == 0 {
            self.report(Err(DetectorError::other(
                "video inference interval must be greater than zero",
            )));
            return None;
        }

        let Some(DetectorSlot::Inline(backend)) = self.detector.as_mut() else {
            return None;
        };

        let start = Instant::now();

        let duration_ms = match source.duration_ms() {
            Ok(Some(duration_ms)) => duration_ms,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("video duration unavailable: {:#}", e);
                return None;
            }
        };
        // Decoded frames may be smaller than the container's nominal size,
        // so dimensions come from an actual frame.
        let (width, height) = match source.frame_at(0) {
            Ok(Some(first)) => first.dimensions(),
            Ok(None) => return None,
            Err(e) => {
                log::warn!("first video frame unavailable: {:#}", e);
                return None;
            }
        };

        let frames_to_read = duration_ms / interval_ms;
        let mut results = Vec::new();
        let mut errors = Vec::new();

        for timestamp_ms in sample_timestamps(duration_ms, interval_ms) {
            match source.frame_at(timestamp_ms) {
                Ok(Some(frame)) => match backend.detect(&frame, timestamp_ms) {
                    Ok(detections) => results.push(FrameDetections {
                        timestamp_ms,
                        detections,
                    }),
                    Err(e) => errors.push(DetectorError::other(format!(
                        "detection failed for video frame at {}ms: {:#}",
                        timestamp_ms, e
                    ))),
                },
                Ok(None) => errors.push(DetectorError::other(format!(
                    "frame at {}ms could not be retrieved",
                    timestamp_ms
                ))),
                Err(e) => errors.push(DetectorError::other(format!(
                    "frame at {}ms could not be decoded: {:#}",
                    timestamp_ms, e
                ))),
            }
        }

        if !errors.is_empty() {
            log::error!(
                "video detection failed on {} of {} frames",
                errors.len(),
                frames_to_read + 1
            );
            for err in errors {
                self.report(Err(err));
            }
            return None;
        }

        let inference_time_ms = start.elapsed().as_millis() as u64 / frames_to_read.max(1);
        Some(ResultBundle {
            results,
            inference_time_ms,
            input_image_height: height,
            input_image_width: width,
        })
    }

    fn require_mode(&self, expected: RunningMode, call: &str) {
        if self.options.running_mode != expected {
            panic!(
                "attempting to call {} while not using {:?} running mode (configured: {:?})",
                call, expected, self.options.running_mode
            );
        }
    }

    fn report(&self, event: DetectorEvent) {
        let Some(listener) = &self.listener else {
            if let Err(err) = event {
                log::warn!("object detector error with no listener: {}", err);
            }
            return;
        };
        if listener.send(event).is_err() {
            log::debug!("detector listener disconnected");
        }
    }
}

/// Sample times `0, interval, 2*interval, ...` up to `duration_ms`. Lazy, so a
/// bogus container duration never sizes an allocation.
fn sample_timestamps(duration_ms: u64, interval_ms: u64) -> impl Iterator<Item = u64> {
    (0..=duration_ms / interval_ms).map(move |i| i * interval_ms)
}

struct LiveFrame {
    image: RgbImage,
    captured_at: Instant,
    timestamp_ms: u64,
}

/// Background thread that owns the backend while in live-stream mode.
struct LiveStreamWorker {
    frames: Option<SyncSender<LiveFrame>>,
    join: Option<JoinHandle<()>>,
}

impl LiveStreamWorker {
    fn spawn(
        mut backend: Box<dyn DetectorBackend>,
        listener: Sender<DetectorEvent>,
    ) -> std::io::Result<Self> {
        let (frames, rx) = mpsc::sync_channel(LIVE_QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("live-detector".to_string())
            .spawn(move || run_live_stream(backend.as_mut(), rx, listener))?;
        Ok(Self {
            frames: Some(frames),
            join: Some(join),
        })
    }

    fn submit(&self, frame: LiveFrame) {
        let Some(frames) = &self.frames else {
            return;
        };
        match frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("live detector busy; frame dropped"),
            Err(TrySendError::Disconnected(_)) => log::debug!("live detector stopped; frame dropped"),
        }
    }
}

impl Drop for LiveStreamWorker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.frames.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("live detector thread panicked");
            }
        }
    }
}

fn run_live_stream(
    backend: &mut dyn DetectorBackend,
    frames: Receiver<LiveFrame>,
    listener: Sender<DetectorEvent>,
) {
    for frame in frames {
        let event = match backend.detect(&frame.image, frame.timestamp_ms) {
            Ok(detections) => Ok(ResultBundle {
                results: vec![FrameDetections {
                    timestamp_ms: frame.timestamp_ms,
                    detections,
                }],
                inference_time_ms: frame.captured_at.elapsed().as_millis() as u64,
                input_image_height: frame.image.height(),
                input_image_width: frame.image.width(),
            }),
            Err(e) => Err(DetectorError::other(format!("{:#}", e))),
        };
        if listener.send(event).is_err() {
            log::debug!("detector listener disconnected; stopping live detector");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{StubBackend, StubFactory};
    use crate::detect::options::Delegate;
    use crate::detect::result::{Detection, DetectorErrorCode};
    use crate::frame::PixelFormat;
    use crate::video::InMemoryVideo;
    use anyhow::{anyhow, Result};
    use std::time::Duration;

    struct FnFactory<F>(F);

    impl<F> DetectorFactory for FnFactory<F>
    where
        F: Fn(&DetectorOptions) -> Box<dyn DetectorBackend> + Send + Sync,
    {
        fn create(
            &self,
            options: &DetectorOptions,
        ) -> Result<Box<dyn DetectorBackend>, DetectorError> {
            Ok((self.0)(options))
        }
    }

    /// Fails on one timestamp, otherwise behaves like the stub.
    struct FailAt {
        timestamp_ms: u64,
        inner: StubBackend,
    }

    impl DetectorBackend for FailAt {
        fn name(&self) -> &'static str {
            "fail-at"
        }

        fn detect(&mut self, image: &RgbImage, timestamp_ms: u64) -> Result<Vec<Detection>> {
            if timestamp_ms == self.timestamp_ms {
                return Err(anyhow!("synthetic failure"));
            }
            self.inner.detect(image, timestamp_ms)
        }
    }

    fn image_options() -> DetectorOptions {
        DetectorOptions::default().with_threshold(0.0)
    }

    fn helper(mode: RunningMode) -> (ObjectDetectionHelper, Receiver<DetectorEvent>) {
        let (tx, rx) = mpsc::channel();
        let helper = ObjectDetectionHelper::new(
            image_options().with_running_mode(mode),
            Arc::new(StubFactory::new()),
            Some(tx),
        );
        (helper, rx)
    }

    fn video(frames: u64, interval_ms: u64) -> InMemoryVideo {
        InMemoryVideo::generate(frames, interval_ms, |i| {
            RgbImage::from_fn(32, 24, |x, y| image::Rgb([x as u8, y as u8, i as u8]))
        })
    }

    #[test]
    fn image_detection_reports_input_dimensions() {
        let (mut helper, _rx) = helper(RunningMode::Image);
        let image = RgbImage::from_pixel(40, 30, image::Rgb([9, 9, 9]));

        let bundle = helper.detect_image(&image).expect("bundle");
        assert_eq!(bundle.results.len(), 1);
        assert_eq!(bundle.input_image_width, 40);
        assert_eq!(bundle.input_image_height, 30);
        assert_eq!(bundle.results[0].detections.len(), 3);
    }

    #[test]
    #[should_panic(expected = "detect_image")]
    fn image_call_in_live_mode_panics() {
        let (mut helper, _rx) = helper(RunningMode::LiveStream);
        helper.detect_image(&RgbImage::new(4, 4));
    }

    #[test]
    #[should_panic(expected = "detect_video")]
    fn video_call_in_image_mode_panics() {
        let (mut helper, _rx) = helper(RunningMode::Image);
        helper.detect_video(&mut video(2, 100), 100);
    }

    #[test]
    #[should_panic(expected = "requires a listener")]
    fn live_stream_without_listener_panics() {
        ObjectDetectionHelper::new(
            image_options().with_running_mode(RunningMode::LiveStream),
            Arc::new(StubFactory::new()),
            None,
        );
    }

    #[test]
    fn gpu_failure_is_reported_and_helper_stays_unconfigured() {
        let (tx, rx) = mpsc::channel();
        let mut helper = ObjectDetectionHelper::new(
            image_options().with_delegate(Delegate::Gpu),
            Arc::new(StubFactory::new()),
            Some(tx),
        );

        let err = rx.try_recv().expect("event").expect_err("init error");
        assert_eq!(err.code, DetectorErrorCode::Gpu);
        assert!(!helper.is_ready());
        assert!(helper.detect_image(&RgbImage::new(4, 4)).is_none());

        helper.reconfigure(image_options().with_delegate(Delegate::Cpu));
        assert!(helper.is_ready());
        assert!(helper.detect_image(&RgbImage::new(4, 4)).is_some());
    }

    #[test]
    fn cleared_helper_is_not_configured() {
        let (mut helper, _rx) = helper(RunningMode::Image);
        helper.clear();
        assert!(helper.detect_image(&RgbImage::new(4, 4)).is_none());

        helper.setup();
        assert!(helper.detect_image(&RgbImage::new(4, 4)).is_some());
    }

    #[test]
    fn live_stream_reports_rotated_dimensions() {
        let (helper, rx) = helper(RunningMode::LiveStream);
        let frame = CameraFrame::new(vec![50u8; 64 * 48 * 4], 64, 48, PixelFormat::Rgba8888)
            .with_rotation(90);

        helper.detect_live_stream_frame(frame);

        let bundle = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("live result")
            .expect("bundle");
        assert_eq!(bundle.input_image_width, 48);
        assert_eq!(bundle.input_image_height, 64);
        assert_eq!(bundle.results.len(), 1);
    }

    #[test]
    fn live_stream_conversion_failure_is_reported() {
        let (helper, rx) = helper(RunningMode::LiveStream);
        let frame = CameraFrame::new(vec![0u8; 7], 64, 48, PixelFormat::Nv12);

        helper.detect_live_stream_frame(frame);

        let err = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("event")
            .expect_err("conversion error");
        assert_eq!(err.code, DetectorErrorCode::Other);
    }

    #[test]
    fn video_detection_samples_every_interval() {
        let (mut helper, _rx) = helper(RunningMode::Video);
        let mut source = video(5, 100);

        let bundle = helper.detect_video(&mut source, 100).expect("bundle");
        let timestamps: Vec<u64> = bundle.results.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(timestamps, vec![0, 100, 200, 300, 400]);
        assert_eq!(bundle.input_image_width, 32);
        assert_eq!(bundle.input_image_height, 24);
    }

    #[test]
    fn one_failed_frame_fails_the_whole_video() {
        let (tx, rx) = mpsc::channel();
        let factory = FnFactory(|options: &DetectorOptions| -> Box<dyn DetectorBackend> {
            Box::new(FailAt {
                timestamp_ms: 200,
                inner: StubBackend::new(options.threshold, options.max_results),
            })
        });
        let mut helper = ObjectDetectionHelper::new(
            image_options().with_running_mode(RunningMode::Video),
            Arc::new(factory),
            Some(tx),
        );

        assert!(helper.detect_video(&mut video(5, 100), 100).is_none());
        let err = rx.try_recv().expect("event").expect_err("frame error");
        assert!(err.message.contains("200ms"));
    }

    #[test]
    fn video_without_duration_yields_nothing() {
        let (mut helper, rx) = helper(RunningMode::Video);
        let mut empty = InMemoryVideo::new();

        assert!(helper.detect_video(&mut empty, 100).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sample_times_are_lazy_for_huge_durations() {
        let first: Vec<u64> = sample_timestamps(u64::MAX, 1).take(3).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(sample_timestamps(450, 100).last(), Some(400));
        assert_eq!(sample_timestamps(0, 100).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let (mut helper, rx) = helper(RunningMode::Video);
        assert!(helper.detect_video(&mut video(2, 100), 0).is_none());
        assert!(rx.try_recv().expect("event").is_err());
    }
}
