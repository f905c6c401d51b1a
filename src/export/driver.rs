//! The export session: frame loop, encoder backpressure, progress,
//! cancellation.
//!
//! Scheduling is single-threaded cooperative at the driver level: frame
//! `k + 1` does not begin compositing until frame `k` has been handed to the
//! encoder feeder and queue capacity is available. The bounded channel
//! between renderer and feeder is the encoder's in-flight queue bound.

use crate::audio::mix_timeline;
use crate::effects::EffectPipeline;
use crate::export::progress::{CancelToken, ExportStage, ProgressBus, ProgressEvent};
use crate::export::sink::{AudioStream, ByteSink, FastStart, FrameSink, SinkConfig};
use crate::foundation::error::{ReelError, ReelResult};
use crate::media::MediaCache;
use crate::render::{FrameRenderer, Surface};
use crate::timeline::{ExportSettings, TimelineModel, validate_strict};
use crossbeam_channel::{Receiver, SendTimeoutError, bounded};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// In-flight frames allowed between renderer and encoder feeder.
const ENCODER_QUEUE_BOUND: usize = 5;

/// Poll interval while blocked on a full encoder queue; cancellation is
/// observed between polls.
const QUEUE_POLL: Duration = Duration::from_millis(50);

/// Outcome of a completed export run.
#[derive(Clone, Debug)]
pub struct ExportReport {
    /// Human-readable location returned by the byte-sink.
    pub location: String,
    /// Frames the sink accepted.
    pub frames_encoded: u64,
    /// Frames the run scheduled (`N + 1`).
    pub total_frames: u64,
    /// Whether an audio track was muxed.
    pub audio_present: bool,
}

/// One validated timeline/settings pair pinned for an export run.
#[derive(Debug)]
pub struct ExportSession {
    model: TimelineModel,
    settings: ExportSettings,
    pipeline: EffectPipeline,
    bus: ProgressBus,
    cancel: CancelToken,
}

impl ExportSession {
    /// Validate the pair and pin it for a run.
    ///
    /// The effect pipeline is seeded from the ordered effect ids on the
    /// model's tracks; [`ExportSession::pipeline_mut`] can adjust it before
    /// the run starts.
    pub fn new(model: TimelineModel, settings: ExportSettings) -> ReelResult<Self> {
        validate_strict(&model, &settings)?;
        let pipeline = EffectPipeline::from_model(&model);
        Ok(Self {
            model,
            settings,
            pipeline,
            bus: ProgressBus::new(),
            cancel: CancelToken::new(),
        })
    }

    /// Token that cancels this run at its next suspension point.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Subscribe to progress events; call before [`ExportSession::run`].
    pub fn subscribe_progress(&mut self) -> Receiver<ProgressEvent> {
        self.bus.subscribe()
    }

    /// Mutable access to the effect pipeline; the driver must be quiescent.
    pub fn pipeline_mut(&mut self) -> &mut EffectPipeline {
        &mut self.pipeline
    }

    /// Run the export: mix audio, render every frame once, feed the sink
    /// under backpressure, and hand the finished bytes to the byte-sink.
    pub fn run(
        mut self,
        sink: &mut dyn FrameSink,
        byte_sink: &mut dyn ByteSink,
    ) -> ReelResult<ExportReport> {
        let n = (self.model.duration * f64::from(self.settings.fps)).ceil() as u64;
        let total_frames = n + 1;

        self.bus.publish(&ProgressEvent::stage_only(
            ExportStage::Initializing,
            total_frames,
        ));

        let mut cache = MediaCache::new();
        let mut audio_tmp = TempFileGuard(None);

        let audio = match mix_timeline(&self.model, &self.settings, &mut cache, &self.cancel) {
            Ok(Some(mixed)) => {
                let path = std::env::temp_dir().join(format!(
                    "reelforge_audio_mix_{}_{}.f32le",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_nanos())
                        .unwrap_or(0)
                ));
                if let Err(e) = mixed.write_f32le(&path) {
                    return self.fail(sink, &mut cache, total_frames, e);
                }
                audio_tmp.0 = Some(path.clone());
                Some(AudioStream {
                    path,
                    sample_rate: mixed.sample_rate,
                    channels: mixed.channels,
                    bitrate: self.settings.audio_bitrate,
                })
            }
            Ok(None) => None,
            Err(e) => return self.fail(sink, &mut cache, total_frames, e),
        };
        let audio_present = audio.is_some();

        let cfg = SinkConfig {
            width: self.settings.surface_width(),
            height: self.settings.surface_height(),
            fps: self.settings.fps,
            video_bitrate: self.settings.video_bitrate,
            background: self.settings.background.to_array(),
            keyframe_interval: self.settings.keyframe_interval(),
            prefer_hardware: self.settings.hardware_acceleration,
            fast_start: byte_sink.fast_start() == FastStart::InMemory,
            audio,
        };
        if let Err(e) = sink.begin(cfg) {
            return self.fail(sink, &mut cache, total_frames, e);
        }

        let mut renderer = FrameRenderer::new(&self.settings);
        let mut surface = renderer.new_surface();
        let fps = f64::from(self.settings.fps);
        let start = Instant::now();

        let mut loop_result: ReelResult<()> = Ok(());
        std::thread::scope(|scope| {
            let (tx, rx) = bounded::<(u64, Surface)>(ENCODER_QUEUE_BOUND);
            let sink_ref: &mut dyn FrameSink = &mut *sink;
            let feeder = scope.spawn(move || -> ReelResult<()> {
                while let Ok((idx, frame)) = rx.recv() {
                    sink_ref.push_frame(idx, &frame)?;
                }
                Ok(())
            });

            'frames: for k in 0..=n {
                if let Err(e) = self.cancel.check() {
                    loop_result = Err(e);
                    break;
                }

                let t = k as f64 / fps;
                match renderer.render_cancellable(
                    &mut surface,
                    &self.model,
                    &mut cache,
                    &mut self.pipeline,
                    t,
                    &self.cancel,
                ) {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => {
                        loop_result = Err(e);
                        break;
                    }
                    Err(_) => {
                        // Every frame index is emitted: a failed composition
                        // becomes a background-filled frame at the same
                        // timestamp.
                        surface.clear(self.settings.background);
                    }
                }

                let mut msg = (k, surface.clone());
                loop {
                    match tx.send_timeout(msg, QUEUE_POLL) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(m)) => {
                            msg = m;
                            if let Err(e) = self.cancel.check() {
                                loop_result = Err(e);
                                break 'frames;
                            }
                        }
                        Err(SendTimeoutError::Disconnected(_)) => {
                            loop_result =
                                Err(ReelError::encoder("encoder stopped accepting frames"));
                            break 'frames;
                        }
                    }
                }

                if k.is_multiple_of(10) || k == n {
                    self.bus.publish(&processing_event(k, n, total_frames, start));
                }
            }

            drop(tx);
            match feeder.join() {
                Ok(Ok(())) => {}
                Ok(Err(feed_err)) => {
                    // A real encoder failure is more useful than the generic
                    // disconnect the driver saw; cancellation still wins.
                    if !matches!(loop_result, Err(ReelError::Cancelled)) {
                        loop_result = Err(feed_err);
                    }
                }
                Err(_) => {
                    loop_result = Err(ReelError::encoder("encoder feeder thread panicked"));
                }
            }
        });

        if let Err(e) = loop_result {
            return self.fail(sink, &mut cache, total_frames, e);
        }

        self.bus.publish(&ProgressEvent::stage_only(
            ExportStage::Finalizing,
            total_frames,
        ));

        let pushed = sink.frames_pushed();
        if pushed != total_frames {
            // Finalize anyway; the mismatch is recorded, not fatal.
            tracing::error!(
                expected = total_frames,
                got = pushed,
                "encoded chunk count does not match expected frame count"
            );
        }

        let bytes = match sink.finish() {
            Ok(bytes) => bytes,
            Err(e) => return self.fail_finalized(&mut cache, total_frames, e),
        };
        let location = match byte_sink.save_buffer(&bytes) {
            Ok(location) => location,
            Err(e) => return self.fail_finalized(&mut cache, total_frames, e),
        };

        let _ = audio_tmp;
        cache.release();
        self.bus.publish(&ProgressEvent::stage_only(
            ExportStage::Complete,
            total_frames,
        ));

        Ok(ExportReport {
            location,
            frames_encoded: pushed,
            total_frames,
            audio_present,
        })
    }

    /// Terminal path before or during the frame loop: close the encoder,
    /// release the cache, report the distinct terminal stage.
    fn fail<T>(
        &self,
        sink: &mut dyn FrameSink,
        cache: &mut MediaCache,
        total_frames: u64,
        err: ReelError,
    ) -> ReelResult<T> {
        sink.abort();
        cache.release();
        self.publish_terminal(total_frames, &err);
        Err(err)
    }

    /// Terminal path after the encoder already flushed.
    fn fail_finalized<T>(
        &self,
        cache: &mut MediaCache,
        total_frames: u64,
        err: ReelError,
    ) -> ReelResult<T> {
        cache.release();
        self.publish_terminal(total_frames, &err);
        Err(err)
    }

    fn publish_terminal(&self, total_frames: u64, err: &ReelError) {
        let stage = if err.is_cancelled() {
            ExportStage::Cancelled
        } else {
            ExportStage::Error
        };
        let mut event = ProgressEvent::stage_only(stage, total_frames);
        if stage == ExportStage::Error {
            event.error = Some(err.to_string());
        }
        self.bus.publish(&event);
    }
}

fn processing_event(k: u64, n: u64, total_frames: u64, start: Instant) -> ProgressEvent {
    let elapsed = start.elapsed().as_secs_f64();
    let percentage = if n == 0 {
        100.0
    } else {
        (k as f64 / n as f64 * 100.0) as f32
    };
    let (eta, speed) = if k > 0 && elapsed > 0.0 {
        (
            Some(elapsed / k as f64 * (n - k) as f64),
            Some(k as f64 / elapsed),
        )
    } else {
        (None, None)
    };
    ProgressEvent {
        current_frame: k,
        total_frames,
        percentage,
        stage: ExportStage::Processing,
        estimated_time_remaining: eta,
        render_speed: speed,
        error: None,
    }
}

struct TempFileGuard(Option<PathBuf>);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::sink::{InMemorySink, MemoryByteSink};
    use crate::timeline::Rgba8;
    use std::collections::BTreeMap;

    fn black_model(duration: f64) -> TimelineModel {
        TimelineModel {
            tracks: Vec::new(),
            duration,
            nominal_width: 64,
            nominal_height: 64,
            nominal_fps: 30,
            media: BTreeMap::new(),
        }
    }

    fn small_settings() -> ExportSettings {
        ExportSettings {
            width: 64,
            height: 64,
            fps: 30,
            background: Rgba8::BLACK,
            hardware_acceleration: false,
            ..Default::default()
        }
    }

    #[test]
    fn invalid_timeline_fails_before_any_frame() {
        let err = ExportSession::new(black_model(0.0), small_settings()).unwrap_err();
        assert!(err.to_string().contains("validation error"));
    }

    #[test]
    fn frame_loop_emits_every_index_once() {
        let session = ExportSession::new(black_model(1.0), small_settings()).unwrap();
        let mut sink = InMemorySink::new();
        let mut bytes = MemoryByteSink::new();
        let report = session.run(&mut sink, &mut bytes).unwrap();

        assert_eq!(report.total_frames, 31);
        assert_eq!(report.frames_encoded, 31);
        assert!(!report.audio_present);
        for (i, (idx, frame)) in sink.frames.iter().enumerate() {
            assert_eq!(*idx, i as u64);
            assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255]);
        }
    }

    #[test]
    fn single_frame_duration_emits_two_frames() {
        // duration < 1/fps: N = ceil(0.01 * 30) = 1, frames k=0 and k=1.
        let session = ExportSession::new(black_model(0.01), small_settings()).unwrap();
        let mut sink = InMemorySink::new();
        let mut bytes = MemoryByteSink::new();
        let report = session.run(&mut sink, &mut bytes).unwrap();
        assert_eq!(report.frames_encoded, 2);
    }

    #[test]
    fn progress_is_monotonic_and_stages_move_forward() {
        let mut session = ExportSession::new(black_model(2.0), small_settings()).unwrap();
        let rx = session.subscribe_progress();
        let mut sink = InMemorySink::new();
        let mut bytes = MemoryByteSink::new();
        session.run(&mut sink, &mut bytes).unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert!(!events.is_empty());
        let mut last_pct = -1.0f32;
        let mut last_stage = ExportStage::Initializing;
        for e in &events {
            assert!(e.stage >= last_stage, "stage went backwards");
            if e.stage == ExportStage::Processing {
                assert!(e.percentage >= last_pct, "percentage decreased");
                last_pct = e.percentage;
            }
            last_stage = e.stage;
        }
        assert_eq!(events.last().map(|e| e.stage), Some(ExportStage::Complete));
    }

    #[test]
    fn cancellation_is_observed_and_distinct() {
        let mut session = ExportSession::new(black_model(60.0), small_settings()).unwrap();
        let token = session.cancel_token();
        let rx = session.subscribe_progress();
        token.cancel();

        let mut sink = InMemorySink::new();
        let mut bytes = MemoryByteSink::new();
        let err = session.run(&mut sink, &mut bytes).unwrap_err();
        assert!(err.is_cancelled());
        assert!(sink.is_aborted());
        assert!(bytes.bytes.is_empty(), "no MP4 may be delivered");

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events.last().map(|e| e.stage),
            Some(ExportStage::Cancelled)
        );
    }
}
