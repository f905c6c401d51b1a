//! End-to-end driver scenarios against the in-memory sink.

use reelforge::{
    ExportSession, ExportSettings, ExportStage, FrameSink, InMemorySink, MemoryByteSink, ReelResult,
    Rgba8, SinkConfig, Surface, TimelineModel,
};
use std::collections::BTreeMap;

fn black_model(duration: f64, w: u32, h: u32) -> TimelineModel {
    TimelineModel {
        tracks: Vec::new(),
        duration,
        nominal_width: w,
        nominal_height: h,
        nominal_fps: 30,
        media: BTreeMap::new(),
    }
}

/// Counts frames and verifies sampled pixels without retaining payloads.
#[derive(Default)]
struct PixelCheckSink {
    expected: [u8; 4],
    frames: u64,
    mismatches: u64,
    audio_configured: bool,
}

impl FrameSink for PixelCheckSink {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()> {
        self.audio_configured = cfg.audio.is_some();
        Ok(())
    }

    fn push_frame(&mut self, _idx: u64, frame: &Surface) -> ReelResult<()> {
        let probes = [
            (0, 0),
            (frame.width - 1, 0),
            (0, frame.height - 1),
            (frame.width - 1, frame.height - 1),
            (frame.width / 2, frame.height / 2),
        ];
        for (x, y) in probes {
            if frame.pixel(x, y) != self.expected {
                self.mismatches += 1;
            }
        }
        self.frames += 1;
        Ok(())
    }

    fn frames_pushed(&self) -> u64 {
        self.frames
    }

    fn finish(&mut self) -> ReelResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn abort(&mut self) {}
}

#[test]
fn s1_two_second_black_export_emits_61_black_frames() {
    let settings = ExportSettings {
        width: 1920,
        height: 1080,
        fps: 30,
        background: Rgba8::parse("#000000").unwrap(),
        hardware_acceleration: false,
        ..Default::default()
    };
    let session = ExportSession::new(black_model(2.0, 1920, 1080), settings).unwrap();

    let mut sink = PixelCheckSink {
        expected: [0, 0, 0, 255],
        ..Default::default()
    };
    let mut bytes = MemoryByteSink::new();
    let report = session.run(&mut sink, &mut bytes).unwrap();

    assert_eq!(report.total_frames, 61);
    assert_eq!(report.frames_encoded, 61);
    assert_eq!(sink.mismatches, 0, "every sampled pixel must be #000000");
    assert!(!report.audio_present);
    assert!(!sink.audio_configured, "no audio track for a silent timeline");
}

#[test]
fn cancellation_after_first_progress_event_stops_the_run() {
    let settings = ExportSettings {
        width: 64,
        height: 64,
        fps: 30,
        hardware_acceleration: false,
        ..Default::default()
    };
    let mut session = ExportSession::new(black_model(60.0, 64, 64), settings).unwrap();
    let token = session.cancel_token();
    let rx = session.subscribe_progress();

    // A consumer thread cancels as soon as real progress shows up.
    let watcher = std::thread::spawn(move || {
        for event in rx.iter() {
            if event.stage == ExportStage::Processing && event.percentage > 0.0 {
                token.cancel();
                break;
            }
        }
        rx
    });

    let mut sink = InMemorySink::new();
    let mut bytes = MemoryByteSink::new();
    let err = session.run(&mut sink, &mut bytes).unwrap_err();
    assert!(err.is_cancelled());
    assert!(bytes.bytes.is_empty(), "no MP4 may reach the byte-sink");

    let rx = watcher.join().unwrap();
    let tail: Vec<_> = rx.try_iter().collect();
    let terminal = tail.last().map(|e| e.stage);
    assert_eq!(terminal, Some(ExportStage::Cancelled));
    // At most one further processing tick after the cancel signal.
    let processing_after = tail
        .iter()
        .filter(|e| e.stage == ExportStage::Processing)
        .count();
    assert!(processing_after <= 1, "got {processing_after} ticks");
}

#[test]
fn identity_processor_output_matches_empty_pipeline() {
    use reelforge::effects::{FrameProcessor, ProcessorKind};

    struct Identity;
    impl FrameProcessor for Identity {
        fn id(&self) -> &str {
            "identity"
        }
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::Effect
        }
        fn process(
            &mut self,
            _surface: &mut Surface,
            _settings: &ExportSettings,
            _t: f64,
        ) -> ReelResult<()> {
            Ok(())
        }
    }

    let settings = ExportSettings {
        width: 64,
        height: 64,
        fps: 30,
        hardware_acceleration: false,
        ..Default::default()
    };

    let run = |with_identity: bool| -> Vec<(u64, Surface)> {
        let mut session =
            ExportSession::new(black_model(0.5, 64, 64), settings.clone()).unwrap();
        if with_identity {
            session.pipeline_mut().push(Box::new(Identity));
        }
        let mut sink = InMemorySink::new();
        let mut bytes = MemoryByteSink::new();
        session.run(&mut sink, &mut bytes).unwrap();
        sink.frames
    };

    let plain = run(false);
    let with_identity = run(true);
    assert_eq!(plain.len(), with_identity.len());
    for ((ia, fa), (ib, fb)) in plain.iter().zip(with_identity.iter()) {
        assert_eq!(ia, ib);
        assert_eq!(fa.data, fb.data);
    }
}

#[test]
fn two_runs_of_the_same_timeline_are_byte_identical() {
    let settings = ExportSettings {
        width: 64,
        height: 64,
        fps: 30,
        hardware_acceleration: false,
        ..Default::default()
    };
    let run = || {
        let session = ExportSession::new(black_model(0.5, 64, 64), settings.clone()).unwrap();
        let mut sink = InMemorySink::new();
        let mut bytes = MemoryByteSink::new();
        session.run(&mut sink, &mut bytes).unwrap();
        sink.frames
    };
    let a = run();
    let b = run();
    assert_eq!(a.len(), b.len());
    for ((ia, fa), (ib, fb)) in a.iter().zip(b.iter()) {
        assert_eq!(ia, ib);
        assert_eq!(fa.data, fb.data);
    }
}
