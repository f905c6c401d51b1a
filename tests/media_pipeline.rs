//! Frame-accurate seek behavior against real media; requires the
//! `media-ffmpeg` feature and an ffmpeg binary to synthesize the fixture.
#![cfg(feature = "media-ffmpeg")]

use reelforge::export::is_ffmpeg_on_path;
use reelforge::media::VideoDecoder;
use std::path::PathBuf;
use std::process::Command;

/// Synthesize a 10-second 30 fps test clip, once per process.
fn fixture_video() -> Option<PathBuf> {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return None;
    }
    let path = std::env::temp_dir().join(format!(
        "reelforge_seek_fixture_{}.mp4",
        std::process::id()
    ));
    if path.exists() {
        return Some(path);
    }
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=10:size=320x240:rate=30",
            "-pix_fmt",
            "yuv420p",
            "-g",
            "30",
        ])
        .arg(&path)
        .status()
        .ok()?;
    status.success().then_some(path)
}

const OUT_PERIOD: f64 = 1.0 / 30.0;

#[test]
fn s5_seek_lands_on_the_frame_covering_the_target() {
    let Some(path) = fixture_video() else {
        return;
    };
    let mut dec = VideoDecoder::open(&path).unwrap();
    assert_eq!(dec.width(), 320);
    assert_eq!(dec.height(), 240);

    // Element: startTime 1.0, trimStart 2.0. Timeline t=1.0 -> source 2.0.
    let frame = dec.frame_at(2.0, OUT_PERIOD).unwrap();
    assert!(
        (frame.pts_secs - 2.0).abs() <= OUT_PERIOD,
        "got pts {}",
        frame.pts_secs
    );

    // Timeline t=3.999 -> source 4.999: the covering frame starts at or
    // before 4.999 and within one source frame period of it.
    let frame = dec.frame_at(4.999, OUT_PERIOD).unwrap();
    assert!(
        frame.pts_secs <= 4.999 + 1e-6 && 4.999 - frame.pts_secs < OUT_PERIOD + 1e-6,
        "got pts {}",
        frame.pts_secs
    );
}

#[test]
fn nearby_requests_reuse_the_current_frame() {
    let Some(path) = fixture_video() else {
        return;
    };
    let mut dec = VideoDecoder::open(&path).unwrap();
    let first = dec.frame_at(1.0, OUT_PERIOD).unwrap();
    // Within one output frame period: the decoder may (and here does) hand
    // back the same frame without touching the demuxer.
    let again = dec.frame_at(1.0 + OUT_PERIOD / 2.0, OUT_PERIOD).unwrap();
    assert_eq!(first.pts_secs, again.pts_secs);
}

#[test]
fn backward_request_seeks_instead_of_decoding_to_eof() {
    let Some(path) = fixture_video() else {
        return;
    };
    let mut dec = VideoDecoder::open(&path).unwrap();
    let late = dec.frame_at(8.0, OUT_PERIOD).unwrap();
    assert!((late.pts_secs - 8.0).abs() <= OUT_PERIOD);

    let early = dec.frame_at(0.5, OUT_PERIOD).unwrap();
    assert!(
        (early.pts_secs - 0.5).abs() <= OUT_PERIOD,
        "backward seek landed at {}",
        early.pts_secs
    );
}

#[test]
fn requests_past_eof_hold_the_last_frame() {
    let Some(path) = fixture_video() else {
        return;
    };
    let mut dec = VideoDecoder::open(&path).unwrap();
    let frame = dec.frame_at(9.9, OUT_PERIOD).unwrap();
    let past = dec.frame_at(11.0, OUT_PERIOD).unwrap();
    assert!(past.pts_secs >= frame.pts_secs);
}
