//! H.264+AAC MP4 sink backed by the system `ffmpeg` binary.
//!
//! Raw premultiplied RGBA frames are flattened against the background color
//! and streamed over stdin; the mixed PCM bed arrives as a second raw input.
//! The finished MP4 is read back into memory so the byte-sink decides where
//! it lands.

use crate::export::sink::{FrameSink, SinkConfig};
use crate::foundation::error::{ReelError, ReelResult};
use crate::foundation::math::mul_div255_u16;
use crate::render::Surface;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug, Default)]
pub struct FfmpegSinkOpts {
    /// Write the MP4 here instead of a temp path. The bytes are still read
    /// back and handed to the byte-sink; the file is kept.
    pub out_path: Option<PathBuf>,
}

/// Frame sink that spawns `ffmpeg` and muxes H.264 (High@4.2) + AAC-LC.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    out_path: Option<PathBuf>,
    out_is_temp: bool,
    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    pushed: u64,
    last_idx: Option<u64>,
}

impl FfmpegSink {
    /// Create a sink with the given options.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            out_path: None,
            out_is_temp: false,
            scratch: Vec::new(),
            cfg: None,
            pushed: 0,
            last_idx: None,
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(ReelError::validation("sink width/height must be non-zero"));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(ReelError::validation(
                "sink width/height must be even (required for yuv420p output)",
            ));
        }

        let encoder = select_h264_encoder(cfg.prefer_hardware)?;
        tracing::debug!(encoder, "h264 encoder selected");

        let (out_path, out_is_temp) = match &self.opts.out_path {
            Some(p) => (p.clone(), false),
            None => (
                std::env::temp_dir().join(format!(
                    "reelforge_export_{}_{}.mp4",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_nanos())
                        .unwrap_or(0)
                )),
                true,
            ),
        };

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args(["-y", "-loglevel", "error"]);

        // Input 0: raw RGBA frames over stdin at the output frame rate.
        cmd.args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ]);

        // Input 1: the mixed PCM bed, when the timeline carries audio.
        if let Some(audio) = cfg.audio.as_ref() {
            cmd.args([
                "-f",
                "f32le",
                "-ar",
                &audio.sample_rate.to_string(),
                "-ac",
                &audio.channels.to_string(),
                "-i",
            ])
            .arg(&audio.path);
        }

        cmd.args(["-c:v", encoder, "-b:v", &cfg.video_bitrate.to_string()]);
        if encoder == "libx264" {
            cmd.args(["-profile:v", "high", "-level:v", "4.2"]);
        }
        // Deterministic keyframe cadence: an IDR every 3 seconds, no
        // scene-cut extras.
        cmd.args([
            "-g",
            &cfg.keyframe_interval.to_string(),
            "-keyint_min",
            &cfg.keyframe_interval.to_string(),
            "-sc_threshold",
            "0",
            "-force_key_frames",
            "expr:gte(t,n_forced*3)",
            "-pix_fmt",
            "yuv420p",
        ]);

        match cfg.audio.as_ref() {
            Some(audio) => {
                cmd.args(["-c:a", "aac", "-b:a", &audio.bitrate.to_string()]);
            }
            None => {
                cmd.arg("-an");
            }
        }

        if cfg.fast_start {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.arg(&out_path);

        let mut child = cmd.spawn().map_err(|e| {
            ReelError::unsupported(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReelError::encoder("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReelError::encoder("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        self.scratch = vec![0u8; cfg.width as usize * cfg.height as usize * 4];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.out_path = Some(out_path);
        self.out_is_temp = out_is_temp;
        self.cfg = Some(cfg);
        self.pushed = 0;
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: u64, frame: &Surface) -> ReelResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| ReelError::encoder("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(ReelError::encoder("sink received out-of-order frame index"));
        }
        self.last_idx = Some(idx);

        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(ReelError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }

        flatten_premul_over_bg(&mut self.scratch, &frame.data, cfg.background)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ReelError::encoder("ffmpeg sink is already finalized"));
        };
        use std::io::Write as _;
        stdin
            .write_all(&self.scratch)
            .map_err(|e| ReelError::encoder(format!("write frame to ffmpeg stdin: {e}")))?;
        self.pushed += 1;
        Ok(())
    }

    fn frames_pushed(&self) -> u64 {
        self.pushed
    }

    fn finish(&mut self) -> ReelResult<Vec<u8>> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| ReelError::encoder("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| ReelError::encoder(format!("wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ReelError::encoder("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| ReelError::encoder(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(ReelError::encoder(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        let path = self
            .out_path
            .take()
            .ok_or_else(|| ReelError::encoder("ffmpeg sink has no output path"))?;
        let bytes = std::fs::read(&path)
            .map_err(|e| ReelError::encoder(format!("read mp4 '{}': {e}", path.display())))?;
        if self.out_is_temp {
            let _ = std::fs::remove_file(&path);
        }
        self.cfg = None;
        Ok(bytes)
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
        if let Some(path) = self.out_path.take()
            && self.out_is_temp
        {
            let _ = std::fs::remove_file(&path);
        }
        self.cfg = None;
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

/// Flatten premultiplied RGBA8 over an opaque background color.
fn flatten_premul_over_bg(dst: &mut [u8], src_premul: &[u8], bg: [u8; 4]) -> ReelResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(ReelError::validation(
            "flatten expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = u16::from(bg[0]);
    let bg_g = u16::from(bg[1]);
    let bg_b = u16::from(bg[2]);

    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            d[3] = 255;
            continue;
        }
        let inv = 255 - a;
        d[0] = (u16::from(s[0]) + mul_div255_u16(bg_r, inv)).min(255) as u8;
        d[1] = (u16::from(s[1]) + mul_div255_u16(bg_g, inv)).min(255) as u8;
        d[2] = (u16::from(s[2]) + mul_div255_u16(bg_b, inv)).min(255) as u8;
        d[3] = 255;
    }
    Ok(())
}

/// Pick the H.264 encoder: a platform hardware encoder when preferred and
/// present, otherwise `libx264`. Fails only when ffmpeg has no acceptable
/// H.264 configuration at all.
fn select_h264_encoder(prefer_hardware: bool) -> ReelResult<&'static str> {
    let listing = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| {
            ReelError::unsupported(format!("ffmpeg not available for encoder probe: {e}"))
        })?;
    let listing = String::from_utf8_lossy(&listing.stdout).into_owned();

    if prefer_hardware {
        const HW: [&str; 4] = [
            "h264_nvenc",
            "h264_videotoolbox",
            "h264_qsv",
            "h264_vaapi",
        ];
        for name in HW {
            if listing.contains(name) {
                return Ok(name);
            }
        }
        // Hardware preference falls back silently; the probe result is
        // logged by the caller.
    }

    if listing.contains("libx264") {
        return Ok("libx264");
    }
    Err(ReelError::unsupported(
        "no acceptable H.264 encoder configuration (libx264 missing)",
    ))
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
