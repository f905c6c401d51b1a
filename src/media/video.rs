//! Stateful per-source video decoder.
//!
//! One decoder per media id, long-lived across frames. Temporal locality in
//! the frame loop means mostly forward progress; a backward or far-forward
//! request triggers a keyframe-aligned backward seek followed by a
//! decode-forward burn to the target. Opening and seeking dominate cost, so
//! a decoder is never reopened mid-run.

use crate::foundation::error::ReelResult;
use std::sync::Arc;

/// One decoded video frame in opaque RGBA8 at the source's native size.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Source presentation time of this frame in seconds.
    pub pts_secs: f64,
    /// Pixel bytes, `width * height * 4` long, alpha always 255.
    pub data: Arc<Vec<u8>>,
}

/// Wall-time budget for a single seek + decode-forward cycle.
pub const SEEK_TIMEOUT_MS: u64 = 1_000;

/// Forward distance (seconds) beyond which decoding ahead is slower than a
/// fresh keyframe seek.
const FORWARD_SEEK_THRESHOLD_SECS: f64 = 1.0;

#[cfg(feature = "media-ffmpeg")]
pub use imp::VideoDecoder;

#[cfg(feature = "media-ffmpeg")]
mod imp {
    use super::{FORWARD_SEEK_THRESHOLD_SECS, SEEK_TIMEOUT_MS, VideoFrame};
    use crate::foundation::error::{ReelError, ReelResult};
    use ffmpeg_the_third as ffmpeg;
    use ffmpeg::format::{Pixel, input};
    use ffmpeg::media::Type;
    use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Instant;

    /// Stateful decoder bound to one source file.
    pub struct VideoDecoder {
        path: PathBuf,
        ictx: ffmpeg::format::context::Input,
        decoder: ffmpeg::decoder::video::Video,
        scaler: SwsContext,
        video_idx: usize,
        tb_num: i32,
        tb_den: i32,
        width: u32,
        height: u32,
        /// Average source frame period in seconds; the acceptance window for
        /// "the frame whose presentation interval covers the target".
        frame_period: f64,
        current: Option<VideoFrame>,
        last_pts: i64,
        frame_buf: Vec<u8>,
    }

    impl VideoDecoder {
        /// Open `path` and prepare decode at the source's native size.
        pub fn open(path: &Path) -> ReelResult<Self> {
            ffmpeg::init().map_err(|e| ReelError::media(format!("ffmpeg init: {e}")))?;

            let ictx = input(path)
                .map_err(|e| ReelError::media(format!("open '{}': {e}", path.display())))?;
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| ReelError::media(format!("no video stream in '{}'", path.display())))?;
            let video_idx = stream.index();
            let tb = stream.time_base();
            let (tb_num, tb_den) = (tb.numerator(), tb.denominator());

            let avg = stream.avg_frame_rate();
            let frame_period = if avg.numerator() > 0 {
                f64::from(avg.denominator()) / f64::from(avg.numerator())
            } else {
                1.0 / 30.0
            };

            let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| ReelError::media(format!("codec context: {e}")))?;
            let decoder = dec_ctx
                .decoder()
                .video()
                .map_err(|e| ReelError::media(format!("video decoder: {e}")))?;

            let width = decoder.width();
            let height = decoder.height();
            if width == 0 || height == 0 {
                return Err(ReelError::media(format!(
                    "source '{}' reports zero dimensions",
                    path.display()
                )));
            }

            let scaler = SwsContext::get(
                decoder.format(),
                width,
                height,
                Pixel::RGBA,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|e| ReelError::media(format!("swscale context: {e}")))?;

            Ok(Self {
                path: path.to_path_buf(),
                ictx,
                decoder,
                scaler,
                video_idx,
                tb_num,
                tb_den,
                width,
                height,
                frame_period,
                current: None,
                last_pts: -1,
                frame_buf: Vec::with_capacity(width as usize * height as usize * 4),
            })
        }

        /// Native source width.
        pub fn width(&self) -> u32 {
            self.width
        }

        /// Native source height.
        pub fn height(&self) -> u32 {
            self.height
        }

        fn ts_to_pts(&self, t: f64) -> i64 {
            (t * f64::from(self.tb_den) / f64::from(self.tb_num)) as i64
        }

        fn pts_to_secs(&self, pts: i64) -> f64 {
            pts as f64 * f64::from(self.tb_num) / f64::from(self.tb_den)
        }

        /// Return the frame whose presentation interval covers `tau` seconds.
        ///
        /// When the currently held frame is within `out_frame_period` of the
        /// target it is reused without touching the demuxer; a backward or
        /// far-forward target seeks to the keyframe at or before `tau` and
        /// decodes forward. A cycle that exceeds [`SEEK_TIMEOUT_MS`] returns
        /// [`ReelError::SeekTimeout`]; the caller skips the element for this
        /// frame only.
        pub fn frame_at(&mut self, tau: f64, out_frame_period: f64) -> ReelResult<VideoFrame> {
            let tau = tau.max(0.0);

            if let Some(cur) = &self.current
                && (tau - cur.pts_secs).abs() < out_frame_period
            {
                return Ok(cur.clone());
            }

            let need_seek = match &self.current {
                None => tau > 0.0,
                Some(cur) => {
                    tau < cur.pts_secs || tau - cur.pts_secs > FORWARD_SEEK_THRESHOLD_SECS
                }
            };
            if need_seek {
                self.seek_backward_to(tau);
            }

            // Accept the first decoded frame whose interval
            // [pts, pts + frame_period) reaches tau.
            let accept_after = tau - self.frame_period;
            let deadline = Instant::now() + std::time::Duration::from_millis(SEEK_TIMEOUT_MS);
            let mut last_seen: Option<VideoFrame> = None;

            loop {
                if Instant::now() >= deadline {
                    return Err(ReelError::SeekTimeout(SEEK_TIMEOUT_MS));
                }
                match self.next_frame()? {
                    Some(frame) => {
                        if frame.pts_secs > accept_after {
                            self.current = Some(frame.clone());
                            return Ok(frame);
                        }
                        // Pre-target frame after a keyframe-aligned seek:
                        // keep burning forward.
                        last_seen = Some(frame);
                    }
                    None => {
                        // EOF before the target: hold the last frame seen,
                        // matching requests at or past the clip end.
                        if let Some(frame) = last_seen.take() {
                            self.current = Some(frame.clone());
                            return Ok(frame);
                        }
                        if let Some(cur) = &self.current {
                            return Ok(cur.clone());
                        }
                        return Err(ReelError::media(format!(
                            "no decodable frame at {tau:.3}s in '{}'",
                            self.path.display()
                        )));
                    }
                }
            }
        }

        /// Backward seek so the demuxer lands on the keyframe at or before
        /// `target_secs`. Container-level seeks take `AV_TIME_BASE` units.
        /// Failure is soft: the PTS filter in `frame_at` discards pre-roll
        /// frames wherever the demuxer actually is.
        fn seek_backward_to(&mut self, target_secs: f64) {
            let seek_ts = (target_secs * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
            if let Err(e) = self.ictx.seek(seek_ts, ..=seek_ts) {
                tracing::warn!(
                    path = %self.path.display(),
                    target_secs,
                    "video seek soft-failed: {e}; decoding from current position"
                );
            }
            self.decoder.flush();
            self.current = None;
            self.last_pts = self.ts_to_pts(target_secs).saturating_sub(1);
        }

        /// Decode the next frame sequentially; `None` at EOF.
        fn next_frame(&mut self) -> ReelResult<Option<VideoFrame>> {
            for (stream, packet) in self.ictx.packets().flatten() {
                if stream.index() != self.video_idx {
                    continue;
                }
                if self.decoder.send_packet(&packet).is_err() {
                    continue;
                }
                let mut decoded = ffmpeg::util::frame::video::Video::empty();
                while self.decoder.receive_frame(&mut decoded).is_ok() {
                    let pts = decoded.pts().unwrap_or(self.last_pts + 1);
                    self.last_pts = pts;
                    let pts_secs = self.pts_to_secs(pts);

                    let mut out = ffmpeg::util::frame::video::Video::empty();
                    self.scaler
                        .run(&decoded, &mut out)
                        .map_err(|e| ReelError::media(format!("swscale run: {e}")))?;
                    let data = copy_frame_rgba(&mut self.frame_buf, &out, self.width, self.height);
                    return Ok(Some(VideoFrame {
                        width: self.width,
                        height: self.height,
                        pts_secs,
                        data: Arc::new(data),
                    }));
                }
            }
            Ok(None)
        }
    }

    /// Copy an RGBA ffmpeg frame into `buf`, stripping stride padding, and
    /// return a clone of the filled buffer.
    fn copy_frame_rgba(
        buf: &mut Vec<u8>,
        frame: &ffmpeg::util::frame::video::Video,
        out_w: u32,
        out_h: u32,
    ) -> Vec<u8> {
        let stride = frame.stride(0);
        let raw = frame.data(0);
        let row_bytes = out_w as usize * 4;

        buf.clear();
        for row in 0..out_h as usize {
            let s = row * stride;
            buf.extend_from_slice(&raw[s..s + row_bytes]);
        }
        buf.clone()
    }
}

#[cfg(not(feature = "media-ffmpeg"))]
pub use stub::VideoDecoder;

#[cfg(not(feature = "media-ffmpeg"))]
mod stub {
    use super::VideoFrame;
    use crate::foundation::error::{ReelError, ReelResult};
    use std::path::Path;

    /// Stateful decoder bound to one source file.
    ///
    /// Built without the `media-ffmpeg` feature this type cannot be
    /// constructed; image-only timelines are unaffected.
    pub struct VideoDecoder {
        _private: (),
    }

    impl VideoDecoder {
        /// Always fails: video decode requires the `media-ffmpeg` feature.
        pub fn open(_path: &Path) -> ReelResult<Self> {
            Err(ReelError::media(
                "video assets require the 'media-ffmpeg' feature",
            ))
        }

        /// Native source width.
        pub fn width(&self) -> u32 {
            0
        }

        /// Native source height.
        pub fn height(&self) -> u32 {
            0
        }

        /// Always fails: video decode requires the `media-ffmpeg` feature.
        pub fn frame_at(&mut self, _tau: f64, _out_frame_period: f64) -> ReelResult<VideoFrame> {
            Err(ReelError::media(
                "video assets require the 'media-ffmpeg' feature",
            ))
        }
    }
}

/// Convenience constructor used by the media cache.
pub(crate) fn open_decoder(path: &std::path::Path) -> ReelResult<VideoDecoder> {
    VideoDecoder::open(path)
}
