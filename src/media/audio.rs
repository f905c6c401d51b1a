//! Full-clip audio decode at the source's native rate and channel count.
//!
//! The mixer owns resampling to the output rate, so decode only converts the
//! sample format to packed (interleaved) f32 and leaves rate and layout
//! untouched.

use crate::foundation::error::ReelResult;

/// Fully decoded interleaved f32 PCM at the source's native parameters.
#[derive(Clone, Debug, Default)]
pub struct AudioClip {
    /// Native sample rate in Hz; 0 when the source had no audio stream.
    pub sample_rate: u32,
    /// Native channel count.
    pub channels: u16,
    /// Interleaved f32 samples, `frames * channels` long.
    pub interleaved: Vec<f32>,
}

impl AudioClip {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.interleaved.len() / usize::from(self.channels)
    }

    /// Clip duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Sample for channel `c` at frame `i`; silence out of range.
    pub fn sample(&self, c: usize, i: usize) -> f32 {
        let ch = usize::from(self.channels);
        if c >= ch {
            return 0.0;
        }
        self.interleaved.get(i * ch + c).copied().unwrap_or(0.0)
    }
}

#[cfg(feature = "media-ffmpeg")]
pub use imp::decode_audio_clip;

#[cfg(feature = "media-ffmpeg")]
mod imp {
    use super::AudioClip;
    use crate::foundation::error::{ReelError, ReelResult};
    use ffmpeg_the_third as ffmpeg;
    use ffmpeg::format::input;
    use ffmpeg::format::sample::{Sample, Type as SampleType};
    use ffmpeg::media::Type as MediaType;
    use ffmpeg::software::resampling;
    use ffmpeg::util::frame::audio::Audio as AudioFrame;
    use std::path::Path;

    const PACKED_F32: Sample = Sample::F32(SampleType::Packed);

    /// Decode every audio sample of `path` into an [`AudioClip`].
    ///
    /// Sources without an audio stream decode to an empty clip rather than an
    /// error, so video files without audio tracks mix to silence.
    pub fn decode_audio_clip(path: &Path) -> ReelResult<AudioClip> {
        ffmpeg::init().map_err(|e| ReelError::media(format!("ffmpeg init: {e}")))?;

        let mut ictx = input(path)
            .map_err(|e| ReelError::media(format!("open '{}': {e}", path.display())))?;
        let Some(stream) = ictx.streams().best(MediaType::Audio) else {
            return Ok(AudioClip::default());
        };
        let audio_idx = stream.index();

        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| ReelError::media(format!("codec context: {e}")))?;
        let mut decoder = dec_ctx
            .decoder()
            .audio()
            .map_err(|e| ReelError::media(format!("audio decoder: {e}")))?;

        let mut resampler: Option<resampling::Context> = None;
        let mut pcm = Vec::<f32>::new();
        let mut sample_rate = 0u32;
        let mut channels = 0u16;

        for result in ictx.packets() {
            let Ok((stream, packet)) = result else {
                continue;
            };
            if stream.index() != audio_idx {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut frame = AudioFrame::empty();
            while decoder.receive_frame(&mut frame).is_ok() {
                append_packed(
                    &frame,
                    &mut resampler,
                    &mut pcm,
                    &mut sample_rate,
                    &mut channels,
                )?;
            }
        }

        let _ = decoder.send_eof();
        let mut frame = AudioFrame::empty();
        while decoder.receive_frame(&mut frame).is_ok() {
            append_packed(
                &frame,
                &mut resampler,
                &mut pcm,
                &mut sample_rate,
                &mut channels,
            )?;
        }

        Ok(AudioClip {
            sample_rate,
            channels,
            interleaved: pcm,
        })
    }

    /// Convert `frame` to packed f32 at its native rate/layout and append.
    /// The format converter is built lazily on the first frame that needs it.
    fn append_packed(
        frame: &AudioFrame,
        resampler: &mut Option<resampling::Context>,
        out: &mut Vec<f32>,
        sample_rate: &mut u32,
        channels: &mut u16,
    ) -> ReelResult<()> {
        if *sample_rate == 0 {
            *sample_rate = frame.rate();
            *channels = frame.ch_layout().channels() as u16;
        }

        if frame.format() == PACKED_F32 {
            append_f32_bytes(frame, out);
            return Ok(());
        }

        let rs = match resampler {
            Some(rs) => rs,
            None => {
                let ctx = resampling::Context::get2(
                    frame.format(),
                    frame.ch_layout(),
                    frame.rate(),
                    PACKED_F32,
                    frame.ch_layout(),
                    frame.rate(),
                )
                .map_err(|e| ReelError::media(format!("swresample context: {e}")))?;
                resampler.insert(ctx)
            }
        };

        let mut converted = AudioFrame::empty();
        if rs.run(frame, &mut converted).is_ok() && converted.samples() > 0 {
            append_f32_bytes(&converted, out);
        }
        Ok(())
    }

    /// Packed f32 puts all channel data in plane 0.
    fn append_f32_bytes(frame: &AudioFrame, out: &mut Vec<f32>) {
        let ch = frame.ch_layout().channels() as usize;
        let valid = frame.samples() * ch * 4;
        let data = &frame.data(0)[..valid];
        out.extend(
            data.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
    }
}

#[cfg(not(feature = "media-ffmpeg"))]
/// Decode every audio sample of `path` into an [`AudioClip`].
///
/// Always fails without the `media-ffmpeg` feature.
pub fn decode_audio_clip(_path: &std::path::Path) -> ReelResult<AudioClip> {
    Err(crate::foundation::error::ReelError::media(
        "audio assets require the 'media-ffmpeg' feature",
    ))
}
