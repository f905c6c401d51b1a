//! Timeline audio mixing into one planar f32 PCM bed.
//!
//! Mixing is split in two layers: segment gathering decodes every non-muted
//! audio-bearing element through the media cache, and the pure mix
//! accumulates segments into the bed with a hard clamp to `[-1, 1]` after
//! each addition. The clamp is the clipping discipline; a limiter is out of
//! scope.

use crate::export::CancelToken;
use crate::foundation::error::{ReelError, ReelResult};
use crate::media::{AudioClip, MediaCache};
use crate::timeline::{Element, ExportSettings, MediaKind, TimelineModel};
use std::path::Path;
use std::sync::Arc;

/// Planar f32 PCM covering the full timeline span.
#[derive(Clone, Debug)]
pub struct MixedAudio {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// One `Vec<f32>` per channel, each `ceil(duration * sample_rate)` long.
    pub planar: Vec<Vec<f32>>,
}

impl MixedAudio {
    /// Samples per channel.
    pub fn len_samples(&self) -> usize {
        self.planar.first().map(Vec::len).unwrap_or(0)
    }

    /// Interleave the planar bed for packed-PCM consumers.
    pub fn interleave(&self) -> Vec<f32> {
        let frames = self.len_samples();
        let ch = self.planar.len();
        let mut out = Vec::with_capacity(frames * ch);
        for i in 0..frames {
            for c in 0..ch {
                out.push(self.planar[c][i]);
            }
        }
        out
    }

    /// Write interleaved little-endian f32 PCM, the encoder's raw input
    /// format.
    pub fn write_f32le(&self, path: &Path) -> ReelResult<()> {
        let interleaved = self.interleave();
        let mut bytes = Vec::<u8>::with_capacity(interleaved.len() * 4);
        for s in &interleaved {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        std::fs::write(path, bytes)
            .map_err(|e| ReelError::media(format!("write mixed audio '{}': {e}", path.display())))
    }
}

/// One decoded element placed on the timeline, ready to mix.
#[derive(Clone, Debug)]
pub struct AudioSegment {
    /// Timeline start in seconds.
    pub start_time: f64,
    /// Head trim in seconds.
    pub trim_start: f64,
    /// Tail trim in seconds.
    pub trim_end: f64,
    /// Gain multiplier.
    pub volume: f32,
    /// Decoded PCM at the source's native parameters.
    pub clip: Arc<AudioClip>,
}

/// Return `true` when any non-muted track carries an audio-bearing element.
pub fn has_audio_elements(model: &TimelineModel) -> bool {
    model
        .tracks
        .iter()
        .filter(|t| !t.muted)
        .flat_map(|t| t.elements.iter())
        .any(|e| {
            matches!(
                e,
                Element::Media(m) if matches!(m.kind, MediaKind::Audio | MediaKind::Video)
            )
        })
}

/// Decode every audio-bearing element into placed segments.
///
/// Cancellation is observed before each element's decode. Elements whose
/// decode fails are skipped with a warning and excluded from the mix.
pub fn gather_segments(
    model: &TimelineModel,
    cache: &mut MediaCache,
    cancel: &CancelToken,
) -> ReelResult<Vec<AudioSegment>> {
    let mut segments = Vec::new();
    for track in model.tracks.iter().filter(|t| !t.muted) {
        for element in &track.elements {
            let Element::Media(m) = element else {
                continue;
            };
            if !matches!(m.kind, MediaKind::Audio | MediaKind::Video) {
                continue;
            }
            cancel.check()?;

            let Some(source) = model.media.get(&m.media_id) else {
                continue;
            };
            let clip = match cache.audio(&m.media_id, source) {
                Ok(clip) => clip,
                Err(e) => {
                    tracing::warn!(element = %m.common.id, "audio element skipped: {e}");
                    continue;
                }
            };
            if clip.frames() == 0 {
                continue;
            }
            segments.push(AudioSegment {
                start_time: m.common.start_time,
                trim_start: m.common.trim_start,
                trim_end: m.common.trim_end,
                volume: m.volume.max(0.0) as f32,
                clip,
            });
        }
    }
    Ok(segments)
}

/// Mix placed segments into a bed of `ceil(duration * sample_rate)` samples
/// per channel.
pub fn mix_segments(
    segments: &[AudioSegment],
    settings: &ExportSettings,
    duration: f64,
) -> MixedAudio {
    let out_rate = settings.sample_rate;
    let out_len = (duration * f64::from(out_rate)).ceil() as usize;
    let mut planar = vec![vec![0.0f32; out_len]; usize::from(settings.channels)];

    for seg in segments {
        let resampled = resample_to_rate(&seg.clip, out_rate);
        mix_one(
            &mut planar,
            &resampled,
            out_rate,
            seg.start_time,
            seg.trim_start,
            seg.trim_end,
            seg.volume,
        );
    }

    MixedAudio {
        sample_rate: out_rate,
        channels: settings.channels,
        planar,
    }
}

/// Mix every audio-bearing element into one PCM bed.
///
/// Returns `None` when the timeline has no audio-bearing elements, so the
/// muxer can omit the audio track entirely.
pub fn mix_timeline(
    model: &TimelineModel,
    settings: &ExportSettings,
    cache: &mut MediaCache,
    cancel: &CancelToken,
) -> ReelResult<Option<MixedAudio>> {
    if !has_audio_elements(model) {
        return Ok(None);
    }
    let segments = gather_segments(model, cache, cancel)?;
    Ok(Some(mix_segments(&segments, settings, model.duration)))
}

/// Source PCM viewed per channel at the output rate.
struct ResampledClip {
    channels: usize,
    frames: usize,
    planar: Vec<Vec<f32>>,
}

/// Linear-interpolation resample of a clip to `out_rate`, planar output.
///
/// The resampled length is `ceil(source_duration * out_rate)`; a clip
/// already at the output rate is deinterleaved without interpolation.
fn resample_to_rate(clip: &AudioClip, out_rate: u32) -> ResampledClip {
    let src_frames = clip.frames();
    let channels = usize::from(clip.channels);

    if clip.sample_rate == out_rate {
        let mut planar = vec![Vec::with_capacity(src_frames); channels];
        for i in 0..src_frames {
            for (c, plane) in planar.iter_mut().enumerate() {
                plane.push(clip.sample(c, i));
            }
        }
        return ResampledClip {
            channels,
            frames: src_frames,
            planar,
        };
    }

    let new_len = (clip.duration_secs() * f64::from(out_rate)).ceil() as usize;
    let ratio = f64::from(clip.sample_rate) / f64::from(out_rate);
    let mut planar = vec![vec![0.0f32; new_len]; channels];

    for i in 0..new_len {
        let src_pos = i as f64 * ratio;
        let i0 = src_pos.floor() as usize;
        if i0 >= src_frames {
            break;
        }
        let i1 = (i0 + 1).min(src_frames - 1);
        let frac = (src_pos - i0 as f64) as f32;
        for (c, plane) in planar.iter_mut().enumerate() {
            let v0 = clip.sample(c, i0);
            let v1 = clip.sample(c, i1);
            plane[i] = v0 + (v1 - v0) * frac;
        }
    }

    ResampledClip {
        channels,
        frames: new_len,
        planar,
    }
}

/// Accumulate one resampled clip into the bed with trim/offset math in
/// output-sample space. Channels beyond the source count stay untouched.
fn mix_one(
    out: &mut [Vec<f32>],
    src: &ResampledClip,
    out_rate: u32,
    start_time: f64,
    trim_start: f64,
    trim_end: f64,
    volume: f32,
) {
    let out_len = out.first().map(Vec::len).unwrap_or(0);
    let offset = (start_time * f64::from(out_rate)).floor() as usize;
    let trim_start_s = (trim_start * f64::from(out_rate)).floor() as usize;
    let trim_end_s = (trim_end * f64::from(out_rate)).floor() as usize;
    let effective = src
        .frames
        .saturating_sub(trim_start_s)
        .saturating_sub(trim_end_s);

    let channels = src.channels.min(out.len());
    for (c, plane) in out.iter_mut().enumerate().take(channels) {
        let src_plane = &src.planar[c];
        for i in 0..effective {
            let dst = offset + i;
            if dst >= out_len {
                break;
            }
            plane[dst] = (plane[dst] + src_plane[trim_start_s + i] * volume).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_clip(rate: u32, channels: u16, secs: f64, freq: f64, amp: f32) -> AudioClip {
        let frames = (secs * f64::from(rate)).round() as usize;
        let mut interleaved = Vec::with_capacity(frames * usize::from(channels));
        for i in 0..frames {
            let t = i as f64 / f64::from(rate);
            let v = ((2.0 * std::f64::consts::PI * freq * t).sin() as f32) * amp;
            for _ in 0..channels {
                interleaved.push(v);
            }
        }
        AudioClip {
            sample_rate: rate,
            channels,
            interleaved,
        }
    }

    fn stereo_settings(rate: u32) -> ExportSettings {
        ExportSettings {
            sample_rate: rate,
            channels: 2,
            ..Default::default()
        }
    }

    #[test]
    fn resample_preserves_duration() {
        let clip = sine_clip(44_100, 2, 1.0, 1_000.0, 0.5);
        let out = resample_to_rate(&clip, 48_000);
        assert_eq!(out.frames, 48_000);
        assert_eq!(out.channels, 2);
    }

    #[test]
    fn same_rate_skips_interpolation() {
        let clip = sine_clip(48_000, 1, 0.5, 440.0, 0.3);
        let out = resample_to_rate(&clip, 48_000);
        assert_eq!(out.frames, 24_000);
        assert_eq!(out.planar[0][0], clip.sample(0, 0));
    }

    #[test]
    fn bed_length_is_ceil_duration_times_rate() {
        let mixed = mix_segments(&[], &stereo_settings(48_000), 1.5);
        assert_eq!(mixed.len_samples(), 72_000);
        assert_eq!(mixed.planar.len(), 2);
    }

    #[test]
    fn overlapping_sines_sum_and_stay_clamped() {
        // Two 1-second 1 kHz sines, the second offset by 0.5 s, stereo 48 kHz.
        let clip = Arc::new(sine_clip(48_000, 2, 1.0, 1_000.0, 0.8));
        let segments = vec![
            AudioSegment {
                start_time: 0.0,
                trim_start: 0.0,
                trim_end: 0.0,
                volume: 1.0,
                clip: clip.clone(),
            },
            AudioSegment {
                start_time: 0.5,
                trim_start: 0.0,
                trim_end: 0.0,
                volume: 1.0,
                clip: clip.clone(),
            },
        ];
        let mixed = mix_segments(&segments, &stereo_settings(48_000), 1.5);

        assert_eq!(mixed.len_samples(), 72_000);
        for plane in &mixed.planar {
            for &s in plane {
                assert!((-1.0..=1.0).contains(&s));
            }
        }
        // In the overlap the amplitudes add (up to the clamp): find a sample
        // where both sines peak together.
        let single = &sine_clip(48_000, 1, 1.0, 1_000.0, 0.8);
        let mut saw_sum = false;
        for i in 24_000..48_000 {
            let a = single.sample(0, i);
            let b = single.sample(0, i - 24_000);
            let expected = (a + b).clamp(-1.0, 1.0);
            if (mixed.planar[0][i] - expected).abs() < 1e-4 {
                saw_sum = true;
            } else {
                panic!(
                    "overlap sample {i}: got {}, expected {expected}",
                    mixed.planar[0][i]
                );
            }
        }
        assert!(saw_sum);
    }

    #[test]
    fn offset_and_trim_land_in_sample_space() {
        let clip = Arc::new(AudioClip {
            sample_rate: 10,
            channels: 1,
            interleaved: (0..40).map(|i| i as f32 / 100.0).collect(),
        });
        // Mix at the clip's own 10 Hz so sample indices stay readable.
        let settings = ExportSettings {
            sample_rate: 10,
            channels: 1,
            ..Default::default()
        };
        let segments = vec![AudioSegment {
            start_time: 2.0,
            trim_start: 1.0,
            trim_end: 0.0,
            volume: 1.0,
            clip,
        }];
        let mixed = mix_segments(&segments, &settings, 10.0);
        assert_eq!(mixed.planar[0][19], 0.0);
        assert_eq!(mixed.planar[0][20], 0.10);
        assert_eq!(mixed.planar[0][49], 0.39);
        assert_eq!(mixed.planar[0][50], 0.0);
    }

    #[test]
    fn extra_output_channels_stay_silent() {
        let clip = Arc::new(AudioClip {
            sample_rate: 8_000,
            channels: 2,
            interleaved: vec![0.5f32; 80 * 2],
        });
        let settings = ExportSettings {
            sample_rate: 8_000,
            channels: 4,
            ..Default::default()
        };
        let segments = vec![AudioSegment {
            start_time: 0.0,
            trim_start: 0.0,
            trim_end: 0.0,
            volume: 1.0,
            clip,
        }];
        let mixed = mix_segments(&segments, &settings, 0.01);
        assert_eq!(mixed.planar[0][0], 0.5);
        assert_eq!(mixed.planar[1][0], 0.5);
        assert_eq!(mixed.planar[2][0], 0.0);
        assert_eq!(mixed.planar[3][0], 0.0);
    }

    #[test]
    fn volume_scales_the_contribution() {
        let clip = Arc::new(AudioClip {
            sample_rate: 8_000,
            channels: 1,
            interleaved: vec![0.5f32; 80],
        });
        let settings = ExportSettings {
            sample_rate: 8_000,
            channels: 1,
            ..Default::default()
        };
        let segments = vec![AudioSegment {
            start_time: 0.0,
            trim_start: 0.0,
            trim_end: 0.0,
            volume: 0.5,
            clip,
        }];
        let mixed = mix_segments(&segments, &settings, 0.01);
        assert_eq!(mixed.planar[0][0], 0.25);
    }

    #[test]
    fn interleave_round_trips_planar_order() {
        let mixed = MixedAudio {
            sample_rate: 4,
            channels: 2,
            planar: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        };
        assert_eq!(mixed.len_samples(), 2);
        assert_eq!(mixed.interleave(), vec![0.1, 0.3, 0.2, 0.4]);
    }
}
