use crate::foundation::error::{ReelError, ReelResult};
use crate::timeline::model::{Element, ExportSettings, MediaKind, OverlaySource, TimelineModel};

/// Canvas bounds accepted by the encoder configuration, inclusive.
pub const CANVAS_MIN: u32 = 64;
/// Maximum canvas width (8K UHD).
pub const CANVAS_MAX_WIDTH: u32 = 7680;
/// Maximum canvas height (8K UHD).
pub const CANVAS_MAX_HEIGHT: u32 = 4320;

/// Sample rates the AAC encoder configuration accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8_000, 16_000, 22_050, 44_100, 48_000];

/// One offense found during validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Offending entity: a track/element id, `"timeline"` or `"settings"`.
    pub target: String,
    /// Human-readable description of the offense.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

/// Check a timeline/settings pair and return every offense found.
///
/// Never mutates. An empty result means the pair is safe to pin for an
/// export run.
pub fn validate(model: &TimelineModel, settings: &ExportSettings) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let offend = |errors: &mut Vec<ValidationError>, target: &str, message: String| {
        errors.push(ValidationError {
            target: target.to_owned(),
            message,
        });
    };

    if model.tracks.is_empty() && model.duration <= 0.0 {
        offend(
            &mut errors,
            "timeline",
            "timeline has no tracks and no duration".to_owned(),
        );
    }
    if model.duration <= 0.0 {
        offend(
            &mut errors,
            "timeline",
            format!("total duration must be > 0, got {}", model.duration),
        );
    }

    if settings.width < CANVAS_MIN
        || settings.width > CANVAS_MAX_WIDTH
        || settings.height < CANVAS_MIN
        || settings.height > CANVAS_MAX_HEIGHT
    {
        offend(
            &mut errors,
            "settings",
            format!(
                "canvas {}x{} outside supported range {CANVAS_MIN}..{CANVAS_MAX_WIDTH} x {CANVAS_MIN}..{CANVAS_MAX_HEIGHT}",
                settings.width, settings.height
            ),
        );
    }
    if !(0.25..=4.0).contains(&settings.resolution_multiplier) {
        offend(
            &mut errors,
            "settings",
            format!(
                "resolution multiplier {} outside 0.25..=4",
                settings.resolution_multiplier
            ),
        );
    }
    if !(1..=120).contains(&settings.fps) {
        offend(
            &mut errors,
            "settings",
            format!("fps {} outside 1..=120", settings.fps),
        );
    }
    if !SUPPORTED_SAMPLE_RATES.contains(&settings.sample_rate) {
        offend(
            &mut errors,
            "settings",
            format!("unsupported sample rate {}", settings.sample_rate),
        );
    }
    if !(1..=8).contains(&settings.channels) {
        offend(
            &mut errors,
            "settings",
            format!("channel count {} outside 1..=8", settings.channels),
        );
    }

    for track in &model.tracks {
        for element in &track.elements {
            let c = element.common();
            if c.start_time < 0.0 || c.duration < 0.0 || c.trim_start < 0.0 || c.trim_end < 0.0 {
                offend(
                    &mut errors,
                    &c.id,
                    "time fields must be non-negative seconds".to_owned(),
                );
            }
            if c.trim_start + c.trim_end >= c.duration {
                offend(
                    &mut errors,
                    &c.id,
                    format!(
                        "trim sum {} must be < duration {}",
                        c.trim_start + c.trim_end,
                        c.duration
                    ),
                );
            }

            let media_ref = match element {
                Element::Media(m) => Some((&m.media_id, Some(m.kind))),
                Element::Overlay(o) => match &o.source {
                    OverlaySource::Image { media_id } => Some((media_id, None)),
                    _ => None,
                },
                _ => None,
            };
            if let Some((media_id, kind)) = media_ref {
                if !model.media.contains_key(media_id) {
                    offend(
                        &mut errors,
                        &c.id,
                        format!("media id '{media_id}' does not resolve to a byte source"),
                    );
                }
                // Audio elements on non-audio tracks still mix; video on an
                // audio track is inconsistent.
                if kind == Some(MediaKind::Video)
                    && track.kind == crate::timeline::model::TrackKind::Audio
                {
                    offend(
                        &mut errors,
                        &c.id,
                        "video media placed on an audio track".to_owned(),
                    );
                }
            }
        }
    }

    errors
}

/// Validate and convert any offenses into a single fatal [`ReelError`].
pub fn validate_strict(model: &TimelineModel, settings: &ExportSettings) -> ReelResult<()> {
    let errors = validate(model, settings);
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .map(ValidationError::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(ReelError::validation(joined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::model::{
        BlendMode, ElementCommon, MediaElement, MediaSource, Track, TrackKind,
    };
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn base_model() -> TimelineModel {
        TimelineModel {
            tracks: Vec::new(),
            duration: 2.0,
            nominal_width: 1920,
            nominal_height: 1080,
            nominal_fps: 30,
            media: BTreeMap::new(),
        }
    }

    fn media_element(id: &str, media_id: &str, duration: f64, trim: f64) -> Element {
        Element::Media(MediaElement {
            common: ElementCommon {
                id: id.to_owned(),
                start_time: 0.0,
                duration,
                trim_start: trim,
                trim_end: 0.0,
                opacity: 1.0,
                blend: BlendMode::SourceOver,
            },
            media_id: media_id.to_owned(),
            kind: MediaKind::Video,
            volume: 1.0,
            intrinsic_size: None,
        })
    }

    #[test]
    fn empty_timeline_with_duration_passes() {
        // A background-only export (no tracks) is valid as long as the
        // duration is positive.
        assert!(validate(&base_model(), &ExportSettings::default()).is_empty());
    }

    #[test]
    fn collects_every_offense() {
        let mut model = base_model();
        model.duration = 0.0;
        model.tracks.push(Track {
            id: "t0".to_owned(),
            name: String::new(),
            kind: TrackKind::Media,
            muted: false,
            opacity: None,
            blend: None,
            elements: vec![media_element("e0", "missing", 1.0, 2.0)],
            effect_ids: Vec::new(),
        });
        let settings = ExportSettings {
            width: 10,
            sample_rate: 12_345,
            ..Default::default()
        };

        let errors = validate(&model, &settings);
        let text = errors
            .iter()
            .map(ValidationError::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        assert!(text.contains("duration"));
        assert!(text.contains("canvas"));
        assert!(text.contains("sample rate"));
        assert!(text.contains("trim sum"));
        assert!(text.contains("does not resolve"));
    }

    #[test]
    fn resolved_media_passes() {
        let mut model = base_model();
        model
            .media
            .insert("clip".to_owned(), MediaSource::Path(PathBuf::from("a.mp4")));
        model.tracks.push(Track {
            id: "t0".to_owned(),
            name: String::new(),
            kind: TrackKind::Media,
            muted: false,
            opacity: None,
            blend: None,
            elements: vec![media_element("e0", "clip", 2.0, 0.0)],
            effect_ids: Vec::new(),
        });
        assert!(validate(&model, &ExportSettings::default()).is_empty());
    }

    #[test]
    fn validate_strict_formats_offenses() {
        let mut model = base_model();
        model.duration = -1.0;
        let err = validate_strict(&model, &ExportSettings::default()).unwrap_err();
        assert!(err.to_string().contains("validation error"));
    }
}
