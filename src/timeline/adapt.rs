//! Translation from the editor's native track shapes into the core model.
//!
//! The editor document is opaque to the renderer; this module is the single
//! place that knows both vocabularies. Elements whose media id does not
//! resolve in the library are filtered out (and reported), so rendering never
//! observes a dangling media reference.

use crate::timeline::model::{
    BlendMode, Element, ElementCommon, FontStyle, MediaElement, MediaKind, MediaSource,
    OverlayElement, OverlaySource, PatternKind, Rgba8, SubtitleElement, SubtitlePosition,
    TextAlign, TextDecoration, TextElement, TimelineModel, Track, TrackKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Project-level canvas description from the editor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProjectCanvas {
    /// Nominal canvas width in pixels.
    pub width: u32,
    /// Nominal canvas height in pixels.
    pub height: u32,
    /// Nominal project frame rate.
    pub fps: u32,
}

/// One editor track as stored by the editor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EditorTrack {
    /// Stable track id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Track kind string; unknown kinds adapt to media tracks.
    pub kind: String,
    /// Muted flag.
    #[serde(default)]
    pub muted: bool,
    /// Optional track opacity.
    #[serde(default)]
    pub opacity: Option<f64>,
    /// Optional blend-mode name.
    #[serde(default)]
    pub blend_mode: Option<String>,
    /// Elements in authoring order.
    #[serde(default)]
    pub elements: Vec<EditorElement>,
    /// Ordered effect ids attached to the track.
    #[serde(default)]
    pub effects: Vec<String>,
}

/// One editor element; the `type` tag selects the variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorElement {
    /// Media clip reference.
    Media {
        /// Stable element id.
        id: String,
        /// Media library key.
        media_id: String,
        /// `video` / `image` / `audio`.
        media_kind: String,
        /// Timeline start in seconds.
        start_time: f64,
        /// Untrimmed duration in seconds.
        duration: f64,
        /// Head trim in seconds.
        #[serde(default)]
        trim_start: f64,
        /// Tail trim in seconds.
        #[serde(default)]
        trim_end: f64,
        /// Opacity in `[0, 1]`.
        #[serde(default = "one")]
        opacity: f64,
        /// Blend-mode name.
        #[serde(default)]
        blend_mode: Option<String>,
        /// Mixer gain.
        #[serde(default = "one")]
        volume: f64,
        /// Intrinsic pixel size when the editor probed it.
        #[serde(default)]
        intrinsic_size: Option<(u32, u32)>,
    },
    /// Styled text.
    Text {
        /// Stable element id.
        id: String,
        /// Text content.
        content: String,
        /// Font family name.
        font_family: String,
        /// Font size in canvas pixels.
        font_size: f64,
        /// Weight on the 100–900 scale.
        #[serde(default = "default_weight")]
        font_weight: u16,
        /// `normal` / `italic`.
        #[serde(default)]
        font_style: Option<String>,
        /// `none` / `underline` / `line-through`.
        #[serde(default)]
        decoration: Option<String>,
        /// Fill color string.
        color: String,
        /// Background color string or `transparent`.
        #[serde(default)]
        background: Option<String>,
        /// `left` / `center` / `right`.
        #[serde(default)]
        align: Option<String>,
        /// Offset from canvas center, x.
        #[serde(default)]
        x: f64,
        /// Offset from canvas center, y.
        #[serde(default)]
        y: f64,
        /// Rotation in degrees.
        #[serde(default)]
        rotation: f64,
        /// Timeline start in seconds.
        start_time: f64,
        /// Duration in seconds.
        duration: f64,
        /// Head trim in seconds.
        #[serde(default)]
        trim_start: f64,
        /// Tail trim in seconds.
        #[serde(default)]
        trim_end: f64,
        /// Opacity in `[0, 1]`.
        #[serde(default = "one")]
        opacity: f64,
    },
    /// Shape / image / pattern overlay.
    Overlay {
        /// Stable element id.
        id: String,
        /// `shape` / `image` / `pattern`.
        overlay_kind: String,
        /// Color string, media id, or pattern name depending on the kind.
        source: String,
        /// Center x in canvas pixels.
        x: f64,
        /// Center y in canvas pixels.
        y: f64,
        /// Width in canvas pixels.
        width: f64,
        /// Height in canvas pixels.
        height: f64,
        /// Rotation in degrees.
        #[serde(default)]
        rotation: f64,
        /// Timeline start in seconds.
        start_time: f64,
        /// Duration in seconds.
        duration: f64,
        /// Head trim in seconds.
        #[serde(default)]
        trim_start: f64,
        /// Tail trim in seconds.
        #[serde(default)]
        trim_end: f64,
        /// Opacity in `[0, 1]`.
        #[serde(default = "one")]
        opacity: f64,
        /// Blend-mode name.
        #[serde(default)]
        blend_mode: Option<String>,
    },
    /// Caption.
    Subtitle {
        /// Stable element id.
        id: String,
        /// Caption content.
        content: String,
        /// Font family name.
        font_family: String,
        /// Font size in canvas pixels.
        font_size: f64,
        /// Fill color string.
        color: String,
        /// Background color string or `transparent`.
        #[serde(default)]
        background: Option<String>,
        /// `top` / `center` / `bottom` / `custom`.
        #[serde(default)]
        position: Option<String>,
        /// Custom x when `position` is `custom`.
        #[serde(default)]
        x: f64,
        /// Custom y when `position` is `custom`.
        #[serde(default)]
        y: f64,
        /// `left` / `center` / `right`.
        #[serde(default)]
        align: Option<String>,
        /// Timeline start in seconds.
        start_time: f64,
        /// Duration in seconds.
        duration: f64,
        /// Head trim in seconds.
        #[serde(default)]
        trim_start: f64,
        /// Tail trim in seconds.
        #[serde(default)]
        trim_end: f64,
        /// Opacity in `[0, 1]`.
        #[serde(default = "one")]
        opacity: f64,
    },
}

fn one() -> f64 {
    1.0
}

fn default_weight() -> u16 {
    400
}

/// Result of [`adapt`]: the core model plus the ids of filtered elements.
#[derive(Clone, Debug)]
pub struct AdaptOutcome {
    /// The translated, duration-computed timeline.
    pub model: TimelineModel,
    /// Element ids dropped because their media id did not resolve.
    pub dropped: Vec<String>,
}

/// Translate editor tracks into a [`TimelineModel`].
///
/// Elements whose media id does not resolve in `media` are dropped and
/// reported in the outcome. Total duration is computed as the max element end
/// time after filtering.
pub fn adapt(
    editor_tracks: &[EditorTrack],
    media: &BTreeMap<String, MediaSource>,
    canvas: &ProjectCanvas,
) -> AdaptOutcome {
    let mut dropped = Vec::new();
    let mut tracks = Vec::with_capacity(editor_tracks.len());

    for et in editor_tracks {
        let kind = parse_track_kind(&et.kind);
        let mut elements = Vec::with_capacity(et.elements.len());
        for ee in &et.elements {
            match adapt_element(ee, media) {
                Ok(el) => elements.push(el),
                Err(id) => dropped.push(id),
            }
        }
        tracks.push(Track {
            id: et.id.clone(),
            name: et.name.clone(),
            kind,
            muted: et.muted,
            opacity: et.opacity,
            blend: et.blend_mode.as_deref().map(BlendMode::parse_lossy),
            elements,
            effect_ids: et.effects.clone(),
        });
    }

    let mut model = TimelineModel {
        tracks,
        duration: 0.0,
        nominal_width: canvas.width,
        nominal_height: canvas.height,
        nominal_fps: canvas.fps,
        media: media.clone(),
    };
    model.duration = model.computed_duration();

    AdaptOutcome { model, dropped }
}

fn parse_track_kind(s: &str) -> TrackKind {
    match s.trim().to_ascii_lowercase().as_str() {
        "text" => TrackKind::Text,
        "audio" => TrackKind::Audio,
        "effect" => TrackKind::Effect,
        "overlay" => TrackKind::Overlay,
        "subtitle" => TrackKind::Subtitle,
        _ => TrackKind::Media,
    }
}

fn common(
    id: &str,
    start_time: f64,
    duration: f64,
    trim_start: f64,
    trim_end: f64,
    opacity: f64,
    blend: Option<&str>,
) -> ElementCommon {
    ElementCommon {
        id: id.to_owned(),
        start_time,
        duration,
        trim_start,
        trim_end,
        opacity,
        blend: blend.map(BlendMode::parse_lossy).unwrap_or_default(),
    }
}

fn color_or(s: &str, fallback: Rgba8) -> Rgba8 {
    Rgba8::parse(s).unwrap_or(fallback)
}

fn background_of(s: Option<&str>) -> Option<Rgba8> {
    let s = s?;
    match Rgba8::parse(s) {
        Ok(c) if c.a > 0 => Some(c),
        _ => None,
    }
}

fn parse_align(s: Option<&str>) -> TextAlign {
    match s.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("left") => TextAlign::Left,
        Some("right") => TextAlign::Right,
        _ => TextAlign::Center,
    }
}

fn adapt_element(
    ee: &EditorElement,
    media: &BTreeMap<String, MediaSource>,
) -> Result<Element, String> {
    match ee {
        EditorElement::Media {
            id,
            media_id,
            media_kind,
            start_time,
            duration,
            trim_start,
            trim_end,
            opacity,
            blend_mode,
            volume,
            intrinsic_size,
        } => {
            if !media.contains_key(media_id) {
                return Err(id.clone());
            }
            let kind = match media_kind.trim().to_ascii_lowercase().as_str() {
                "image" => MediaKind::Image,
                "audio" => MediaKind::Audio,
                _ => MediaKind::Video,
            };
            Ok(Element::Media(MediaElement {
                common: common(
                    id,
                    *start_time,
                    *duration,
                    *trim_start,
                    *trim_end,
                    *opacity,
                    blend_mode.as_deref(),
                ),
                media_id: media_id.clone(),
                kind,
                volume: *volume,
                intrinsic_size: *intrinsic_size,
            }))
        }
        EditorElement::Text {
            id,
            content,
            font_family,
            font_size,
            font_weight,
            font_style,
            decoration,
            color,
            background,
            align,
            x,
            y,
            rotation,
            start_time,
            duration,
            trim_start,
            trim_end,
            opacity,
        } => Ok(Element::Text(TextElement {
            common: common(
                id, *start_time, *duration, *trim_start, *trim_end, *opacity, None,
            ),
            content: content.clone(),
            font_family: font_family.clone(),
            font_size: *font_size,
            font_weight: *font_weight,
            font_style: match font_style.as_deref().map(str::trim) {
                Some(s) if s.eq_ignore_ascii_case("italic") => FontStyle::Italic,
                _ => FontStyle::Normal,
            },
            decoration: match decoration.as_deref().map(str::trim) {
                Some(s) if s.eq_ignore_ascii_case("underline") => TextDecoration::Underline,
                Some(s) if s.eq_ignore_ascii_case("line-through") => TextDecoration::LineThrough,
                _ => TextDecoration::None,
            },
            color: color_or(color, Rgba8::WHITE),
            background: background_of(background.as_deref()),
            align: parse_align(align.as_deref()),
            x: *x,
            y: *y,
            rotation_deg: *rotation,
        })),
        EditorElement::Overlay {
            id,
            overlay_kind,
            source,
            x,
            y,
            width,
            height,
            rotation,
            start_time,
            duration,
            trim_start,
            trim_end,
            opacity,
            blend_mode,
        } => {
            let src = match overlay_kind.trim().to_ascii_lowercase().as_str() {
                "image" => {
                    if !media.contains_key(source) {
                        return Err(id.clone());
                    }
                    OverlaySource::Image {
                        media_id: source.clone(),
                    }
                }
                "pattern" => OverlaySource::Pattern {
                    kind: match source.trim().to_ascii_lowercase().as_str() {
                        "dots" => PatternKind::Dots,
                        "stripes" => PatternKind::Stripes,
                        "checkerboard" => PatternKind::Checkerboard,
                        _ => PatternKind::Solid,
                    },
                    color: Rgba8::WHITE,
                },
                _ => OverlaySource::Shape {
                    color: color_or(source, Rgba8::WHITE),
                },
            };
            Ok(Element::Overlay(OverlayElement {
                common: common(
                    id,
                    *start_time,
                    *duration,
                    *trim_start,
                    *trim_end,
                    *opacity,
                    blend_mode.as_deref(),
                ),
                source: src,
                x: *x,
                y: *y,
                width: *width,
                height: *height,
                rotation_deg: *rotation,
            }))
        }
        EditorElement::Subtitle {
            id,
            content,
            font_family,
            font_size,
            color,
            background,
            position,
            x,
            y,
            align,
            start_time,
            duration,
            trim_start,
            trim_end,
            opacity,
        } => Ok(Element::Subtitle(SubtitleElement {
            common: common(
                id, *start_time, *duration, *trim_start, *trim_end, *opacity, None,
            ),
            content: content.clone(),
            font_family: font_family.clone(),
            font_size: *font_size,
            color: color_or(color, Rgba8::WHITE),
            background: background_of(background.as_deref()),
            position: match position.as_deref().map(str::trim) {
                Some(s) if s.eq_ignore_ascii_case("top") => SubtitlePosition::Top,
                Some(s) if s.eq_ignore_ascii_case("center") => SubtitlePosition::Center,
                Some(s) if s.eq_ignore_ascii_case("custom") => {
                    SubtitlePosition::Custom { x: *x, y: *y }
                }
                _ => SubtitlePosition::Bottom,
            },
            align: parse_align(align.as_deref()),
        })),
    }
}
