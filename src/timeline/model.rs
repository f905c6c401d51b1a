use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Straight-alpha sRGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rgba8 {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel.
    pub a: u8,
}

impl Rgba8 {
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// Opaque color from channel values.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#RRGGBB` / `#RRGGBBAA` (leading `#` optional) or `transparent`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("transparent") {
            return Ok(Self::TRANSPARENT);
        }
        let hex = s.strip_prefix('#').unwrap_or(s);

        fn hex_byte(pair: &str) -> Result<u8, String> {
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte \"{pair}\""))
        }

        match hex.len() {
            6 => Ok(Self {
                r: hex_byte(&hex[0..2])?,
                g: hex_byte(&hex[2..4])?,
                b: hex_byte(&hex[4..6])?,
                a: 255,
            }),
            8 => Ok(Self {
                r: hex_byte(&hex[0..2])?,
                g: hex_byte(&hex[2..4])?,
                b: hex_byte(&hex[4..6])?,
                a: hex_byte(&hex[6..8])?,
            }),
            _ => Err(format!(
                "color must be #RRGGBB, #RRGGBBAA or \"transparent\", got \"{s}\""
            )),
        }
    }

    /// Channels as a `[r, g, b, a]` array.
    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl<'de> Deserialize<'de> for Rgba8 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Obj { r: u8, g: u8, b: u8, a: Option<u8> },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            Repr::Obj { r, g, b, a } => Ok(Self {
                r,
                g,
                b,
                a: a.unwrap_or(255),
            }),
        }
    }
}

/// Fully resolved export parameters; presets are resolved by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Resolution multiplier applied to the canvas, `0.25..=4.0`.
    #[serde(default = "default_resolution")]
    pub resolution_multiplier: f64,
    /// Output frame rate, `1..=120`.
    pub fps: u32,
    /// Target video bitrate in bits per second.
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u64,
    /// Audio sample rate in Hz; one of 8000, 16000, 22050, 44100, 48000.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Audio channel count, `1..=8`.
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Target audio bitrate in bits per second.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u64,
    /// Background color the surface is cleared with every frame.
    #[serde(default = "default_background")]
    pub background: Rgba8,
    /// Prefer a hardware H.264 encoder when one is available.
    #[serde(default = "default_true")]
    pub hardware_acceleration: bool,
    /// Output file name reported alongside the finished bytes.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

fn default_resolution() -> f64 {
    1.0
}
fn default_video_bitrate() -> u64 {
    8_000_000
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_channels() -> u16 {
    2
}
fn default_audio_bitrate() -> u64 {
    192_000
}
fn default_background() -> Rgba8 {
    Rgba8::BLACK
}
fn default_true() -> bool {
    true
}
fn default_file_name() -> String {
    "export.mp4".to_owned()
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            resolution_multiplier: default_resolution(),
            fps: 30,
            video_bitrate: default_video_bitrate(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            audio_bitrate: default_audio_bitrate(),
            background: default_background(),
            hardware_acceleration: default_true(),
            file_name: default_file_name(),
        }
    }
}

impl ExportSettings {
    /// Effective surface width, `round(width * resolution_multiplier)`.
    pub fn surface_width(&self) -> u32 {
        (f64::from(self.width) * self.resolution_multiplier).round() as u32
    }

    /// Effective surface height, `round(height * resolution_multiplier)`.
    pub fn surface_height(&self) -> u32 {
        (f64::from(self.height) * self.resolution_multiplier).round() as u32
    }

    /// Presentation timestamp of frame `k` in microseconds (floor).
    pub fn pts_us(&self, k: u64) -> u64 {
        k * 1_000_000 / u64::from(self.fps)
    }

    /// Duration of one frame in microseconds (floor).
    pub fn frame_duration_us(&self) -> u64 {
        1_000_000 / u64::from(self.fps)
    }

    /// Keyframe cadence in frames: an IDR frame every 3 seconds.
    pub fn keyframe_interval(&self) -> u64 {
        3 * u64::from(self.fps)
    }
}

/// Track role; decides render participation and z-order promotion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Video/image/audio clips.
    Media,
    /// Text elements, promoted above all non-text tracks.
    Text,
    /// Audio-only clips; never rendered.
    Audio,
    /// Carrier for ordered effect ids; no visual elements of its own.
    Effect,
    /// Shapes, images and procedural patterns.
    Overlay,
    /// Subtitles, rendered on text-track priority.
    Subtitle,
}

impl TrackKind {
    /// Return `true` when elements of this track render above non-text tracks.
    pub fn is_text_layer(self) -> bool {
        matches!(self, Self::Text | Self::Subtitle)
    }
}

/// Per-element blend mode applied when compositing onto the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Plain alpha compositing.
    #[default]
    SourceOver,
    /// Multiply source and destination channels.
    Multiply,
    /// Inverse multiply; lightens.
    Screen,
    /// Multiply or screen depending on destination.
    Overlay,
    /// Channel-wise minimum.
    Darken,
    /// Channel-wise maximum.
    Lighten,
    /// Absolute channel difference.
    Difference,
    /// Softer difference.
    Exclusion,
}

impl BlendMode {
    /// Parse an editor blend-mode string; unknown names fall back to source-over.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "multiply" => Self::Multiply,
            "screen" => Self::Screen,
            "overlay" => Self::Overlay,
            "darken" => Self::Darken,
            "lighten" => Self::Lighten,
            "difference" => Self::Difference,
            "exclusion" => Self::Exclusion,
            _ => Self::SourceOver,
        }
    }
}

/// Timing, opacity and blend fields shared by every element kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementCommon {
    /// Stable element id.
    pub id: String,
    /// Timeline start in seconds.
    pub start_time: f64,
    /// Untrimmed source duration in seconds.
    pub duration: f64,
    /// Seconds trimmed from the head of the source.
    #[serde(default)]
    pub trim_start: f64,
    /// Seconds trimmed from the tail of the source.
    #[serde(default)]
    pub trim_end: f64,
    /// Element opacity in `[0, 1]`.
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Blend mode used when compositing this element.
    #[serde(default)]
    pub blend: BlendMode,
}

fn default_opacity() -> f64 {
    1.0
}

impl ElementCommon {
    /// Visible span in seconds: `duration - trim_start - trim_end`.
    pub fn active_len(&self) -> f64 {
        self.duration - self.trim_start - self.trim_end
    }

    /// Exclusive end of the active interval on the timeline.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.active_len()
    }

    /// Half-open activity test: `start_time <= t < end_time`.
    pub fn is_active_at(&self, t: f64) -> bool {
        t >= self.start_time && t < self.end_time()
    }

    /// Element-local time at global `t`: `t - start_time + trim_start`.
    pub fn local_time(&self, t: f64) -> f64 {
        t - self.start_time + self.trim_start
    }
}

/// Media payload category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Decoded per frame; contributes video and (when present) audio.
    Video,
    /// Decoded once; contributes video only.
    Image,
    /// Contributes to the mixer only.
    Audio,
}

/// A clip referencing an entry in the media library.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaElement {
    /// Shared timing/compositing fields.
    #[serde(flatten)]
    pub common: ElementCommon,
    /// Key into [`TimelineModel::media`].
    pub media_id: String,
    /// Payload category.
    pub kind: MediaKind,
    /// Mixer gain in `[0, ..)`, default 1.
    #[serde(default = "default_opacity")]
    pub volume: f64,
    /// Intrinsic pixel size when known up-front.
    #[serde(default)]
    pub intrinsic_size: Option<(u32, u32)>,
}

/// Horizontal text justification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    /// Box grows rightward from the anchor.
    Left,
    /// Box is centered on the anchor.
    #[default]
    Center,
    /// Box grows leftward from the anchor.
    Right,
}

/// Normal or italic face selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    /// Upright face.
    #[default]
    Normal,
    /// Italic face.
    Italic,
}

/// Stroked line decoration over the text box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextDecoration {
    /// No decoration line.
    #[default]
    None,
    /// Line under the text, near the baseline.
    Underline,
    /// Line through the vertical middle of the text.
    LineThrough,
}

/// Styled text positioned relative to the canvas center.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextElement {
    /// Shared timing/compositing fields.
    #[serde(flatten)]
    pub common: ElementCommon,
    /// Text content; `\n` separates lines.
    pub content: String,
    /// Font family name; generic families (serif, monospace, ...) resolve too.
    pub font_family: String,
    /// Font size in canvas pixels.
    pub font_size: f64,
    /// Weight on the 100–900 scale.
    #[serde(default = "default_weight")]
    pub font_weight: u16,
    /// Face style.
    #[serde(default)]
    pub font_style: FontStyle,
    /// Decoration line.
    #[serde(default)]
    pub decoration: TextDecoration,
    /// Fill color.
    pub color: Rgba8,
    /// Background box color; `None` means transparent.
    #[serde(default)]
    pub background: Option<Rgba8>,
    /// Horizontal justification relative to the anchor.
    #[serde(default)]
    pub align: TextAlign,
    /// Horizontal offset from canvas center, canvas pixels.
    #[serde(default)]
    pub x: f64,
    /// Vertical offset from canvas center, canvas pixels.
    #[serde(default)]
    pub y: f64,
    /// Clockwise rotation in degrees around the anchor.
    #[serde(default)]
    pub rotation_deg: f64,
}

fn default_weight() -> u16 {
    400
}

/// Procedural overlay fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Regular dot grid.
    Dots,
    /// Diagonal stripes.
    Stripes,
    /// Alternating squares.
    Checkerboard,
    /// Single flat color.
    Solid,
}

/// What an overlay draws.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlaySource {
    /// Filled rectangle in one color.
    Shape {
        /// Fill color.
        color: Rgba8,
    },
    /// Raster image from the media library.
    Image {
        /// Key into [`TimelineModel::media`].
        media_id: String,
    },
    /// Deterministic procedural pattern.
    Pattern {
        /// Which pattern to generate.
        kind: PatternKind,
        /// Foreground color.
        color: Rgba8,
    },
}

/// A rectangle-bounded overlay centered on `(x, y)` in canvas top-left coords.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverlayElement {
    /// Shared timing/compositing fields.
    #[serde(flatten)]
    pub common: ElementCommon,
    /// Fill source.
    pub source: OverlaySource,
    /// Center x in canvas pixels from the top-left origin.
    pub x: f64,
    /// Center y in canvas pixels from the top-left origin.
    pub y: f64,
    /// Width in canvas pixels.
    pub width: f64,
    /// Height in canvas pixels.
    pub height: f64,
    /// Clockwise rotation in degrees around the center.
    #[serde(default)]
    pub rotation_deg: f64,
}

/// Vertical subtitle placement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    /// `y = 2 * font_size`.
    Top,
    /// Vertical canvas center.
    Center,
    /// `y = canvas_height - 2 * font_size`.
    Bottom,
    /// Explicit canvas coordinates.
    Custom {
        /// Anchor x in canvas pixels.
        x: f64,
        /// Anchor y in canvas pixels.
        y: f64,
    },
}

impl Default for SubtitlePosition {
    fn default() -> Self {
        Self::Bottom
    }
}

/// Caption text with preset or custom placement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtitleElement {
    /// Shared timing/compositing fields.
    #[serde(flatten)]
    pub common: ElementCommon,
    /// Caption content.
    pub content: String,
    /// Font family name.
    pub font_family: String,
    /// Font size in canvas pixels.
    pub font_size: f64,
    /// Fill color.
    pub color: Rgba8,
    /// Background box color; `None` means transparent.
    #[serde(default)]
    pub background: Option<Rgba8>,
    /// Vertical placement.
    #[serde(default)]
    pub position: SubtitlePosition,
    /// Horizontal justification.
    #[serde(default)]
    pub align: TextAlign,
}

/// Tagged element variant dispatched by the frame renderer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    /// Media clip.
    Media(MediaElement),
    /// Styled text.
    Text(TextElement),
    /// Shape/image/pattern overlay.
    Overlay(OverlayElement),
    /// Caption.
    Subtitle(SubtitleElement),
}

impl Element {
    /// Shared timing/compositing fields of any variant.
    pub fn common(&self) -> &ElementCommon {
        match self {
            Self::Media(e) => &e.common,
            Self::Text(e) => &e.common,
            Self::Overlay(e) => &e.common,
            Self::Subtitle(e) => &e.common,
        }
    }
}

/// One z-layer of the timeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    /// Stable track id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Track role.
    pub kind: TrackKind,
    /// Muted tracks contribute neither video nor audio.
    #[serde(default)]
    pub muted: bool,
    /// Track-level opacity multiplied into every element, when set.
    #[serde(default)]
    pub opacity: Option<f64>,
    /// Track-level blend mode overriding element defaults, when set.
    #[serde(default)]
    pub blend: Option<BlendMode>,
    /// Elements in authoring order; order breaks z-ties within the track.
    #[serde(default)]
    pub elements: Vec<Element>,
    /// Ordered effect-processor ids contributed to the pipeline.
    #[serde(default)]
    pub effect_ids: Vec<String>,
}

/// Concrete byte source a media id resolves to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// Local file; used directly by the decoders.
    Path(PathBuf),
    /// Fetched bytes (e.g. a cross-origin source captured into memory).
    Bytes(Arc<Vec<u8>>),
}

/// Immutable multi-track timeline; pinned for the duration of an export run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineModel {
    /// Tracks in z-order; later tracks render above earlier ones.
    pub tracks: Vec<Track>,
    /// Total duration in seconds; the max element end time.
    pub duration: f64,
    /// Project nominal canvas width in pixels.
    pub nominal_width: u32,
    /// Project nominal canvas height in pixels.
    pub nominal_height: u32,
    /// Project nominal frame rate.
    pub nominal_fps: u32,
    /// Media library: media id to byte source.
    #[serde(default)]
    pub media: BTreeMap<String, MediaSource>,
}

impl TimelineModel {
    /// Recompute total duration as the max element end time across tracks.
    pub fn computed_duration(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.elements.iter())
            .map(|e| e.common().end_time())
            .fold(0.0_f64, f64::max)
    }

    /// Number of rendered frames for `fps`: indices `0..=N` with
    /// `N = ceil(duration * fps)`.
    pub fn frame_count(&self, fps: u32) -> u64 {
        (self.duration * f64::from(fps)).ceil() as u64 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(start: f64, duration: f64, trim_start: f64, trim_end: f64) -> ElementCommon {
        ElementCommon {
            id: "e".to_owned(),
            start_time: start,
            duration,
            trim_start,
            trim_end,
            opacity: 1.0,
            blend: BlendMode::SourceOver,
        }
    }

    #[test]
    fn active_interval_is_half_open() {
        let e = elem(1.0, 3.0, 0.5, 0.5);
        // Active span is [1.0, 3.0).
        assert!(e.is_active_at(1.0));
        assert!(e.is_active_at(2.999));
        assert!(!e.is_active_at(3.0));
        assert!(!e.is_active_at(0.999));
    }

    #[test]
    fn local_time_accounts_for_trim() {
        let e = elem(1.0, 3.0, 2.0, 0.0);
        assert_eq!(e.local_time(1.0), 2.0);
        assert!((e.local_time(1.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn zero_trim_keeps_full_duration() {
        let e = elem(0.0, 4.0, 0.0, 0.0);
        assert_eq!(e.active_len(), 4.0);
        assert_eq!(e.end_time(), 4.0);
    }

    #[test]
    fn color_parsing() {
        assert_eq!(Rgba8::parse("#000000").unwrap(), Rgba8::BLACK);
        assert_eq!(Rgba8::parse("FFFFFF").unwrap(), Rgba8::WHITE);
        assert_eq!(
            Rgba8::parse("#11223344").unwrap(),
            Rgba8 {
                r: 0x11,
                g: 0x22,
                b: 0x33,
                a: 0x44
            }
        );
        assert_eq!(Rgba8::parse("transparent").unwrap().a, 0);
        assert!(Rgba8::parse("#12").is_err());
    }

    #[test]
    fn pts_math_uses_floor_microseconds() {
        let s = ExportSettings {
            fps: 30,
            ..Default::default()
        };
        assert_eq!(s.pts_us(0), 0);
        assert_eq!(s.pts_us(1), 33_333);
        assert_eq!(s.pts_us(30), 1_000_000);
        assert_eq!(s.frame_duration_us(), 33_333);
        assert_eq!(s.keyframe_interval(), 90);
    }

    #[test]
    fn surface_size_rounds_the_multiplier() {
        let s = ExportSettings {
            width: 1280,
            height: 720,
            resolution_multiplier: 1.5,
            ..Default::default()
        };
        assert_eq!(s.surface_width(), 1920);
        assert_eq!(s.surface_height(), 1080);
    }

    #[test]
    fn duration_is_max_end_time() {
        let model = TimelineModel {
            tracks: vec![Track {
                id: "t0".to_owned(),
                name: String::new(),
                kind: TrackKind::Media,
                muted: false,
                opacity: None,
                blend: None,
                elements: vec![
                    Element::Media(MediaElement {
                        common: elem(0.0, 2.0, 0.0, 0.0),
                        media_id: "a".to_owned(),
                        kind: MediaKind::Image,
                        volume: 1.0,
                        intrinsic_size: None,
                    }),
                    Element::Media(MediaElement {
                        common: elem(1.0, 4.0, 0.0, 1.0),
                        media_id: "b".to_owned(),
                        kind: MediaKind::Image,
                        volume: 1.0,
                        intrinsic_size: None,
                    }),
                ],
                effect_ids: Vec::new(),
            }],
            duration: 0.0,
            nominal_width: 640,
            nominal_height: 360,
            nominal_fps: 30,
            media: BTreeMap::new(),
        };
        assert_eq!(model.computed_duration(), 4.0);
    }

    #[test]
    fn frame_count_includes_the_final_index() {
        let model = TimelineModel {
            tracks: Vec::new(),
            duration: 2.0,
            nominal_width: 1920,
            nominal_height: 1080,
            nominal_fps: 30,
            media: BTreeMap::new(),
        };
        // N = ceil(2.0 * 30) = 60, frames 0..=60.
        assert_eq!(model.frame_count(30), 61);
    }
}
