//! Timeline data model, validation, and the editor-document adapter.

mod adapt;
mod model;
/// Structural validation of timeline/settings pairs.
pub mod validate;

pub use adapt::{AdaptOutcome, EditorElement, EditorTrack, ProjectCanvas, adapt};
pub use model::{
    BlendMode, Element, ElementCommon, ExportSettings, FontStyle, MediaElement, MediaKind,
    MediaSource, OverlayElement, OverlaySource, PatternKind, Rgba8, SubtitleElement,
    SubtitlePosition, TextAlign, TextDecoration, TextElement, TimelineModel, Track, TrackKind,
};
pub use validate::{ValidationError, validate_strict};
