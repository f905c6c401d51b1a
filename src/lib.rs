//! Reelforge is a deterministic timeline-to-video compositor.
//!
//! A [`timeline::TimelineModel`] describes a multi-track edit: media clips,
//! text, overlays, subtitles, per-track effects and blend modes. An
//! [`export::ExportSession`] renders every output frame exactly once at its
//! scheduled presentation time, mixes every audio source into one PCM bed,
//! and muxes a single H.264+AAC MP4 through a [`export::ByteSink`].
//!
//! The public API is session-oriented:
//!
//! - Build (or [`timeline::adapt`]) and validate a timeline
//! - Create an [`export::ExportSession`] from the model and
//!   [`timeline::ExportSettings`]
//! - Run it into a [`export::FrameSink`], observing progress through the
//!   [`export::ProgressBus`]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub mod audio;
pub mod effects;
pub mod export;
pub mod media;
pub mod render;
pub mod timeline;

pub use crate::foundation::error::{ReelError, ReelResult};
pub use crate::export::{
    ByteSink, CancelToken, ExportReport, ExportSession, ExportStage, FastStart, FfmpegSink,
    FfmpegSinkOpts, FileByteSink, FrameSink, InMemorySink, MemoryByteSink, ProgressBus,
    ProgressEvent, SinkConfig,
};
pub use crate::render::Surface;
pub use crate::timeline::{ExportSettings, Rgba8, TimelineModel};
