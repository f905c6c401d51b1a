//! Encoder driver, sinks, progress bus, and cancellation.

mod driver;
mod encoder;
mod progress;
mod sink;

pub use driver::{ExportReport, ExportSession};
pub use encoder::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use progress::{CancelToken, ExportStage, ProgressBus, ProgressEvent};
pub use sink::{
    AudioStream, ByteSink, FastStart, FileByteSink, FrameSink, InMemorySink, MemoryByteSink,
    SinkConfig,
};
