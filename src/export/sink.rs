//! Sink contracts: frames in, finished MP4 bytes out.

use crate::foundation::error::ReelResult;
use crate::render::Surface;
use std::path::PathBuf;

/// Raw PCM audio input handed to the muxer alongside the video frames.
#[derive(Clone, Debug)]
pub struct AudioStream {
    /// Path to interleaved little-endian f32 PCM.
    pub path: PathBuf,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Target AAC bitrate in bits per second.
    pub bitrate: u64,
}

/// Configuration provided to a [`FrameSink`] before any frames are pushed.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Output width in pixels (effective surface width).
    pub width: u32,
    /// Output height in pixels (effective surface height).
    pub height: u32,
    /// Output frame rate.
    pub fps: u32,
    /// Target H.264 bitrate in bits per second.
    pub video_bitrate: u64,
    /// Straight-alpha background used to flatten frames to opaque RGB.
    pub background: [u8; 4],
    /// Forced keyframe cadence in frames (`3 * fps`).
    pub keyframe_interval: u64,
    /// Prefer a hardware H.264 encoder when one is available.
    pub prefer_hardware: bool,
    /// Hold output for fast-start repacking (moov atom up front).
    pub fast_start: bool,
    /// Mixed PCM bed; `None` omits the audio track entirely.
    pub audio: Option<AudioStream>,
}

/// Consumes rendered frames in strictly increasing index order and produces
/// the finished MP4 bytes.
pub trait FrameSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()>;
    /// Push one frame; indices are strictly increasing.
    fn push_frame(&mut self, idx: u64, frame: &Surface) -> ReelResult<()>;
    /// Number of frames accepted so far.
    fn frames_pushed(&self) -> u64;
    /// Flush, finalize the container, and return the MP4 bytes.
    fn finish(&mut self) -> ReelResult<Vec<u8>>;
    /// Tear down without producing output (cancellation path).
    fn abort(&mut self);
}

/// In-memory sink for tests and debugging; produces no container bytes.
#[derive(Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    /// Frames in push order.
    pub frames: Vec<(u64, Surface)>,
    aborted: bool,
}

impl InMemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<&SinkConfig> {
        self.cfg.as_ref()
    }

    /// Return `true` once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> ReelResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.aborted = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: u64, frame: &Surface) -> ReelResult<()> {
        if let Some((last, _)) = self.frames.last()
            && idx <= *last
        {
            return Err(crate::foundation::error::ReelError::encoder(
                "sink received out-of-order frame index",
            ));
        }
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn frames_pushed(&self) -> u64 {
        self.frames.len() as u64
    }

    fn finish(&mut self) -> ReelResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn abort(&mut self) {
        self.aborted = true;
        self.frames.clear();
    }
}

/// Fast-start declaration of a byte-sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastStart {
    /// Hold output in memory so the moov atom can be placed up front.
    InMemory,
    /// Stream as-is.
    Off,
}

/// Receives the finalized MP4 bytes and commits them somewhere.
pub trait ByteSink {
    /// Fast-start mode the muxer should honor.
    fn fast_start(&self) -> FastStart;
    /// Commit the finished bytes; returns a human-readable location.
    fn save_buffer(&mut self, bytes: &[u8]) -> ReelResult<String>;
}

/// Byte-sink writing to a file on disk.
pub struct FileByteSink {
    /// Destination path.
    pub path: PathBuf,
    /// Fast-start declaration.
    pub fast_start: FastStart,
}

impl FileByteSink {
    /// Fast-start file sink at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fast_start: FastStart::InMemory,
        }
    }
}

impl ByteSink for FileByteSink {
    fn fast_start(&self) -> FastStart {
        self.fast_start
    }

    fn save_buffer(&mut self, bytes: &[u8]) -> ReelResult<String> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::foundation::error::ReelError::encoder(format!(
                    "create output directory '{}': {e}",
                    parent.display()
                ))
            })?;
        }
        std::fs::write(&self.path, bytes).map_err(|e| {
            crate::foundation::error::ReelError::encoder(format!(
                "write output '{}': {e}",
                self.path.display()
            ))
        })?;
        Ok(self.path.display().to_string())
    }
}

/// Byte-sink keeping the output in memory.
#[derive(Default)]
pub struct MemoryByteSink {
    /// The committed bytes, empty until `save_buffer` runs.
    pub bytes: Vec<u8>,
}

impl MemoryByteSink {
    /// Create an empty in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteSink for MemoryByteSink {
    fn fast_start(&self) -> FastStart {
        FastStart::InMemory
    }

    fn save_buffer(&mut self, bytes: &[u8]) -> ReelResult<String> {
        self.bytes = bytes.to_vec();
        Ok(format!("<memory: {} bytes>", self.bytes.len()))
    }
}
