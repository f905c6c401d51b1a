//! Media cache: decoded assets and open decoders keyed by media id.
//!
//! Entries are created on first demand during rendering and retained for the
//! whole export run. On disposal images are dropped, video decoders closed,
//! and any byte sources materialized to temp files removed. A media id that
//! fails to load once is excluded for the rest of the run.

mod audio;
mod image;
mod video;

pub use audio::{AudioClip, decode_audio_clip};
pub use image::{PreparedImage, decode_image};
pub use video::{SEEK_TIMEOUT_MS, VideoDecoder, VideoFrame};

use crate::foundation::error::{ReelError, ReelResult};
use crate::timeline::MediaSource;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

enum Entry {
    Image(Arc<PreparedImage>),
    Video(Box<VideoDecoder>),
    Audio(Arc<AudioClip>),
}

/// Per-run cache of decoded images, open video decoders and audio clips.
pub struct MediaCache {
    entries: HashMap<String, Entry>,
    failed: HashSet<String>,
    /// Byte sources materialized to disk for the ffmpeg demuxer; removed on
    /// drop.
    temp_files: Vec<PathBuf>,
    resolved_paths: HashMap<String, PathBuf>,
}

impl MediaCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            failed: HashSet::new(),
            temp_files: Vec::new(),
            resolved_paths: HashMap::new(),
        }
    }

    /// Number of live entries; useful for lifecycle assertions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return `true` when `media_id` already failed to load this run.
    pub fn is_failed(&self, media_id: &str) -> bool {
        self.failed.contains(media_id)
    }

    /// Decoded image for `media_id`, loading it on first demand.
    pub fn image(&mut self, media_id: &str, source: &MediaSource) -> ReelResult<Arc<PreparedImage>> {
        self.check_not_failed(media_id)?;
        if let Some(Entry::Image(img)) = self.entries.get(media_id) {
            return Ok(img.clone());
        }

        let result = match source {
            MediaSource::Bytes(bytes) => decode_image(bytes),
            MediaSource::Path(path) => std::fs::read(path)
                .map_err(|e| ReelError::media(format!("read image '{}': {e}", path.display())))
                .and_then(|bytes| decode_image(&bytes)),
        };
        match result {
            Ok(img) => {
                let img = Arc::new(img);
                tracing::debug!(media_id, width = img.width, height = img.height, "image cached");
                self.entries
                    .insert(media_id.to_owned(), Entry::Image(img.clone()));
                Ok(img)
            }
            Err(e) => {
                self.mark_failed(media_id, &e);
                Err(e)
            }
        }
    }

    /// Decoded video frame covering element-local time `tau`.
    ///
    /// The decoder for `media_id` is opened on first demand and kept for the
    /// run. A seek timeout propagates as [`ReelError::SeekTimeout`] without
    /// marking the id failed; any other decode error excludes the id.
    pub fn video_frame(
        &mut self,
        media_id: &str,
        source: &MediaSource,
        tau: f64,
        out_frame_period: f64,
    ) -> ReelResult<VideoFrame> {
        self.check_not_failed(media_id)?;
        if !matches!(self.entries.get(media_id), Some(Entry::Video(_))) {
            let path = match self.resolve_path(media_id, source) {
                Ok(path) => path,
                Err(e) => {
                    self.mark_failed(media_id, &e);
                    return Err(e);
                }
            };
            match video::open_decoder(&path) {
                Ok(dec) => {
                    tracing::debug!(media_id, path = %path.display(), "video decoder opened");
                    self.entries
                        .insert(media_id.to_owned(), Entry::Video(Box::new(dec)));
                }
                Err(e) => {
                    self.mark_failed(media_id, &e);
                    return Err(e);
                }
            }
        }

        let Some(Entry::Video(dec)) = self.entries.get_mut(media_id) else {
            return Err(ReelError::media(format!(
                "media id '{media_id}' is cached with a non-video entry"
            )));
        };
        match dec.frame_at(tau, out_frame_period) {
            Ok(frame) => Ok(frame),
            Err(e @ ReelError::SeekTimeout(_)) => Err(e),
            Err(e) => {
                let msg = e.to_string();
                self.entries.remove(media_id);
                self.mark_failed(media_id, &ReelError::media(msg.clone()));
                Err(ReelError::media(msg))
            }
        }
    }

    /// Fully decoded audio clip for `media_id`, loading on first demand.
    pub fn audio(&mut self, media_id: &str, source: &MediaSource) -> ReelResult<Arc<AudioClip>> {
        self.check_not_failed(media_id)?;
        if let Some(Entry::Audio(clip)) = self.entries.get(&audio_key(media_id)) {
            return Ok(clip.clone());
        }

        let path = match self.resolve_path(media_id, source) {
            Ok(path) => path,
            Err(e) => {
                self.mark_failed(media_id, &e);
                return Err(e);
            }
        };
        match decode_audio_clip(&path) {
            Ok(clip) => {
                let clip = Arc::new(clip);
                tracing::debug!(
                    media_id,
                    frames = clip.frames(),
                    sample_rate = clip.sample_rate,
                    "audio clip cached"
                );
                // Video media also mixes; keep the audio under a derived key
                // so the decoder entry stays live.
                self.entries
                    .insert(audio_key(media_id), Entry::Audio(clip.clone()));
                Ok(clip)
            }
            Err(e) => {
                self.mark_failed(media_id, &e);
                Err(e)
            }
        }
    }

    fn check_not_failed(&self, media_id: &str) -> ReelResult<()> {
        if self.failed.contains(media_id) {
            return Err(ReelError::media(format!(
                "media id '{media_id}' previously failed to load; excluded for this run"
            )));
        }
        Ok(())
    }

    fn mark_failed(&mut self, media_id: &str, err: &ReelError) {
        tracing::warn!(media_id, "media asset excluded for this run: {err}");
        self.failed.insert(media_id.to_owned());
    }

    /// Resolve a byte source to a demuxer-readable path, materializing
    /// in-memory bytes to a temp file once per id.
    fn resolve_path(&mut self, media_id: &str, source: &MediaSource) -> ReelResult<PathBuf> {
        if let Some(p) = self.resolved_paths.get(media_id) {
            return Ok(p.clone());
        }
        let path = match source {
            MediaSource::Path(p) => p.clone(),
            MediaSource::Bytes(bytes) => {
                let path = std::env::temp_dir().join(format!(
                    "reelforge_media_{}_{}",
                    std::process::id(),
                    sanitize_id(media_id)
                ));
                std::fs::write(&path, bytes.as_slice()).map_err(|e| {
                    ReelError::media(format!(
                        "materialize media '{media_id}' to '{}': {e}",
                        path.display()
                    ))
                })?;
                self.temp_files.push(path.clone());
                path
            }
        };
        self.resolved_paths
            .insert(media_id.to_owned(), path.clone());
        Ok(path)
    }

    /// Drop all entries and remove materialized temp files.
    pub fn release(&mut self) {
        self.entries.clear();
        self.resolved_paths.clear();
        for path in self.temp_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "temp media file not removed: {e}");
            }
        }
    }
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaCache {
    fn drop(&mut self) {
        self.release();
    }
}

fn audio_key(media_id: &str) -> String {
    format!("{media_id}\u{1}audio")
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
