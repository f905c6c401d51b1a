//! Effect pipeline: ordered post-processors over the composited surface.
//!
//! Internal processors and user extensions share one contract,
//! [`FrameProcessor`]. The pipeline applies each processor in order after
//! composition; a processor that fails is skipped, its error recorded, and
//! the surface passes through unchanged. Reorder/add/remove are not
//! thread-safe; callers quiesce the driver before mutating.

mod fx;
mod transitions;

pub use fx::{Blur, Brightness, ColorFilter};
pub use transitions::{Fade, FadeMode, Slide, SlideDir, Wipe, WipeAxis};

use crate::foundation::error::{ReelError, ReelResult};
use crate::render::Surface;
use crate::timeline::{ExportSettings, TimelineModel};

/// Whether a processor is parameterized and time-independent, or driven by
/// progress over a duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Static parameters; same output for the same input surface.
    Effect,
    /// Progress-driven over `[start, start + duration)`.
    Transition,
}

/// One surface post-processor.
pub trait FrameProcessor: Send {
    /// Stable identifier used by pipeline list/remove/reorder operations.
    fn id(&self) -> &str;
    /// Effect or transition.
    fn kind(&self) -> ProcessorKind;
    /// Transform the surface in place at timestamp `t`.
    ///
    /// Must preserve the surface dimensions and leave the surface in a
    /// well-defined state on success.
    fn process(&mut self, surface: &mut Surface, settings: &ExportSettings, t: f64)
    -> ReelResult<()>;
}

/// Ordered processor list run by the frame renderer after composition.
#[derive(Default)]
pub struct EffectPipeline {
    processors: Vec<Box<dyn FrameProcessor>>,
    errors: Vec<(String, String)>,
    scratch: Option<Surface>,
}

impl std::fmt::Debug for EffectPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectPipeline")
            .field("processors", &self.processors.iter().map(|p| p.id()).collect::<Vec<_>>())
            .field("errors", &self.errors)
            .field("scratch", &self.scratch)
            .finish()
    }
}

impl EffectPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline from the ordered effect ids on the model's tracks.
    ///
    /// Unknown ids are logged and skipped; the export proceeds without them.
    pub fn from_model(model: &TimelineModel) -> Self {
        let mut pipeline = Self::new();
        for track in &model.tracks {
            for effect_id in &track.effect_ids {
                match create(effect_id, &serde_json::Value::Null, model.duration) {
                    Ok(p) => pipeline.push(p),
                    Err(e) => {
                        tracing::warn!(track = %track.id, %effect_id, "effect id skipped: {e}");
                    }
                }
            }
        }
        pipeline
    }

    /// Append a processor at the end of the run order.
    pub fn push(&mut self, processor: Box<dyn FrameProcessor>) {
        self.processors.push(processor);
    }

    /// Remove the first processor with `id`; returns `false` when absent.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.processors.iter().position(|p| p.id() == id) {
            Some(i) => {
                self.processors.remove(i);
                true
            }
            None => false,
        }
    }

    /// Move the first processor with `id` to `index` (clamped); returns
    /// `false` when absent.
    pub fn reorder(&mut self, id: &str, index: usize) -> bool {
        match self.processors.iter().position(|p| p.id() == id) {
            Some(i) => {
                let p = self.processors.remove(i);
                let index = index.min(self.processors.len());
                self.processors.insert(index, p);
                true
            }
            None => false,
        }
    }

    /// Processor ids in run order.
    pub fn list(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.id()).collect()
    }

    /// Number of processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Return `true` when the pipeline holds no processors.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Errors recorded from skipped processors since the last call.
    pub fn take_errors(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.errors)
    }

    /// Run every processor in order over `surface` at timestamp `t`.
    ///
    /// A failing processor leaves the surface exactly as it received it:
    /// each processor runs against a scratch copy that is committed only on
    /// success.
    pub fn run(&mut self, surface: &mut Surface, settings: &ExportSettings, t: f64) {
        if self.processors.is_empty() {
            return;
        }

        let mut scratch = match self.scratch.take() {
            Some(s) if s.width == surface.width && s.height == surface.height => s,
            _ => Surface::new(surface.width, surface.height),
        };

        for p in &mut self.processors {
            scratch.copy_from(surface);
            match p.process(&mut scratch, settings, t) {
                Ok(()) if scratch.width == surface.width && scratch.height == surface.height => {
                    surface.copy_from(&scratch);
                }
                Ok(()) => {
                    // Dimension changes violate the contract; treat like a
                    // failure and keep the prior surface.
                    let msg = "processor changed surface dimensions".to_owned();
                    tracing::warn!(id = p.id(), "{msg}");
                    self.errors.push((p.id().to_owned(), msg));
                    scratch = Surface::new(surface.width, surface.height);
                }
                Err(e) => {
                    tracing::warn!(id = p.id(), t, "processor skipped: {e}");
                    self.errors.push((p.id().to_owned(), e.to_string()));
                }
            }
        }

        self.scratch = Some(scratch);
    }
}

/// Build a built-in processor from its stable kind id.
///
/// Transition kinds accept `start` / `duration` seconds in `params`;
/// `fade_out` defaults its window to the last second of `timeline_duration`.
pub fn create(
    kind: &str,
    params: &serde_json::Value,
    timeline_duration: f64,
) -> ReelResult<Box<dyn FrameProcessor>> {
    let kind = kind.trim().to_ascii_lowercase();
    if kind.is_empty() {
        return Err(ReelError::validation("effect kind must be non-empty"));
    }

    let f = |key: &str, default: f64| -> f64 {
        params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    };
    let start = f("start", 0.0);
    let duration = f("duration", 1.0);

    let p: Box<dyn FrameProcessor> = match kind.as_str() {
        "blur" => Box::new(Blur::new(
            f("radius", 4.0).max(0.0) as u32,
            f("sigma", 2.0) as f32,
        )),
        "brightness" => Box::new(Brightness::new(f("amount", 0.2) as f32)),
        "color_filter" => Box::new(ColorFilter::new(
            f("hue", 0.0) as f32,
            f("saturation", 1.0) as f32,
            f("brightness", 1.0) as f32,
        )),
        "fade_in" => Box::new(Fade::new(FadeMode::In, start, duration)),
        "fade_out" => Box::new(Fade::new(
            FadeMode::Out,
            params
                .get("start")
                .and_then(|v| v.as_f64())
                .unwrap_or((timeline_duration - duration).max(0.0)),
            duration,
        )),
        "fade_cross" => Box::new(Fade::new(FadeMode::Cross, start, duration)),
        "slide_left" => Box::new(Slide::new(SlideDir::Left, start, duration)),
        "slide_right" => Box::new(Slide::new(SlideDir::Right, start, duration)),
        "slide_up" => Box::new(Slide::new(SlideDir::Up, start, duration)),
        "slide_down" => Box::new(Slide::new(SlideDir::Down, start, duration)),
        "wipe_horizontal" => Box::new(Wipe::new(WipeAxis::Horizontal, start, duration)),
        "wipe_vertical" => Box::new(Wipe::new(WipeAxis::Vertical, start, duration)),
        other => {
            return Err(ReelError::validation(format!(
                "unknown effect kind '{other}'"
            )));
        }
    };
    Ok(p)
}

/// Progress of a transition window at `t`: clamped to `[0, 1]`, and `1`
/// for non-positive durations.
pub(crate) fn progress(t: f64, start: f64, duration: f64) -> f32 {
    if duration <= 0.0 {
        return 1.0;
    }
    (((t - start) / duration).clamp(0.0, 1.0)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Rgba8;

    struct FailingProcessor;

    impl FrameProcessor for FailingProcessor {
        fn id(&self) -> &str {
            "failing"
        }
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::Effect
        }
        fn process(
            &mut self,
            surface: &mut Surface,
            _settings: &ExportSettings,
            _t: f64,
        ) -> ReelResult<()> {
            // Scribble before failing; the pipeline must discard this.
            surface.data.fill(7);
            Err(ReelError::media("deliberate failure"))
        }
    }

    fn settings() -> ExportSettings {
        ExportSettings {
            width: 8,
            height: 8,
            fps: 30,
            ..Default::default()
        }
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let mut surface = Surface::new(8, 8);
        surface.clear(Rgba8::rgb(10, 20, 30));
        let before = surface.data.clone();
        let mut pipeline = EffectPipeline::new();
        pipeline.run(&mut surface, &settings(), 0.5);
        assert_eq!(surface.data, before);
    }

    #[test]
    fn failing_processor_leaves_surface_unchanged() {
        let mut surface = Surface::new(8, 8);
        surface.clear(Rgba8::rgb(10, 20, 30));
        let before = surface.data.clone();

        let mut pipeline = EffectPipeline::new();
        pipeline.push(Box::new(FailingProcessor));
        pipeline.run(&mut surface, &settings(), 0.0);

        assert_eq!(surface.data, before);
        let errors = pipeline.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "failing");
    }

    #[test]
    fn list_remove_reorder_by_id() {
        let mut pipeline = EffectPipeline::new();
        pipeline.push(create("blur", &serde_json::Value::Null, 1.0).unwrap());
        pipeline.push(create("brightness", &serde_json::Value::Null, 1.0).unwrap());
        assert_eq!(pipeline.list(), vec!["blur", "brightness"]);

        assert!(pipeline.reorder("brightness", 0));
        assert_eq!(pipeline.list(), vec!["brightness", "blur"]);

        assert!(pipeline.remove("blur"));
        assert!(!pipeline.remove("blur"));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(create("sparkle", &serde_json::Value::Null, 1.0).is_err());
    }

    #[test]
    fn progress_clamps() {
        assert_eq!(progress(0.0, 1.0, 2.0), 0.0);
        assert_eq!(progress(2.0, 1.0, 2.0), 0.5);
        assert_eq!(progress(9.0, 1.0, 2.0), 1.0);
        assert_eq!(progress(0.0, 0.0, 0.0), 1.0);
    }
}
