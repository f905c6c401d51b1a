//! Per-frame composition: active set, render order, dispatch, effects.

use crate::effects::EffectPipeline;
use crate::export::CancelToken;
use crate::foundation::error::ReelResult;
use crate::media::MediaCache;
use crate::render::elements::{DrawState, ElementRenderers};
use crate::render::surface::Surface;
use crate::timeline::{Element, ExportSettings, MediaKind, TimelineModel, Track, TrackKind};
use smallvec::SmallVec;

/// Renders one fully composited surface per timestamp.
///
/// Individual element failures are logged and skipped so the frame is still
/// produced; the driver substitutes a background-filled surface only when the
/// whole composition fails.
pub struct FrameRenderer {
    settings: ExportSettings,
    renderers: ElementRenderers,
}

struct ActiveItem<'m> {
    text_layer: bool,
    track_index: usize,
    element_index: usize,
    track: &'m Track,
    element: &'m Element,
}

impl FrameRenderer {
    /// Build a renderer bound to one settings record.
    pub fn new(settings: &ExportSettings) -> Self {
        Self {
            settings: settings.clone(),
            renderers: ElementRenderers::new(),
        }
    }

    /// Allocate the reusable surface at the effective size.
    pub fn new_surface(&self) -> Surface {
        Surface::new(self.settings.surface_width(), self.settings.surface_height())
    }

    /// Compose the frame at timestamp `t` into `surface`, then run the
    /// effect pipeline.
    ///
    /// Equivalent to [`FrameRenderer::render_cancellable`] with a token that
    /// never fires.
    pub fn render_into(
        &mut self,
        surface: &mut Surface,
        model: &TimelineModel,
        cache: &mut MediaCache,
        pipeline: &mut EffectPipeline,
        t: f64,
    ) -> ReelResult<()> {
        self.render_cancellable(surface, model, cache, pipeline, t, &CancelToken::new())
    }

    /// Compose the frame, observing `cancel` before each element's
    /// decode/seek. Cancellation is the only error this returns.
    pub fn render_cancellable(
        &mut self,
        surface: &mut Surface,
        model: &TimelineModel,
        cache: &mut MediaCache,
        pipeline: &mut EffectPipeline,
        t: f64,
        cancel: &CancelToken,
    ) -> ReelResult<()> {
        surface.clear(self.settings.background);

        let mut active: SmallVec<[ActiveItem<'_>; 16]> = SmallVec::new();
        for (track_index, track) in model.tracks.iter().enumerate() {
            if track.muted || track.kind == TrackKind::Audio {
                continue;
            }
            for (element_index, element) in track.elements.iter().enumerate() {
                if !element.common().is_active_at(t) {
                    continue;
                }
                if let Element::Media(m) = element
                    && m.kind == MediaKind::Audio
                {
                    continue;
                }
                active.push(ActiveItem {
                    text_layer: track.kind.is_text_layer(),
                    track_index,
                    element_index,
                    track,
                    element,
                });
            }
        }

        // Render order: text tracks strictly above non-text, then track
        // index, then element position. Deterministic and independent of
        // decode completion order.
        active.sort_by_key(|i| (i.text_layer, i.track_index, i.element_index));

        for item in &active {
            cancel.check()?;
            let common = item.element.common();
            let state = DrawState {
                opacity: (common.opacity * item.track.opacity.unwrap_or(1.0)).clamp(0.0, 1.0)
                    as f32,
                blend: item.track.blend.unwrap_or(common.blend),
                scale: self.settings.resolution_multiplier,
            };
            let result = match item.element {
                Element::Media(e) => self.renderers.media(
                    surface,
                    e,
                    model,
                    cache,
                    &self.settings,
                    t,
                    &state,
                ),
                Element::Text(e) => self.renderers.text(surface, e, &self.settings, &state),
                Element::Overlay(e) => {
                    self.renderers.overlay(surface, e, model, cache, &state)
                }
                Element::Subtitle(e) => {
                    self.renderers.subtitle(surface, e, &self.settings, &state)
                }
            };
            if let Err(e) = result {
                tracing::warn!(
                    element = %common.id,
                    t,
                    "element skipped for this frame: {e}"
                );
            }
        }

        pipeline.run(surface, &self.settings, t);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{
        BlendMode, ElementCommon, OverlayElement, OverlaySource, Rgba8, TrackKind,
    };
    use std::collections::BTreeMap;

    fn overlay(id: &str, start: f64, dur: f64, color: Rgba8, x: f64, y: f64) -> Element {
        Element::Overlay(OverlayElement {
            common: ElementCommon {
                id: id.to_owned(),
                start_time: start,
                duration: dur,
                trim_start: 0.0,
                trim_end: 0.0,
                opacity: 1.0,
                blend: BlendMode::SourceOver,
            },
            source: OverlaySource::Shape { color },
            x,
            y,
            width: 8.0,
            height: 8.0,
            rotation_deg: 0.0,
        })
    }

    fn track(id: &str, kind: TrackKind, elements: Vec<Element>) -> Track {
        Track {
            id: id.to_owned(),
            name: String::new(),
            kind,
            muted: false,
            opacity: None,
            blend: None,
            elements,
            effect_ids: Vec::new(),
        }
    }

    fn model(tracks: Vec<Track>) -> TimelineModel {
        let mut m = TimelineModel {
            tracks,
            duration: 0.0,
            nominal_width: 32,
            nominal_height: 32,
            nominal_fps: 30,
            media: BTreeMap::new(),
        };
        m.duration = m.computed_duration();
        m
    }

    fn small_settings() -> ExportSettings {
        ExportSettings {
            width: 32,
            height: 32,
            fps: 30,
            background: Rgba8::BLACK,
            ..Default::default()
        }
    }

    #[test]
    fn background_only_frame_is_cleared() {
        let settings = small_settings();
        let mut fr = FrameRenderer::new(&settings);
        let mut surface = fr.new_surface();
        let m = model(vec![]);
        let mut cache = MediaCache::new();
        let mut pipeline = EffectPipeline::new();
        fr.render_into(&mut surface, &m, &mut cache, &mut pipeline, 0.0)
            .unwrap();
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(surface.pixel(x, y), [0, 0, 0, 255]);
            }
        }
    }

    #[test]
    fn inactive_elements_do_not_draw() {
        let settings = small_settings();
        let mut fr = FrameRenderer::new(&settings);
        let mut surface = fr.new_surface();
        let m = model(vec![track(
            "t0",
            TrackKind::Overlay,
            vec![overlay("late", 5.0, 1.0, Rgba8::WHITE, 16.0, 16.0)],
        )]);
        let mut cache = MediaCache::new();
        let mut pipeline = EffectPipeline::new();
        fr.render_into(&mut surface, &m, &mut cache, &mut pipeline, 0.0)
            .unwrap();
        assert_eq!(surface.pixel(16, 16), [0, 0, 0, 255]);
    }

    #[test]
    fn later_track_draws_above_earlier() {
        let settings = small_settings();
        let mut fr = FrameRenderer::new(&settings);
        let mut surface = fr.new_surface();
        let m = model(vec![
            track(
                "below",
                TrackKind::Overlay,
                vec![overlay("w", 0.0, 1.0, Rgba8::WHITE, 16.0, 16.0)],
            ),
            track(
                "above",
                TrackKind::Overlay,
                vec![overlay("r", 0.0, 1.0, Rgba8::rgb(255, 0, 0), 16.0, 16.0)],
            ),
        ]);
        let mut cache = MediaCache::new();
        let mut pipeline = EffectPipeline::new();
        fr.render_into(&mut surface, &m, &mut cache, &mut pipeline, 0.0)
            .unwrap();
        assert_eq!(surface.pixel(16, 16), [255, 0, 0, 255]);
    }

    #[test]
    fn muted_track_is_excluded() {
        let settings = small_settings();
        let mut fr = FrameRenderer::new(&settings);
        let mut surface = fr.new_surface();
        let mut t = track(
            "t0",
            TrackKind::Overlay,
            vec![overlay("w", 0.0, 1.0, Rgba8::WHITE, 16.0, 16.0)],
        );
        t.muted = true;
        let m = model(vec![t]);
        let mut cache = MediaCache::new();
        let mut pipeline = EffectPipeline::new();
        fr.render_into(&mut surface, &m, &mut cache, &mut pipeline, 0.0)
            .unwrap();
        assert_eq!(surface.pixel(16, 16), [0, 0, 0, 255]);
    }

    #[test]
    fn failing_element_still_produces_the_frame() {
        let settings = small_settings();
        let mut fr = FrameRenderer::new(&settings);
        let mut surface = fr.new_surface();
        // Overlay image with a media id missing from the library: the
        // renderer falls back to the grey rectangle and the frame survives.
        let m = model(vec![track(
            "t0",
            TrackKind::Overlay,
            vec![Element::Overlay(OverlayElement {
                common: ElementCommon {
                    id: "img".to_owned(),
                    start_time: 0.0,
                    duration: 1.0,
                    trim_start: 0.0,
                    trim_end: 0.0,
                    opacity: 1.0,
                    blend: BlendMode::SourceOver,
                },
                source: OverlaySource::Image {
                    media_id: "missing".to_owned(),
                },
                x: 16.0,
                y: 16.0,
                width: 8.0,
                height: 8.0,
                rotation_deg: 0.0,
            })],
        )]);
        let mut cache = MediaCache::new();
        let mut pipeline = EffectPipeline::new();
        fr.render_into(&mut surface, &m, &mut cache, &mut pipeline, 0.0)
            .unwrap();
        assert_eq!(surface.pixel(16, 16), [128, 128, 128, 255]);
    }
}
