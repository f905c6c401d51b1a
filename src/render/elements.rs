//! Per-element-kind renderers.
//!
//! Each renderer receives the shared surface by exclusive reference together
//! with the element's resolved draw state (opacity, blend mode, resolution
//! scale) and writes exactly one element. Caches they depend on live in the
//! [`MediaCache`]; the text engine is owned here.

use crate::foundation::error::{ReelError, ReelResult};
use crate::media::MediaCache;
use crate::render::composite::{draw_image_affine, fill_quad_affine};
use crate::render::surface::{Surface, premultiply};
use crate::render::text::{TextEngine, TextSpec};
use crate::timeline::{
    ExportSettings, MediaElement, MediaKind, MediaSource, OverlayElement, OverlaySource,
    PatternKind, Rgba8, SubtitleElement, SubtitlePosition, TextAlign, TextElement, TimelineModel,
};
use kurbo::Affine;

/// Resolved compositing state for one element draw.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DrawState {
    /// Element opacity multiplied by the track opacity.
    pub(crate) opacity: f32,
    /// Effective blend mode (track override or element mode).
    pub(crate) blend: crate::timeline::BlendMode,
    /// Resolution multiplier from canvas space to surface space.
    pub(crate) scale: f64,
}

/// Renderers for all element kinds; one instance per frame renderer.
pub(crate) struct ElementRenderers {
    text: TextEngine,
}

impl ElementRenderers {
    pub(crate) fn new() -> Self {
        Self {
            text: TextEngine::new(),
        }
    }

    /// Draw a media element across the full effective surface.
    pub(crate) fn media(
        &mut self,
        surface: &mut Surface,
        element: &MediaElement,
        model: &TimelineModel,
        cache: &mut MediaCache,
        settings: &ExportSettings,
        t: f64,
        state: &DrawState,
    ) -> ReelResult<()> {
        let source = resolve_source(model, &element.media_id)?;
        match element.kind {
            MediaKind::Audio => Ok(()),
            MediaKind::Image => {
                let img = cache.image(&element.media_id, source)?;
                draw_canvas_filling(
                    surface,
                    &img.rgba8_premul,
                    img.width,
                    img.height,
                    state,
                );
                Ok(())
            }
            MediaKind::Video => {
                let tau = element.common.local_time(t);
                let out_period = 1.0 / f64::from(settings.fps);
                let frame = cache.video_frame(&element.media_id, source, tau, out_period)?;
                draw_canvas_filling(surface, &frame.data, frame.width, frame.height, state);
                Ok(())
            }
        }
    }

    /// Draw a text element anchored at canvas center plus its offset.
    pub(crate) fn text(
        &mut self,
        surface: &mut Surface,
        element: &TextElement,
        settings: &ExportSettings,
        state: &DrawState,
    ) -> ReelResult<()> {
        let r = state.scale;
        let raster = self.text.raster(&TextSpec {
            content: &element.content,
            font_family: &element.font_family,
            size_px: (element.font_size * r) as f32,
            weight: element.font_weight,
            style: element.font_style,
            decoration: element.decoration,
            color: element.color,
            align: element.align,
        })?;

        let anchor_x = (f64::from(settings.width) / 2.0 + element.x) * r;
        let anchor_y = (f64::from(settings.height) / 2.0 + element.y) * r;
        let w = f64::from(raster.width);
        let h = f64::from(raster.height);

        // Horizontal: the anchor is the left/center/right edge of the box per
        // text-align. Vertical: baseline middle, so the box centers on y.
        let box_dx = match element.align {
            TextAlign::Left => 0.0,
            TextAlign::Center => -w / 2.0,
            TextAlign::Right => -w,
        };
        let transform = Affine::translate((anchor_x, anchor_y))
            * Affine::rotate(element.rotation_deg.to_radians())
            * Affine::translate((box_dx, -h / 2.0));

        if let Some(bg) = element.background {
            fill_quad_affine(
                surface,
                w,
                h,
                transform,
                premultiply(bg),
                state.blend,
                state.opacity,
            );
        }
        draw_image_affine(
            surface,
            &raster.data,
            raster.width,
            raster.height,
            transform,
            state.blend,
            state.opacity,
        );
        Ok(())
    }

    /// Draw an overlay centered on `(x, y)` with rotation.
    pub(crate) fn overlay(
        &mut self,
        surface: &mut Surface,
        element: &OverlayElement,
        model: &TimelineModel,
        cache: &mut MediaCache,
        state: &DrawState,
    ) -> ReelResult<()> {
        let r = state.scale;
        let w = element.width;
        let h = element.height;
        let transform = Affine::translate((element.x * r, element.y * r))
            * Affine::rotate(element.rotation_deg.to_radians())
            * Affine::scale(r)
            * Affine::translate((-w / 2.0, -h / 2.0));

        match &element.source {
            OverlaySource::Shape { color } => {
                fill_quad_affine(
                    surface,
                    w,
                    h,
                    transform,
                    premultiply(*color),
                    state.blend,
                    state.opacity,
                );
            }
            OverlaySource::Image { media_id } => {
                let fetched = resolve_source(model, media_id).and_then(|s| cache.image(media_id, s));
                match fetched {
                    Ok(img) => {
                        let img_transform = transform
                            * Affine::scale_non_uniform(
                                w / f64::from(img.width.max(1)),
                                h / f64::from(img.height.max(1)),
                            );
                        draw_image_affine(
                            surface,
                            &img.rgba8_premul,
                            img.width,
                            img.height,
                            img_transform,
                            state.blend,
                            state.opacity,
                        );
                    }
                    Err(e) => {
                        // Neutral grey keeps the frame structurally consistent
                        // when the overlay image cannot be loaded.
                        tracing::warn!(%media_id, "overlay image fallback: {e}");
                        fill_quad_affine(
                            surface,
                            w,
                            h,
                            transform,
                            premultiply(Rgba8::rgb(128, 128, 128)),
                            state.blend,
                            state.opacity,
                        );
                    }
                }
            }
            OverlaySource::Pattern { kind, color } => {
                let pw = w.round().max(1.0) as u32;
                let ph = h.round().max(1.0) as u32;
                let bitmap = pattern_rgba8(*kind, pw, ph, *color);
                let img_transform = transform
                    * Affine::scale_non_uniform(w / f64::from(pw), h / f64::from(ph));
                draw_image_affine(
                    surface,
                    &bitmap,
                    pw,
                    ph,
                    img_transform,
                    state.blend,
                    state.opacity,
                );
            }
        }
        Ok(())
    }

    /// Draw a subtitle at its preset or custom position.
    pub(crate) fn subtitle(
        &mut self,
        surface: &mut Surface,
        element: &SubtitleElement,
        settings: &ExportSettings,
        state: &DrawState,
    ) -> ReelResult<()> {
        let r = state.scale;
        let raster = self.text.raster(&TextSpec {
            content: &element.content,
            font_family: &element.font_family,
            size_px: (element.font_size * r) as f32,
            weight: 400,
            style: crate::timeline::FontStyle::Normal,
            decoration: crate::timeline::TextDecoration::None,
            color: element.color,
            align: element.align,
        })?;

        let (cx, cy) = match element.position {
            SubtitlePosition::Top => (f64::from(settings.width) / 2.0, 2.0 * element.font_size),
            SubtitlePosition::Center => (
                f64::from(settings.width) / 2.0,
                f64::from(settings.height) / 2.0,
            ),
            SubtitlePosition::Bottom => (
                f64::from(settings.width) / 2.0,
                f64::from(settings.height) - 2.0 * element.font_size,
            ),
            SubtitlePosition::Custom { x, y } => (x, y),
        };

        let w = f64::from(raster.width);
        let h = f64::from(raster.height);
        let box_dx = match element.align {
            TextAlign::Left => 0.0,
            TextAlign::Center => -w / 2.0,
            TextAlign::Right => -w,
        };
        let transform =
            Affine::translate((cx * r, cy * r)) * Affine::translate((box_dx, -h / 2.0));

        if let Some(bg) = element.background {
            let pad = 8.0 * r;
            fill_quad_affine(
                surface,
                w + 2.0 * pad,
                h + 2.0 * pad,
                transform * Affine::translate((-pad, -pad)),
                premultiply(bg),
                state.blend,
                state.opacity,
            );
        }
        draw_image_affine(
            surface,
            &raster.data,
            raster.width,
            raster.height,
            transform,
            state.blend,
            state.opacity,
        );
        Ok(())
    }
}

/// Stretch a source buffer across the full effective surface.
fn draw_canvas_filling(
    surface: &mut Surface,
    src: &[u8],
    sw: u32,
    sh: u32,
    state: &DrawState,
) {
    if sw == 0 || sh == 0 {
        return;
    }
    let transform = Affine::scale_non_uniform(
        f64::from(surface.width) / f64::from(sw),
        f64::from(surface.height) / f64::from(sh),
    );
    draw_image_affine(surface, src, sw, sh, transform, state.blend, state.opacity);
}

fn resolve_source<'m>(model: &'m TimelineModel, media_id: &str) -> ReelResult<&'m MediaSource> {
    model
        .media
        .get(media_id)
        .ok_or_else(|| ReelError::media(format!("media id '{media_id}' is not in the library")))
}

/// Deterministic procedural pattern bitmap in premultiplied RGBA8.
///
/// The output depends only on `(kind, w, h, color)`.
pub(crate) fn pattern_rgba8(kind: PatternKind, w: u32, h: u32, color: Rgba8) -> Vec<u8> {
    let fg = premultiply(color);
    let mut data = vec![0u8; w as usize * h as usize * 4];

    let mut set = |x: u32, y: u32| {
        let i = (y as usize * w as usize + x as usize) * 4;
        data[i..i + 4].copy_from_slice(&fg);
    };

    match kind {
        PatternKind::Solid => {
            for y in 0..h {
                for x in 0..w {
                    set(x, y);
                }
            }
        }
        PatternKind::Checkerboard => {
            const CELL: u32 = 16;
            for y in 0..h {
                for x in 0..w {
                    if ((x / CELL) + (y / CELL)).is_multiple_of(2) {
                        set(x, y);
                    }
                }
            }
        }
        PatternKind::Stripes => {
            const PERIOD: u32 = 16;
            for y in 0..h {
                for x in 0..w {
                    if ((x + y) % PERIOD) < PERIOD / 2 {
                        set(x, y);
                    }
                }
            }
        }
        PatternKind::Dots => {
            const CELL: u32 = 16;
            const RADIUS: i64 = 4;
            for y in 0..h {
                for x in 0..w {
                    let cx = i64::from(x % CELL) - i64::from(CELL / 2);
                    let cy = i64::from(y % CELL) - i64::from(CELL / 2);
                    if cx * cx + cy * cy <= RADIUS * RADIUS {
                        set(x, y);
                    }
                }
            }
        }
    }
    data
}
