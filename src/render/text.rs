//! Text shaping and rasterization through cosmic-text.
//!
//! The font system loads system fonts once per renderer and resolves family
//! names, weights and styles; glyph coverage comes back through the swash
//! cache and is written into a tight premultiplied RGBA8 raster.

use crate::foundation::error::{ReelError, ReelResult};
use crate::render::composite::over;
use crate::timeline::{FontStyle, Rgba8, TextAlign, TextDecoration};
use cosmic_text::{
    Align, Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, Style, SwashCache, Weight,
};

/// Tight raster of shaped text plus per-line metrics for decorations.
pub(crate) struct TextRaster {
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Premultiplied RGBA8, `width * height * 4`.
    pub(crate) data: Vec<u8>,
}

/// Styling inputs for one rasterization; sizes are in raster pixels.
pub(crate) struct TextSpec<'a> {
    pub(crate) content: &'a str,
    pub(crate) font_family: &'a str,
    pub(crate) size_px: f32,
    pub(crate) weight: u16,
    pub(crate) style: FontStyle,
    pub(crate) decoration: TextDecoration,
    pub(crate) color: Rgba8,
    pub(crate) align: TextAlign,
}

/// Shaping and raster engine; expensive to build, reused across frames.
pub(crate) struct TextEngine {
    font_system: FontSystem,
    swash: SwashCache,
}

impl TextEngine {
    pub(crate) fn new() -> Self {
        Self {
            font_system: FontSystem::new(),
            swash: SwashCache::new(),
        }
    }

    /// Shape, lay out and rasterize `spec` into a tight raster.
    pub(crate) fn raster(&mut self, spec: &TextSpec<'_>) -> ReelResult<TextRaster> {
        if !spec.size_px.is_finite() || spec.size_px <= 0.0 {
            return Err(ReelError::validation("text size must be finite and > 0"));
        }
        if spec.content.is_empty() {
            return Err(ReelError::validation("text content must be non-empty"));
        }

        let fs = &mut self.font_system;
        let line_height = spec.size_px * 1.2;
        let metrics = Metrics::new(spec.size_px, line_height);
        let mut buffer = Buffer::new(fs, metrics);

        let family = resolve_family(spec.font_family);
        let attrs = Attrs::new()
            .family(family)
            .weight(Weight(spec.weight))
            .style(match spec.style {
                FontStyle::Normal => Style::Normal,
                FontStyle::Italic => Style::Italic,
            });

        // First pass: unconstrained layout to measure the tight box.
        buffer.set_size(fs, None, None);
        buffer.set_text(fs, spec.content, attrs, Shaping::Advanced);
        buffer.shape_until_scroll(fs, false);

        let (text_w, text_h) = measure(&buffer, line_height);
        if text_w == 0 || text_h == 0 {
            return Err(ReelError::media(format!(
                "no glyphs rasterized for '{}' (is a system font available?)",
                spec.font_family
            )));
        }

        // Second pass: constrain to the measured width so per-line alignment
        // lands inside the box.
        buffer.set_size(fs, Some(text_w as f32), None);
        let align = match spec.align {
            TextAlign::Left => Align::Left,
            TextAlign::Center => Align::Center,
            TextAlign::Right => Align::Right,
        };
        for line in buffer.lines.iter_mut() {
            line.set_align(Some(align));
        }
        buffer.shape_until_scroll(fs, false);

        let mut raster = TextRaster {
            width: text_w,
            height: text_h,
            data: vec![0u8; text_w as usize * text_h as usize * 4],
        };

        let text_color = Color::rgba(spec.color.r, spec.color.g, spec.color.b, spec.color.a);
        let width = text_w;
        let height = text_h;
        let data = &mut raster.data;
        buffer.draw(fs, &mut self.swash, text_color, |x, y, w, h, color| {
            let [r, g, b, a] = [color.r(), color.g(), color.b(), color.a()];
            if a == 0 {
                return;
            }
            let src = premul_px(r, g, b, a);
            for dy in 0..h as i32 {
                for dx in 0..w as i32 {
                    let px = x + dx;
                    let py = y + dy;
                    if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                        continue;
                    }
                    let i = (py as usize * width as usize + px as usize) * 4;
                    let dst = [data[i], data[i + 1], data[i + 2], data[i + 3]];
                    let out = over(dst, src, 1.0);
                    data[i..i + 4].copy_from_slice(&out);
                }
            }
        });

        if spec.decoration != TextDecoration::None {
            draw_decorations(&mut raster, &buffer, spec, line_height);
        }

        Ok(raster)
    }
}

fn resolve_family(name: &str) -> Family<'_> {
    match name.trim().to_ascii_lowercase().as_str() {
        "serif" => Family::Serif,
        "sans-serif" | "sans serif" | "sans" => Family::SansSerif,
        "monospace" | "mono" => Family::Monospace,
        "cursive" => Family::Cursive,
        "fantasy" => Family::Fantasy,
        _ => Family::Name(name),
    }
}

fn measure(buffer: &Buffer, line_height: f32) -> (u32, u32) {
    let mut max_x = 0.0f32;
    let mut max_y = 0.0f32;
    for run in buffer.layout_runs() {
        max_x = max_x.max(run.line_w);
        max_y = max_y.max(run.line_top + line_height);
    }
    (max_x.ceil() as u32, max_y.ceil() as u32)
}

/// Stroke underline / strike-through lines per layout run, in the text color.
/// Line thickness scales with font size: `max(1, size / 20)`.
fn draw_decorations(raster: &mut TextRaster, buffer: &Buffer, spec: &TextSpec<'_>, _lh: f32) {
    let thickness = (spec.size_px / 20.0).max(1.0).round() as i32;
    let src = premul_px(spec.color.r, spec.color.g, spec.color.b, spec.color.a);

    let spans: Vec<(f32, f32, f32)> = buffer
        .layout_runs()
        .map(|run| {
            let left = run
                .glyphs
                .iter()
                .map(|g| g.x)
                .fold(f32::INFINITY, f32::min)
                .max(0.0);
            (left, run.line_w, run.line_y)
        })
        .collect();

    for (left, line_w, baseline) in spans {
        let y0 = match spec.decoration {
            TextDecoration::Underline => baseline + spec.size_px * 0.1,
            TextDecoration::LineThrough => baseline - spec.size_px * 0.3,
            TextDecoration::None => continue,
        }
        .round() as i32;

        for dy in 0..thickness {
            let y = y0 + dy;
            if y < 0 || y >= raster.height as i32 {
                continue;
            }
            let x0 = left.floor().max(0.0) as usize;
            let x1 = ((left + line_w).ceil() as usize).min(raster.width as usize);
            for x in x0..x1 {
                let i = (y as usize * raster.width as usize + x) * 4;
                let dst = [
                    raster.data[i],
                    raster.data[i + 1],
                    raster.data[i + 2],
                    raster.data[i + 3],
                ];
                let out = over(dst, src, 1.0);
                raster.data[i..i + 4].copy_from_slice(&out);
            }
        }
    }
}

fn premul_px(r: u8, g: u8, b: u8, a: u8) -> [u8; 4] {
    let aa = u16::from(a);
    let p = |c: u8| (((u16::from(c) * aa) + 127) / 255) as u8;
    [p(r), p(g), p(b), a]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(content: &str) -> TextSpec<'_> {
        TextSpec {
            content,
            font_family: "sans-serif",
            size_px: 24.0,
            weight: 400,
            style: FontStyle::Normal,
            decoration: TextDecoration::None,
            color: Rgba8::WHITE,
            align: TextAlign::Center,
        }
    }

    #[test]
    fn empty_content_is_rejected() {
        let mut engine = TextEngine::new();
        assert!(engine.raster(&spec("")).is_err());
    }

    #[test]
    fn raster_has_nonzero_box_when_fonts_exist() {
        let mut engine = TextEngine::new();
        // Headless environments may have no fonts installed; the contract is
        // a clean error, not a panic.
        match engine.raster(&spec("HELLO")) {
            Ok(r) => {
                assert!(r.width > 0 && r.height > 0);
                assert!(r.data.iter().any(|&b| b != 0), "expected inked pixels");
            }
            Err(e) => assert!(e.to_string().contains("font")),
        }
    }
}
