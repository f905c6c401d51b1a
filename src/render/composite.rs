//! Per-pixel compositing primitives over premultiplied RGBA8 buffers.
//!
//! `source-over` stays on the integer fast path; the separable blend modes
//! unpremultiply into f32, apply the blend function, and composite with the
//! standard `co = as*(1-ab)*cs + as*ab*B(cb,cs) + (1-as)*ab*cb` mixing rule.

use crate::foundation::math::{add_sat_u8, mul_div255_u8};
use crate::render::surface::Surface;
use crate::timeline::BlendMode;
use kurbo::{Affine, Point};

pub(crate) type PremulRgba8 = [u8; 4];

/// Source-over on premultiplied pixels with an extra opacity factor.
pub(crate) fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255_u8(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);
    let mut out = [0u8; 4];
    out[3] = add_sat_u8(u16::from(sa), u16::from(mul_div255_u8(u16::from(dst[3]), inv)));
    for i in 0..3 {
        let sc = mul_div255_u8(u16::from(src[i]), op);
        let dc = mul_div255_u8(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(u16::from(sc), u16::from(dc));
    }
    out
}

/// Composite `src` over `dst` with the given blend mode and opacity.
pub(crate) fn blend_px(
    dst: PremulRgba8,
    src: PremulRgba8,
    mode: BlendMode,
    opacity: f32,
) -> PremulRgba8 {
    if mode == BlendMode::SourceOver {
        return over(dst, src, opacity);
    }

    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let sa = (f32::from(src[3]) / 255.0) * opacity;
    let ba = f32::from(dst[3]) / 255.0;

    // Unpremultiply into straight [0,1] channels; a zero-alpha side
    // contributes black, which the mixing rule then weights to nothing.
    let unp = |p: PremulRgba8| -> [f32; 3] {
        if p[3] == 0 {
            return [0.0; 3];
        }
        let a = f32::from(p[3]);
        [
            (f32::from(p[0]) / a).min(1.0),
            (f32::from(p[1]) / a).min(1.0),
            (f32::from(p[2]) / a).min(1.0),
        ]
    };
    let cs = unp(src);
    let cb = unp(dst);

    let blended = [
        blend_channel(mode, cb[0], cs[0]),
        blend_channel(mode, cb[1], cs[1]),
        blend_channel(mode, cb[2], cs[2]),
    ];

    let ao = sa + ba * (1.0 - sa);
    let mut out = [0u8; 4];
    out[3] = ((ao * 255.0).round()).clamp(0.0, 255.0) as u8;
    for i in 0..3 {
        // W3C compositing: mix source, blended and backdrop by coverage,
        // already in premultiplied form.
        let co = sa * (1.0 - ba) * cs[i] + sa * ba * blended[i] + (1.0 - sa) * ba * cb[i];
        out[i] = ((co * 255.0).round()).clamp(0.0, 255.0) as u8;
    }
    out
}

fn blend_channel(mode: BlendMode, cb: f32, cs: f32) -> f32 {
    match mode {
        BlendMode::SourceOver => cs,
        BlendMode::Multiply => cb * cs,
        BlendMode::Screen => cb + cs - cb * cs,
        BlendMode::Overlay => {
            if cb <= 0.5 {
                2.0 * cb * cs
            } else {
                1.0 - 2.0 * (1.0 - cb) * (1.0 - cs)
            }
        }
        BlendMode::Darken => cb.min(cs),
        BlendMode::Lighten => cb.max(cs),
        BlendMode::Difference => (cb - cs).abs(),
        BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
    }
}

/// Bilinear sample of a premultiplied RGBA8 buffer at fractional `(sx, sy)`.
///
/// Neighbors are edge-clamped; callers guarantee `(sx, sy)` is inside the
/// source rectangle.
fn sample_bilinear(src: &[u8], sw: u32, sh: u32, sx: f64, sy: f64) -> PremulRgba8 {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = (sx - x0) as f32;
    let fy = (sy - y0) as f32;

    let xi0 = (x0 as i64).clamp(0, i64::from(sw) - 1) as usize;
    let yi0 = (y0 as i64).clamp(0, i64::from(sh) - 1) as usize;
    let xi1 = (xi0 + 1).min(sw as usize - 1);
    let yi1 = (yi0 + 1).min(sh as usize - 1);

    let px = |x: usize, y: usize| -> [f32; 4] {
        let i = (y * sw as usize + x) * 4;
        [
            f32::from(src[i]),
            f32::from(src[i + 1]),
            f32::from(src[i + 2]),
            f32::from(src[i + 3]),
        ]
    };

    let p00 = px(xi0, yi0);
    let p10 = px(xi1, yi0);
    let p01 = px(xi0, yi1);
    let p11 = px(xi1, yi1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] + (p10[c] - p00[c]) * fx;
        let bot = p01[c] + (p11[c] - p01[c]) * fx;
        let v = top + (bot - top) * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn clipped_bbox(dst: &Surface, transform: Affine, w: f64, h: f64) -> Option<(u32, u32, u32, u32)> {
    let corners = [
        transform * Point::new(0.0, 0.0),
        transform * Point::new(w, 0.0),
        transform * Point::new(w, h),
        transform * Point::new(0.0, h),
    ];
    let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = corners
        .iter()
        .map(|p| p.x)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = corners
        .iter()
        .map(|p| p.y)
        .fold(f64::NEG_INFINITY, f64::max);

    if !min_x.is_finite() || !max_x.is_finite() || max_x < 0.0 || max_y < 0.0 {
        return None;
    }
    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil() as i64).clamp(0, i64::from(dst.width)) as u32;
    let y1 = (max_y.ceil() as i64).clamp(0, i64::from(dst.height)) as u32;
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0, y0, x1, y1))
}

/// Draw a premultiplied RGBA8 source buffer through `transform`
/// (source space → surface space) with bilinear sampling.
pub(crate) fn draw_image_affine(
    dst: &mut Surface,
    src: &[u8],
    sw: u32,
    sh: u32,
    transform: Affine,
    mode: BlendMode,
    opacity: f32,
) {
    if sw == 0 || sh == 0 || src.len() < sw as usize * sh as usize * 4 {
        return;
    }
    let Some((x0, y0, x1, y1)) = clipped_bbox(dst, transform, f64::from(sw), f64::from(sh)) else {
        return;
    };
    let inv = transform.inverse();

    for y in y0..y1 {
        for x in x0..x1 {
            let p = inv * Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            // Sample at pixel centers; the half-texel shift keeps the image
            // aligned with the mapped rectangle.
            let sx = p.x - 0.5;
            let sy = p.y - 0.5;
            if p.x < 0.0 || p.y < 0.0 || p.x >= f64::from(sw) || p.y >= f64::from(sh) {
                continue;
            }
            let s = sample_bilinear(src, sw, sh, sx.max(0.0), sy.max(0.0));
            let d = dst.pixel(x, y);
            dst.put_pixel(x, y, blend_px(d, s, mode, opacity));
        }
    }
}

/// Fill the transformed `w x h` rectangle with a premultiplied color.
pub(crate) fn fill_quad_affine(
    dst: &mut Surface,
    w: f64,
    h: f64,
    transform: Affine,
    color: PremulRgba8,
    mode: BlendMode,
    opacity: f32,
) {
    if w <= 0.0 || h <= 0.0 {
        return;
    }
    let Some((x0, y0, x1, y1)) = clipped_bbox(dst, transform, w, h) else {
        return;
    };
    let inv = transform.inverse();

    for y in y0..y1 {
        for x in x0..x1 {
            let p = inv * Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
            if p.x < 0.0 || p.y < 0.0 || p.x >= w || p.y >= h {
                continue;
            }
            let d = dst.pixel(x, y);
            dst.put_pixel(x, y, blend_px(d, color, mode, opacity));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Rgba8;

    #[test]
    fn over_opaque_replaces() {
        let out = over([10, 20, 30, 255], [200, 100, 50, 255], 1.0);
        assert_eq!(out, [200, 100, 50, 255]);
    }

    #[test]
    fn over_transparent_source_keeps_dst() {
        let out = over([10, 20, 30, 255], [0, 0, 0, 0], 1.0);
        assert_eq!(out, [10, 20, 30, 255]);
    }

    #[test]
    fn over_half_opacity_mixes() {
        let out = over([0, 0, 0, 255], [255, 255, 255, 255], 0.5);
        // 50% white over black lands near mid grey.
        assert!(out[0] >= 126 && out[0] <= 129, "got {}", out[0]);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn multiply_darkens() {
        let dst = [200, 200, 200, 255];
        let src = [128, 128, 128, 255];
        let out = blend_px(dst, src, BlendMode::Multiply, 1.0);
        assert!(out[0] < 128, "multiply must darken, got {}", out[0]);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn screen_lightens() {
        let dst = [100, 100, 100, 255];
        let src = [100, 100, 100, 255];
        let out = blend_px(dst, src, BlendMode::Screen, 1.0);
        assert!(out[0] > 100, "screen must lighten, got {}", out[0]);
    }

    #[test]
    fn draw_image_identity_places_pixels() {
        let mut dst = Surface::new(4, 4);
        dst.clear(Rgba8::BLACK);
        // 2x2 opaque white source drawn at the origin.
        let src = vec![255u8; 2 * 2 * 4];
        draw_image_affine(
            &mut dst,
            &src,
            2,
            2,
            Affine::IDENTITY,
            BlendMode::SourceOver,
            1.0,
        );
        assert_eq!(dst.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(dst.pixel(1, 1), [255, 255, 255, 255]);
        assert_eq!(dst.pixel(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn fill_quad_translated() {
        let mut dst = Surface::new(4, 4);
        dst.clear(Rgba8::BLACK);
        fill_quad_affine(
            &mut dst,
            2.0,
            2.0,
            Affine::translate((2.0, 2.0)),
            [255, 0, 0, 255],
            BlendMode::SourceOver,
            1.0,
        );
        assert_eq!(dst.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(dst.pixel(2, 2), [255, 0, 0, 255]);
        assert_eq!(dst.pixel(3, 3), [255, 0, 0, 255]);
    }
}
