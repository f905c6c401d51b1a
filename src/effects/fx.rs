//! Time-independent built-in effects: blur, brightness, color filter.

use crate::effects::{FrameProcessor, ProcessorKind};
use crate::foundation::error::{ReelError, ReelResult};
use crate::render::Surface;
use crate::timeline::ExportSettings;

/// Separable gaussian blur with a fixed-point Q16 kernel.
pub struct Blur {
    radius: u32,
    sigma: f32,
    kernel: Vec<u32>,
    tmp: Vec<u8>,
}

impl Blur {
    /// Build a blur with the given radius (pixels) and sigma.
    pub fn new(radius: u32, sigma: f32) -> Self {
        Self {
            radius,
            sigma,
            kernel: Vec::new(),
            tmp: Vec::new(),
        }
    }
}

impl FrameProcessor for Blur {
    fn id(&self) -> &str {
        "blur"
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
        if self.radius == 0 {
            return Ok(());
        }
        if self.kernel.is_empty() {
            self.kernel = gaussian_kernel_q16(self.radius, self.sigma)?;
        }
        let len = surface.data.len();
        if self.tmp.len() != len {
            self.tmp = vec![0u8; len];
        }

        let w = surface.width;
        let h = surface.height;
        horizontal_pass(&surface.data, &mut self.tmp, w, h, &self.kernel);
        // The vertical pass writes back into the surface, reusing it as the
        // second buffer.
        vertical_pass(&self.tmp, &mut surface.data, w, h, &self.kernel);
        Ok(())
    }
}

fn gaussian_kernel_q16(radius: u32, sigma: f32) -> ReelResult<Vec<u32>> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(ReelError::validation("blur sigma must be > 0"));
    }

    let r = radius as i32;
    let sigma = f64::from(sigma);
    let denom = 2.0 * sigma * sigma;
    let mut weights_f = Vec::<f64>::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    for i in -r..=r {
        let x = f64::from(i);
        let w = (-x * x / denom).exp();
        weights_f.push(w);
        sum += w;
    }

    let mut weights = Vec::<u32>::with_capacity(weights_f.len());
    let mut acc: i64 = 0;
    for &wf in &weights_f {
        let q = (((wf / sum) * 65536.0).round() as i64).clamp(0, 65536);
        weights.push(q as u32);
        acc += q;
    }
    // Push the rounding residue into the center tap so the kernel sums to
    // exactly one in Q16.
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        weights[mid] = (i64::from(weights[mid]) + delta).clamp(0, 65536) as u32;
    }
    Ok(weights)
}

fn horizontal_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    for y in 0..height as i32 {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let sx = (x + ki as i32 - radius).clamp(0, w - 1);
                let idx = ((y * w + sx) as usize) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                dst[out + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn vertical_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    let h = height as i32;
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (ki, &kw) in k.iter().enumerate() {
                let sy = (y + ki as i32 - radius).clamp(0, h - 1);
                let idx = ((sy * w + x) as usize) * 4;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out = ((y * w + x) as usize) * 4;
            for c in 0..4 {
                dst[out + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    ((acc + (1 << 15)) >> 16).min(255) as u8
}

/// Linear brightness adjustment; `amount` in `[-1, 1]`.
pub struct Brightness {
    amount: f32,
}

impl Brightness {
    /// `amount` > 0 brightens, < 0 darkens.
    pub fn new(amount: f32) -> Self {
        Self {
            amount: amount.clamp(-1.0, 1.0),
        }
    }
}

impl FrameProcessor for Brightness {
    fn id(&self) -> &str {
        "brightness"
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
        let factor = 1.0 + self.amount;
        for px in surface.data.chunks_exact_mut(4) {
            let a = px[3];
            if a == 0 {
                continue;
            }
            for c in px.iter_mut().take(3) {
                // Premultiplied channels stay bounded by alpha.
                *c = ((f32::from(*c) * factor).round() as i32).clamp(0, i32::from(a)) as u8;
            }
        }
        Ok(())
    }
}

/// Hue / saturation / brightness color filter.
pub struct ColorFilter {
    hue_deg: f32,
    saturation: f32,
    brightness: f32,
}

impl ColorFilter {
    /// Hue rotation in degrees, saturation and brightness as multipliers.
    pub fn new(hue_deg: f32, saturation: f32, brightness: f32) -> Self {
        Self {
            hue_deg,
            saturation: saturation.max(0.0),
            brightness: brightness.max(0.0),
        }
    }
}

impl FrameProcessor for ColorFilter {
    fn id(&self) -> &str {
        "color_filter"
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
        let m = hue_rotation_matrix(self.hue_deg.to_radians());
        let sat = self.saturation;
        let bri = self.brightness;

        for px in surface.data.chunks_exact_mut(4) {
            let a = f32::from(px[3]);
            if a == 0.0 {
                continue;
            }
            // Unpremultiply, adjust in straight space, re-premultiply.
            let r = f32::from(px[0]) / a;
            let g = f32::from(px[1]) / a;
            let b = f32::from(px[2]) / a;

            let hr = m[0] * r + m[1] * g + m[2] * b;
            let hg = m[3] * r + m[4] * g + m[5] * b;
            let hb = m[6] * r + m[7] * g + m[8] * b;

            let luma = 0.2126 * hr + 0.7152 * hg + 0.0722 * hb;
            let sr = luma + (hr - luma) * sat;
            let sg = luma + (hg - luma) * sat;
            let sb = luma + (hb - luma) * sat;

            px[0] = ((sr * bri).clamp(0.0, 1.0) * a).round() as u8;
            px[1] = ((sg * bri).clamp(0.0, 1.0) * a).round() as u8;
            px[2] = ((sb * bri).clamp(0.0, 1.0) * a).round() as u8;
        }
        Ok(())
    }
}

fn hue_rotation_matrix(rad: f32) -> [f32; 9] {
    let c = rad.cos();
    let s = rad.sin();
    [
        0.213 + 0.787 * c - 0.213 * s,
        0.715 - 0.715 * c - 0.715 * s,
        0.072 - 0.072 * c + 0.928 * s,
        0.213 - 0.213 * c + 0.143 * s,
        0.715 + 0.285 * c + 0.140 * s,
        0.072 - 0.072 * c - 0.283 * s,
        0.213 - 0.213 * c - 0.787 * s,
        0.715 - 0.715 * c + 0.715 * s,
        0.072 + 0.928 * c + 0.072 * s,
    ]
}
