//! Progress-driven transitions: fade, slide, wipe.
//!
//! Each transition owns a `[start, start + duration)` window on the timeline
//! and resolves its progress from the frame timestamp. Outside the window the
//! clamped progress makes the transition a no-op.

use crate::effects::{FrameProcessor, ProcessorKind, progress};
use crate::foundation::error::ReelResult;
use crate::render::{Surface, premultiply};
use crate::timeline::ExportSettings;

/// Fade direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeMode {
    /// Background to content over the window.
    In,
    /// Content to background over the window.
    Out,
    /// Dip through the background at the window midpoint.
    Cross,
}

/// Blend of the surface toward the background color by progress.
pub struct Fade {
    mode: FadeMode,
    start: f64,
    duration: f64,
}

impl Fade {
    /// Build a fade over `[start, start + duration)`.
    pub fn new(mode: FadeMode, start: f64, duration: f64) -> Self {
        Self {
            mode,
            start,
            duration,
        }
    }
}

impl FrameProcessor for Fade {
    fn id(&self) -> &str {
        match self.mode {
            FadeMode::In => "fade_in",
            FadeMode::Out => "fade_out",
            FadeMode::Cross => "fade_cross",
        }
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Transition
    }

    fn process(
        &mut self,
        surface: &mut Surface,
        settings: &ExportSettings,
        t: f64,
    ) -> ReelResult<()> {
        let p = progress(t, self.start, self.duration);
        let gain = match self.mode {
            FadeMode::In => p,
            FadeMode::Out => 1.0 - p,
            FadeMode::Cross => (2.0 * p - 1.0).abs(),
        };
        if gain >= 1.0 {
            return Ok(());
        }

        let bg = premultiply(settings.background);
        for px in surface.data.chunks_exact_mut(4) {
            for c in 0..4 {
                let v = f32::from(px[c]) * gain + f32::from(bg[c]) * (1.0 - gain);
                px[c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(())
    }
}

/// Slide-in direction (where the content travels toward its place from).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlideDir {
    /// Content moves leftward into place.
    Left,
    /// Content moves rightward into place.
    Right,
    /// Content moves upward into place.
    Up,
    /// Content moves downward into place.
    Down,
}

/// Translate the whole surface into place over the window; vacated pixels
/// take the background color.
pub struct Slide {
    dir: SlideDir,
    start: f64,
    duration: f64,
    scratch: Vec<u8>,
}

impl Slide {
    /// Build a slide over `[start, start + duration)`.
    pub fn new(dir: SlideDir, start: f64, duration: f64) -> Self {
        Self {
            dir,
            start,
            duration,
            scratch: Vec::new(),
        }
    }
}

impl FrameProcessor for Slide {
    fn id(&self) -> &str {
        match self.dir {
            SlideDir::Left => "slide_left",
            SlideDir::Right => "slide_right",
            SlideDir::Up => "slide_up",
            SlideDir::Down => "slide_down",
        }
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Transition
    }

    fn process(
        &mut self,
        surface: &mut Surface,
        settings: &ExportSettings,
        t: f64,
    ) -> ReelResult<()> {
        let p = progress(t, self.start, self.duration);
        if p >= 1.0 {
            return Ok(());
        }

        let w = surface.width as i64;
        let h = surface.height as i64;
        let remaining = f64::from(1.0 - p);
        let (dx, dy) = match self.dir {
            SlideDir::Left => ((remaining * w as f64).round() as i64, 0),
            SlideDir::Right => (-(remaining * w as f64).round() as i64, 0),
            SlideDir::Up => (0, (remaining * h as f64).round() as i64),
            SlideDir::Down => (0, -(remaining * h as f64).round() as i64),
        };

        if self.scratch.len() != surface.data.len() {
            self.scratch = vec![0u8; surface.data.len()];
        }
        self.scratch.copy_from_slice(&surface.data);

        let bg = premultiply(settings.background);
        let row = w as usize * 4;
        for y in 0..h {
            for x in 0..w {
                let sx = x - dx;
                let sy = y - dy;
                let i = y as usize * row + x as usize * 4;
                let px = if sx >= 0 && sx < w && sy >= 0 && sy < h {
                    let j = sy as usize * row + sx as usize * 4;
                    [
                        self.scratch[j],
                        self.scratch[j + 1],
                        self.scratch[j + 2],
                        self.scratch[j + 3],
                    ]
                } else {
                    bg
                };
                surface.data[i..i + 4].copy_from_slice(&px);
            }
        }
        Ok(())
    }
}

/// Wipe axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WipeAxis {
    /// Reveal sweeps left to right.
    Horizontal,
    /// Reveal sweeps top to bottom.
    Vertical,
}

/// Reveal the surface along an axis; unrevealed pixels take the background.
pub struct Wipe {
    axis: WipeAxis,
    start: f64,
    duration: f64,
}

impl Wipe {
    /// Build a wipe over `[start, start + duration)`.
    pub fn new(axis: WipeAxis, start: f64, duration: f64) -> Self {
        Self {
            axis,
            start,
            duration,
        }
    }
}

impl FrameProcessor for Wipe {
    fn id(&self) -> &str {
        match self.axis {
            WipeAxis::Horizontal => "wipe_horizontal",
            WipeAxis::Vertical => "wipe_vertical",
        }
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Transition
    }

    fn process(
        &mut self,
        surface: &mut Surface,
        settings: &ExportSettings,
        t: f64,
    ) -> ReelResult<()> {
        let p = progress(t, self.start, self.duration);
        if p >= 1.0 {
            return Ok(());
        }

        let bg = premultiply(settings.background);
        let (w, h) = (surface.width, surface.height);
        let edge = match self.axis {
            WipeAxis::Horizontal => (f64::from(p) * f64::from(w)).round() as u32,
            WipeAxis::Vertical => (f64::from(p) * f64::from(h)).round() as u32,
        };

        for y in 0..h {
            for x in 0..w {
                let beyond = match self.axis {
                    WipeAxis::Horizontal => x >= edge,
                    WipeAxis::Vertical => y >= edge,
                };
                if beyond {
                    surface.put_pixel(x, y, bg);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Rgba8;

    fn settings() -> ExportSettings {
        ExportSettings {
            width: 8,
            height: 8,
            fps: 30,
            background: Rgba8::BLACK,
            ..Default::default()
        }
    }

    fn white_surface() -> Surface {
        let mut s = Surface::new(8, 8);
        s.clear(Rgba8::WHITE);
        s
    }

    #[test]
    fn fade_in_starts_at_background_and_ends_at_content() {
        let mut fade = Fade::new(FadeMode::In, 0.0, 1.0);

        let mut s = white_surface();
        fade.process(&mut s, &settings(), 0.0).unwrap();
        assert_eq!(s.pixel(4, 4), [0, 0, 0, 255]);

        let mut s = white_surface();
        fade.process(&mut s, &settings(), 1.0).unwrap();
        assert_eq!(s.pixel(4, 4), [255, 255, 255, 255]);

        let mut s = white_surface();
        fade.process(&mut s, &settings(), 0.5).unwrap();
        let mid = s.pixel(4, 4)[0];
        assert!((120..=135).contains(&mid), "got {mid}");
    }

    #[test]
    fn fade_cross_dips_at_midpoint() {
        let mut fade = Fade::new(FadeMode::Cross, 0.0, 2.0);
        let mut s = white_surface();
        fade.process(&mut s, &settings(), 1.0).unwrap();
        assert_eq!(s.pixel(4, 4), [0, 0, 0, 255]);

        let mut s = white_surface();
        fade.process(&mut s, &settings(), 2.0).unwrap();
        assert_eq!(s.pixel(4, 4), [255, 255, 255, 255]);
    }

    #[test]
    fn slide_left_at_half_progress_shows_half_content() {
        let mut slide = Slide::new(SlideDir::Left, 0.0, 1.0);
        let mut s = white_surface();
        slide.process(&mut s, &settings(), 0.5).unwrap();
        // Content shifted right by half: left half is background.
        assert_eq!(s.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(s.pixel(7, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn slide_is_identity_after_the_window() {
        let mut slide = Slide::new(SlideDir::Down, 0.0, 1.0);
        let mut s = white_surface();
        slide.process(&mut s, &settings(), 5.0).unwrap();
        assert_eq!(s.pixel(0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn wipe_horizontal_reveals_left_first() {
        let mut wipe = Wipe::new(WipeAxis::Horizontal, 0.0, 1.0);
        let mut s = white_surface();
        wipe.process(&mut s, &settings(), 0.5).unwrap();
        assert_eq!(s.pixel(1, 4), [255, 255, 255, 255]);
        assert_eq!(s.pixel(6, 4), [0, 0, 0, 255]);
    }

    #[test]
    fn wipe_vertical_reveals_top_first() {
        let mut wipe = Wipe::new(WipeAxis::Vertical, 0.0, 1.0);
        let mut s = white_surface();
        wipe.process(&mut s, &settings(), 0.25).unwrap();
        assert_eq!(s.pixel(4, 1), [255, 255, 255, 255]);
        assert_eq!(s.pixel(4, 6), [0, 0, 0, 255]);
    }
}
