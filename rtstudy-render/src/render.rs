use ab_glyph::{point, Font, FontVec, Glyph, PxScale, ScaleFont};
use anyhow::{bail, Context, Result};
use bytemuck::{cast_slice, cast_slice_mut};
use rtstudy_core::{StimulusColor, StudyPhase};
use rtstudy_experiment::StudyView;
use rtstudy_timing::{HighPrecisionTimer, Timer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tiny_skia::{Color, Paint, Pixmap, Rect, Transform};
use tracing::{debug, warn};

const START_PROMPT: &str = "Drücke die Leertaste, um zu starten.";
const QUESTIONNAIRE_PROMPT: &str = "Bitte fülle jetzt den Fragebogen im Terminal aus.";
const DONE_MESSAGE: &str = "Vielen Dank für deine Teilnahme!";

const TEXT_PX: f32 = 28.0;
const COUNTDOWN_PX: f32 = 120.0;
const LABEL_PX: f32 = 20.0;
const BAR_HEIGHT: f32 = 12.0;
const PROGRESS_HEIGHT: f32 = 6.0;
const MARGIN: f32 = 24.0;

const DARK_INK: [u8; 4] = [20, 20, 20, 255];
const LIGHT_INK: [u8; 4] = [255, 255, 255, 255];

pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontVec> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
    FontVec::try_from_vec(bytes).with_context(|| format!("parsing font {}", path.display()))
}

/// Rasterizes one line of text into a tightly cropped, premultiplied pixmap.
/// Returns `None` when nothing in `text` has an outline.
pub fn render_text_pixmap<F: Font>(
    text: &str,
    font_size: f32,
    font: &F,
    color: [u8; 4],
) -> Option<Pixmap> {
    let scale = PxScale::from(font_size);
    let sf = font.as_scaled(scale);

    // Layout with baseline at ascent
    let mut pen_x = 0.0f32;
    let mut glyphs = Vec::<Glyph>::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = glyphs.last() {
            pen_x += sf.kern(prev.id, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, sf.ascent()),
        });
        pen_x += sf.h_advance(id);
    }

    let outlines: Vec<_> = glyphs
        .into_iter()
        .filter_map(|g| font.outline_glyph(g))
        .collect();
    if outlines.is_empty() {
        return None;
    }

    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for out in &outlines {
        let b = out.px_bounds();
        min_x = min_x.min(b.min.x);
        min_y = min_y.min(b.min.y);
        max_x = max_x.max(b.max.x);
        max_y = max_y.max(b.max.y);
    }

    let w = (max_x.ceil() - min_x.floor()).max(1.0) as u32;
    let h = (max_y.ceil() - min_y.floor()).max(1.0) as u32;
    let mut pm = Pixmap::new(w, h)?;
    let stride = w as usize;
    let dst: &mut [[u8; 4]] = cast_slice_mut(pm.data_mut());

    for out in &outlines {
        let b = out.px_bounds();
        out.draw(|x, y, cov| {
            if cov <= f32::EPSILON {
                return;
            }
            let ix = (x as f32 + b.min.x - min_x).floor() as i32;
            let iy = (y as f32 + b.min.y - min_y).floor() as i32;
            if ix < 0 || iy < 0 || ix >= w as i32 || iy >= h as i32 {
                return;
            }

            // Premultiply by coverage, then source-over onto what is already there
            let a = (cov * color[3] as f32 / 255.0).clamp(0.0, 1.0);
            let src = [
                (color[0] as f32 * a) as u8,
                (color[1] as f32 * a) as u8,
                (color[2] as f32 * a) as u8,
                (a * 255.0) as u8,
            ];
            let px = &mut dst[iy as usize * stride + ix as usize];
            *px = over(src, *px);
        });
    }

    Some(pm)
}

/// Premultiplied source-over.
fn over(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let inv = 255 - src[3] as u32;
    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (src[c] as u32 + (dst[c] as u32 * inv + 127) / 255).min(255) as u8;
    }
    out
}

/// Centers `src` on `center`, clipping at the canvas edges.
fn blit(canvas: &mut Pixmap, src: &Pixmap, center: (f32, f32)) {
    let (w, h) = (src.width() as i32, src.height() as i32);
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);

    let x = (center.0 - w as f32 * 0.5) as i32;
    let y = (center.1 - h as f32 * 0.5) as i32;
    if x + w <= 0 || y + h <= 0 || x >= cw || y >= ch {
        return;
    }

    let dst_x = x.max(0);
    let dst_y = y.max(0);
    let src_x = dst_x - x;
    let src_y = dst_y - y;
    let copy_w = (w - src_x).min(cw - dst_x) as usize;
    let copy_h = (h - src_y).min(ch - dst_y) as usize;

    let src_px: &[[u8; 4]] = cast_slice(src.data());
    let dst_px: &mut [[u8; 4]] = cast_slice_mut(canvas.data_mut());
    for row in 0..copy_h {
        let s0 = (src_y as usize + row) * w as usize + src_x as usize;
        let d0 = (dst_y as usize + row) * cw as usize + dst_x as usize;
        for i in 0..copy_w {
            let s = src_px[s0 + i];
            match s[3] {
                0 => {}
                255 => dst_px[d0 + i] = s,
                _ => dst_px[d0 + i] = over(s, dst_px[d0 + i]),
            }
        }
    }
}

/// Text and bar color that stays readable on `background`.
fn ink_for(background: StimulusColor) -> [u8; 4] {
    if background.is_light() {
        DARK_INK
    } else {
        LIGHT_INK
    }
}

struct TextCache {
    font: FontVec,
    map: HashMap<(String, u32, [u8; 4]), Arc<Pixmap>>,
}

impl TextCache {
    fn new(font: FontVec) -> Self {
        Self {
            font,
            map: HashMap::new(),
        }
    }

    fn get_or_render(&mut self, text: &str, size_px: f32, color: [u8; 4]) -> Option<Arc<Pixmap>> {
        let key = (text.to_owned(), size_px.to_bits(), color);
        if let Some(p) = self.map.get(&key) {
            return Some(Arc::clone(p));
        }
        let pm = Arc::new(render_text_pixmap(text, size_px, &self.font, color)?);
        self.map.insert(key, Arc::clone(&pm));
        Some(pm)
    }

    fn line_width(&self, text: &str, size_px: f32) -> f32 {
        let sf = self.font.as_scaled(PxScale::from(size_px));
        text.chars().map(|c| sf.h_advance(sf.glyph_id(c))).sum()
    }

    /// Greedy word wrap; a single overlong word gets a line of its own.
    fn wrap(&self, text: &str, size_px: f32, max_width: f32) -> Vec<String> {
        let mut lines = Vec::new();
        let mut line = String::new();
        for word in text.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_owned()
            } else {
                format!("{line} {word}")
            };
            if !line.is_empty() && self.line_width(&candidate, size_px) > max_width {
                lines.push(std::mem::replace(&mut line, word.to_owned()));
            } else {
                line = candidate;
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
        lines
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    pub draw: Duration,
    pub copy: Duration,
    pub total: Duration,
}

/// Software renderer for [`StudyView`]s into an RGBA8 frame buffer.
pub struct SkiaRenderer {
    width: u32,
    height: u32,
    canvas: Pixmap,
    text: Option<TextCache>,
}

impl SkiaRenderer {
    pub fn new(width: u32, height: u32, font: Option<FontVec>) -> Result<Self> {
        let canvas = Pixmap::new(width.max(1), height.max(1)).context("allocating canvas")?;
        if font.is_none() {
            warn!("No font loaded; only colors and bars will be drawn");
        }
        Ok(Self {
            width: canvas.width(),
            height: canvas.height(),
            canvas,
            text: font.map(TextCache::new),
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.canvas = Pixmap::new(width.max(1), height.max(1)).context("resizing canvas")?;
        self.width = self.canvas.width();
        self.height = self.canvas.height();
        debug!("Canvas resized to {}x{}", self.width, self.height);
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn render_frame(
        &mut self,
        view: &StudyView,
        frame_buffer: &mut [u8],
        timer: &mut HighPrecisionTimer,
    ) -> Result<FrameStats> {
        let t = timer.now();
        self.draw(view);
        let draw = timer.elapsed(t);

        let t = timer.now();
        let src = self.canvas.data();
        if frame_buffer.len() != src.len() {
            bail!(
                "frame buffer holds {} bytes, canvas {}x{} needs {}",
                frame_buffer.len(),
                self.width,
                self.height,
                src.len()
            );
        }
        // Canvas is always opaque, so premultiplied equals straight RGBA.
        frame_buffer.copy_from_slice(src);
        let copy = timer.elapsed(t);

        let total = draw + copy;
        timer.record_frame(total);
        Ok(FrameStats { draw, copy, total })
    }

    fn draw(&mut self, view: &StudyView) {
        let [r, g, b, a] = view.background.rgba();
        self.canvas.fill(Color::from_rgba8(r, g, b, a));

        let ink = ink_for(view.background);
        let (w, h) = (self.width as f32, self.height as f32);

        match view.phase {
            StudyPhase::StartScreen => self.draw_text_block(START_PROMPT, TEXT_PX, h * 0.5, ink),
            StudyPhase::Countdown => {
                if let Some(text) = view.instruction {
                    self.draw_text_block(text, TEXT_PX, h * 0.3, ink);
                }
                let remaining = view.countdown_remaining.to_string();
                self.draw_text_block(&remaining, COUNTDOWN_PX, h * 0.6, ink);
                self.fill_bar(
                    MARGIN,
                    h - MARGIN - BAR_HEIGHT,
                    (w - 2.0 * MARGIN) * view.countdown_fraction(),
                    BAR_HEIGHT,
                    ink,
                );
            }
            StudyPhase::Trial => {
                if let Some(text) = view.instruction {
                    self.draw_text_block(text, TEXT_PX, h * 0.3, ink);
                }
            }
            StudyPhase::Pause => {
                if let Some(text) = view.instruction {
                    self.draw_text_block(text, TEXT_PX, h * 0.5, ink);
                }
            }
            StudyPhase::Questionnaire => {
                self.draw_text_block(QUESTIONNAIRE_PROMPT, TEXT_PX, h * 0.5, ink)
            }
            StudyPhase::Done => self.draw_text_block(DONE_MESSAGE, TEXT_PX, h * 0.5, ink),
        }

        if view.phase != StudyPhase::StartScreen {
            self.fill_bar(0.0, 0.0, w * view.progress_fraction(), PROGRESS_HEIGHT, ink);
        }
        if matches!(view.phase, StudyPhase::Countdown | StudyPhase::Pause) {
            let label = format!("Durchgang {}/{}", view.trial_number, view.trial_total);
            self.draw_text_line(&label, LABEL_PX, (w - 4.0 * MARGIN, 2.0 * MARGIN), ink);
        }
    }

    fn fill_bar(&mut self, x: f32, y: f32, width: f32, height: f32, color: [u8; 4]) {
        if width < 1.0 {
            return;
        }
        let Some(rect) = Rect::from_xywh(x, y, width, height) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
        self.canvas.fill_rect(rect, &paint, Transform::identity(), None);
    }

    fn draw_text_line(&mut self, text: &str, size_px: f32, center: (f32, f32), ink: [u8; 4]) {
        let Some(cache) = self.text.as_mut() else {
            return;
        };
        if let Some(pm) = cache.get_or_render(text, size_px, ink) {
            blit(&mut self.canvas, &pm, center);
        }
    }

    /// Wrapped, horizontally centered paragraph around `center_y`.
    fn draw_text_block(&mut self, text: &str, size_px: f32, center_y: f32, ink: [u8; 4]) {
        let Some(cache) = self.text.as_mut() else {
            return;
        };
        let w = self.width as f32;
        let lines = cache.wrap(text, size_px, w - 4.0 * MARGIN);
        let line_height = size_px * 1.3;
        let mut y = center_y - line_height * (lines.len() as f32 - 1.0) * 0.5;
        for line in &lines {
            if let Some(pm) = cache.get_or_render(line, size_px, ink) {
                blit(&mut self.canvas, &pm, (w * 0.5, y));
            }
            y += line_height;
        }
    }
}
