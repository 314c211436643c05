//! Template matching on greyscale frames.
//!
//! Scores are normalized cross-correlation coefficients (mean-subtracted,
//! variance-normalized), so 1.0 is a pixel-perfect match regardless of
//! overall brightness. Large frames are searched on a box-downscaled copy
//! first and the best candidates refined at full resolution. The template is
//! downscaled once per sub-block phase so that an anchor sitting at any pixel
//! offset lines up exactly with the frame's blocks under one of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::error::ConfigError;
use crate::types::{AnchorRef, Detection, Frame};

/// Coarse candidates refined at full resolution.
const REFINE_CANDIDATES: usize = 16;
/// Smallest template side kept after downscaling.
const MIN_COARSE_SIDE: u32 = 8;
const MAX_SCALE: u32 = 4;

/// Locates anchors on a frame.
pub trait Matcher: Send {
    /// `Ok(None)` is a miss. An anchor that cannot be loaded is a
    /// configuration defect and is never retried.
    fn locate(&mut self, frame: &Frame, anchor: &AnchorRef) -> Result<Option<Detection>, ConfigError>;
}

/// Greyscale plane with precomputed statistics.
struct Plane {
    w: u32,
    h: u32,
    px: Vec<f64>,
}

impl Plane {
    fn from_gray(img: &GrayImage) -> Self {
        Self { w: img.width(), h: img.height(), px: img.pixels().map(|p| p.0[0] as f64).collect() }
    }

    /// Box-average down by `s`.
    fn downscale(&self, s: u32) -> Self {
        if s <= 1 {
            return Self { w: self.w, h: self.h, px: self.px.clone() };
        }
        let (w, h) = (self.w / s, self.h / s);
        let area = (s * s) as f64;
        let mut px = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0.0;
                for dy in 0..s {
                    let row = ((y * s + dy) * self.w) as usize;
                    for dx in 0..s {
                        sum += self.px[row + (x * s + dx) as usize];
                    }
                }
                px.push(sum / area);
            }
        }
        Self { w, h, px }
    }

    /// Everything right of `ox` and below `oy`.
    fn crop(&self, ox: u32, oy: u32) -> Self {
        let (w, h) = (self.w - ox, self.h - oy);
        let mut px = Vec::with_capacity((w * h) as usize);
        for y in oy..self.h {
            let row = (y * self.w) as usize;
            px.extend_from_slice(&self.px[row + ox as usize..row + self.w as usize]);
        }
        Self { w, h, px }
    }

    fn at(&self, x: u32, y: u32) -> f64 {
        self.px[(y * self.w + x) as usize]
    }
}

/// Summed-area tables for window sums and sums of squares.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(p: &Plane) -> Self {
        let stride = p.w as usize + 1;
        let mut sum = vec![0.0; stride * (p.h as usize + 1)];
        let mut sq = sum.clone();
        for y in 0..p.h as usize {
            let (mut row_sum, mut row_sq) = (0.0, 0.0);
            for x in 0..p.w as usize {
                let v = p.px[y * p.w as usize + x];
                row_sum += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, table: &[f64], x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x0, y0, x1, y1) = (x as usize, y as usize, (x + w) as usize, (y + h) as usize);
        table[y1 * self.stride + x1] - table[y0 * self.stride + x1] - table[y1 * self.stride + x0]
            + table[y0 * self.stride + x0]
    }
}

/// Mean-centered template.
struct Centered {
    w: u32,
    h: u32,
    px: Vec<f64>,
    norm: f64,
}

impl Centered {
    fn new(p: &Plane) -> Option<Self> {
        let n = p.px.len() as f64;
        let mean = p.px.iter().sum::<f64>() / n;
        let px: Vec<f64> = p.px.iter().map(|v| v - mean).collect();
        let norm = px.iter().map(|v| v * v).sum::<f64>();
        (norm > f64::EPSILON).then_some(Self { w: p.w, h: p.h, px, norm })
    }
}

fn score_at(frame: &Plane, integral: &Integral, t: &Centered, x: u32, y: u32) -> f64 {
    let n = (t.w * t.h) as f64;
    let sum = integral.window(&integral.sum, x, y, t.w, t.h);
    let sq = integral.window(&integral.sq, x, y, t.w, t.h);
    let var = sq - sum * sum / n;
    if var <= f64::EPSILON {
        return 0.0;
    }
    let mut cross = 0.0;
    for ty in 0..t.h {
        let row = (ty * t.w) as usize;
        for tx in 0..t.w {
            cross += t.px[row + tx as usize] * frame.at(x + tx, y + ty);
        }
    }
    cross / (t.norm * var).sqrt()
}

fn best_in(
    frame: &Plane,
    integral: &Integral,
    t: &Centered,
    xs: std::ops::RangeInclusive<u32>,
    ys: std::ops::RangeInclusive<u32>,
) -> (f64, u32, u32) {
    let mut best = (f64::MIN, 0, 0);
    for y in ys {
        for x in xs.clone() {
            let s = score_at(frame, integral, t, x, y);
            if s > best.0 {
                best = (s, x, y);
            }
        }
    }
    best
}

/// Template downscaled after dropping its first `ox` columns and `oy` rows.
struct Phase {
    ox: u32,
    oy: u32,
    t: Centered,
}

/// A loaded anchor, ready to search with.
pub struct Template {
    full: Centered,
    scale: u32,
    phases: Vec<Phase>,
}

impl Template {
    /// `None` when the image has no contrast at all and cannot be correlated.
    pub fn new(img: &GrayImage) -> Option<Self> {
        let plane = Plane::from_gray(img);
        let full = Centered::new(&plane)?;
        let scale = (img.width().min(img.height()) / MIN_COARSE_SIDE).clamp(1, MAX_SCALE);
        let mut phases = Vec::new();
        if scale > 1 {
            for oy in 0..scale {
                for ox in 0..scale {
                    if let Some(t) = Centered::new(&plane.crop(ox, oy).downscale(scale)) {
                        phases.push(Phase { ox, oy, t });
                    }
                }
            }
        }
        Some(Self { full, scale, phases })
    }

    pub fn width(&self) -> u32 {
        self.full.w
    }

    pub fn height(&self) -> u32 {
        self.full.h
    }

    /// Full-resolution top-left corners worth refining, best coarse score first.
    fn coarse_candidates(&self, plane: &Plane, max_x: u32, max_y: u32) -> Vec<(f64, u32, u32)> {
        let s = self.scale;
        let small = plane.downscale(s);
        let small_integral = Integral::new(&small);
        let mut candidates = Vec::new();
        for phase in &self.phases {
            let t = &phase.t;
            if t.w > small.w || t.h > small.h {
                continue;
            }
            for cy in 0..=small.h - t.h {
                let Some(fy) = (cy * s).checked_sub(phase.oy).filter(|fy| *fy <= max_y) else {
                    continue;
                };
                for cx in 0..=small.w - t.w {
                    let Some(fx) = (cx * s).checked_sub(phase.ox).filter(|fx| *fx <= max_x) else {
                        continue;
                    };
                    candidates.push((score_at(&small, &small_integral, t, cx, cy), fx, fy));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(REFINE_CANDIDATES);
        candidates
    }

    /// Best match on `frame` scoring at least `threshold`.
    pub fn find(&self, frame: &GrayImage, threshold: f32) -> Option<Detection> {
        let (tw, th) = (self.full.w, self.full.h);
        if tw > frame.width() || th > frame.height() {
            return None;
        }
        let plane = Plane::from_gray(frame);
        let integral = Integral::new(&plane);
        let (max_x, max_y) = (plane.w - tw, plane.h - th);

        let (score, x, y) = if self.phases.is_empty() {
            best_in(&plane, &integral, &self.full, 0..=max_x, 0..=max_y)
        } else {
            let mut best = (f64::MIN, 0, 0);
            for (_, fx, fy) in self.coarse_candidates(&plane, max_x, max_y) {
                let xs = fx.saturating_sub(1)..=(fx + 1).min(max_x);
                let ys = fy.saturating_sub(1)..=(fy + 1).min(max_y);
                let found = best_in(&plane, &integral, &self.full, xs, ys);
                if found.0 > best.0 {
                    best = found;
                }
            }
            best
        };

        (score >= threshold as f64).then_some(Detection {
            x: x as i32,
            y: y as i32,
            width: tw,
            height: th,
            confidence: score as f32,
        })
    }
}

/// Matches anchors loaded from `<root>/<task>/<file>`, cached after first use.
pub struct TemplateMatcher {
    root: PathBuf,
    threshold: f32,
    cache: HashMap<AnchorRef, Template>,
}

impl TemplateMatcher {
    pub fn new(root: impl Into<PathBuf>, threshold: f32) -> Self {
        Self { root: root.into(), threshold, cache: HashMap::new() }
    }

    pub fn anchor_path(&self, anchor: &AnchorRef) -> PathBuf {
        self.root.join(&anchor.task).join(&anchor.file)
    }

    fn load(path: &Path) -> Result<Template, ConfigError> {
        let img = image::open(path).map_err(|e| ConfigError::Anchor { path: path.to_path_buf(), reason: e.to_string() })?;
        Template::new(&img.to_luma8())
            .ok_or_else(|| ConfigError::Anchor { path: path.to_path_buf(), reason: "image has no contrast".into() })
    }
}

impl Matcher for TemplateMatcher {
    fn locate(&mut self, frame: &Frame, anchor: &AnchorRef) -> Result<Option<Detection>, ConfigError> {
        if !self.cache.contains_key(anchor) {
            let template = Self::load(&self.anchor_path(anchor))?;
            self.cache.insert(anchor.clone(), template);
        }
        Ok(self.cache.get(anchor).and_then(|t| t.find(&frame.image, self.threshold)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{imageops, Luma};

    // Smooth but non-repeating texture, like a rendered UI.
    fn scene(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let (fx, fy) = (x as f64, y as f64);
            let v = 128.0 + 60.0 * (fx / 13.0).sin() * (fy / 7.0).cos() + 50.0 * ((fx + 2.0 * fy) / 29.0).sin();
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn finds_cropped_region() {
        let frame = scene(320, 200);
        let template = imageops::crop_imm(&frame, 120, 64, 40, 32).to_image();
        let t = Template::new(&template).unwrap();
        let d = t.find(&frame, 0.8).unwrap();
        assert_eq!((d.x, d.y, d.width, d.height), (120, 64, 40, 32));
        assert!(d.confidence > 0.99);
    }

    #[test]
    fn finds_unaligned_region() {
        let frame = scene(320, 200);
        let template = imageops::crop_imm(&frame, 201, 37, 36, 28).to_image();
        let d = Template::new(&template).unwrap().find(&frame, 0.8).unwrap();
        assert_eq!((d.x, d.y), (201, 37));
    }

    #[test]
    fn finds_crops_at_every_sub_block_offset() {
        let frame = scene(320, 200);
        for (w, h) in [(36, 28), (33, 41)] {
            for (x, y) in [(13, 150), (97, 5), (250, 121), (1, 2), (122, 63)] {
                let template = imageops::crop_imm(&frame, x, y, w, h).to_image();
                let d = Template::new(&template).unwrap().find(&frame, 0.8).unwrap();
                assert_eq!((d.x, d.y), (x as i32, y as i32), "{}x{} crop at ({}, {})", w, h, x, y);
                assert!(d.confidence > 0.99);
            }
        }
    }

    #[test]
    fn flat_frame_never_matches() {
        let template = imageops::crop_imm(&scene(64, 64), 0, 0, 24, 24).to_image();
        let t = Template::new(&template).unwrap();
        assert!(t.find(&GrayImage::new(200, 100), 0.8).is_none());
        assert!(t.find(&GrayImage::new(10, 10), 0.8).is_none());
    }

    #[test]
    fn flat_template_is_rejected() {
        assert!(Template::new(&GrayImage::from_pixel(20, 20, Luma([90]))).is_none());
    }

    #[test]
    fn matcher_loads_and_reports_anchors() {
        let tmp = tempfile::tempdir().unwrap();
        let frame = scene(240, 160);
        std::fs::create_dir_all(tmp.path().join("t")).unwrap();
        imageops::crop_imm(&frame, 50, 40, 30, 20).to_image().save(tmp.path().join("t/a.png")).unwrap();

        let mut m = TemplateMatcher::new(tmp.path(), 0.8);
        let d = m.locate(&Frame::new(frame), &AnchorRef::new("t", "a.png")).unwrap().unwrap();
        assert_eq!((d.x, d.y), (50, 40));

        let err = m.locate(&Frame::blank(10, 10), &AnchorRef::new("t", "missing.png")).unwrap_err();
        assert!(matches!(err, ConfigError::Anchor { .. }));
    }
}
