use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};

use crate::pose::{Keypoints, Point2};
use crate::render::skeleton::{
    self, Overlay, LINE_THICKNESS, MARKER_FILL, MARKER_OUTLINE, MARKER_RADIUS,
};

/// 背景色 (RGB)
pub const BACKGROUND: u32 = 0x000000;

/// 0RGB ピクセルバッファ（minifb と同じ形式）
pub struct OverlayCanvas {
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl OverlayCanvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            buffer: vec![BACKGROUND; width * height],
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn buffer(&self) -> &[u32] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.fill(BACKGROUND);
    }

    /// 前回の描画を破棄し、キーポイントから描き直す
    ///
    /// 描画した骨格を返す。キーポイントが無ければ `None`。
    pub fn render(&mut self, keypoints: &Keypoints) -> Option<Overlay> {
        self.clear();
        let overlay = skeleton::project(keypoints, self.width as u32, self.height as u32)?;
        self.draw_overlay(&overlay);
        Some(overlay)
    }

    /// 骨格線 → キーポイントの順に描画
    ///
    /// キャンバス外の部分は描画前に切り落とす。
    pub fn draw_overlay(&mut self, overlay: &Overlay) {
        for segment in &overlay.segments {
            let Some((start, end)) = self.clip(segment.start, segment.end) else {
                continue;
            };
            let (x0, y0) = to_pixel(start);
            let (x1, y1) = to_pixel(end);
            self.draw_thick_line(x0, y0, x1, y1, LINE_THICKNESS as i64, segment.limb.color());
        }

        for (_, point) in &overlay.markers {
            if !self.near_canvas(*point) {
                continue;
            }
            let (x, y) = to_pixel(*point);
            self.draw_circle(x, y, MARKER_RADIUS as i64, MARKER_OUTLINE);
            self.draw_circle(x, y, MARKER_RADIUS as i64 - 1, MARKER_FILL);
        }
    }

    /// 描画対象とみなす範囲（キャンバス＋ブラシ半径分の余白）
    fn bounds(&self) -> (f64, f64, f64, f64) {
        let margin = (MARKER_RADIUS + LINE_THICKNESS) as f64;
        (
            -margin,
            -margin,
            self.width as f64 + margin,
            self.height as f64 + margin,
        )
    }

    fn near_canvas(&self, p: Point2) -> bool {
        let (x_min, y_min, x_max, y_max) = self.bounds();
        (x_min..=x_max).contains(&p.x) && (y_min..=y_max).contains(&p.y)
    }

    /// Liang-Barsky で線分を描画範囲に切り詰める。完全に外なら `None`
    fn clip(&self, a: Point2, b: Point2) -> Option<(Point2, Point2)> {
        let (x_min, y_min, x_max, y_max) = self.bounds();
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let mut t0 = 0.0_f64;
        let mut t1 = 1.0_f64;

        for (p, q) in [
            (-dx, a.x - x_min),
            (dx, x_max - a.x),
            (-dy, a.y - y_min),
            (dy, y_max - a.y),
        ] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }

        let at = |t: f64| Point2::new(a.x + t * dx, a.y + t * dy);
        Some((at(t0), at(t1)))
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x < self.width && y < self.height {
            Some(self.buffer[y * self.width + x])
        } else {
            None
        }
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let px = self.buffer[y as usize * self.width + x as usize];
            Rgba([(px >> 16) as u8, (px >> 8) as u8, px as u8, 0xFF])
        })
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.to_rgba_image()
            .save(path)
            .with_context(|| format!("failed to write overlay to {}", path.display()))
    }

    /// 太さ付きの線（ブラシ状に円を並べる）
    fn draw_thick_line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, thickness: i64, color: u32) {
        let r = thickness / 2;
        self.walk_line(x0, y0, x1, y1, |canvas, x, y| {
            canvas.draw_circle(x, y, r, color);
        });
    }

    /// Bresenhamのアルゴリズムで線上の各点を訪れる
    fn walk_line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, mut plot: impl FnMut(&mut Self, i64, i64)) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            plot(self, x, y);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 円を描画（塗りつぶし）
    fn draw_circle(&mut self, cx: i64, cy: i64, radius: i64, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// ピクセルをセット（境界チェック付き）
    fn set_pixel(&mut self, x: i64, y: i64, color: u32) {
        if x >= 0 && x < self.width as i64 && y >= 0 && y < self.height as i64 {
            self.buffer[y as usize * self.width + x as usize] = color;
        }
    }
}

fn to_pixel(p: Point2) -> (i64, i64) {
    (p.x.round() as i64, p.y.round() as i64)
}
