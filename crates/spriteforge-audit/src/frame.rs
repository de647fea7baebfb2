//! Owned RGBA8 frame buffer and pixel-mask geometry.
//!
//! All metrics operate on raw RGBA bytes; the `image` crate is confined to
//! the PNG codec boundary. "Opaque" throughout this crate means alpha ≥ 128
//! unless a metric defines its own cut (the alpha-artifact scan does).

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::AuditError;

/// Alpha at or above which a pixel belongs to the sprite mask.
pub const OPAQUE_ALPHA: u8 = 128;

/// An RGBA8 image with row-major pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuf {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// One palette fingerprint entry: a color and its opaque-pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PaletteEntry {
    pub rgb: [u8; 3],
    pub count: u32,
}

impl FrameBuf {
    /// Fully transparent buffer.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    /// Wrap raw RGBA bytes. Length must be `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, AuditError> {
        let expected = (width as usize) * (height as usize) * 4;
        if data.len() != expected {
            return Err(AuditError::InvalidContext(format!(
                "RGBA buffer length {} does not match {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode a PNG into an RGBA buffer, converting other color types.
    ///
    /// Gate checks that care about the *source* color depth must use
    /// [`crate::gates`], which inspects the file before conversion.
    pub fn load_png(path: &Path) -> Result<Self, AuditError> {
        let img = image::open(path)?.into_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            data: img.into_raw(),
        })
    }

    /// Encode as 32-bit RGBA PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let img: image::RgbaImage =
            image::ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                .expect("buffer length matches dimensions by construction");
        img.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = ((y * self.width + x) * 4) as usize;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    #[inline]
    #[must_use]
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.data[((y * self.width + x) * 4 + 3) as usize]
    }

    #[inline]
    #[must_use]
    pub fn is_opaque(&self, x: u32, y: u32) -> bool {
        self.alpha(x, y) >= OPAQUE_ALPHA
    }

    /// True if any pixel has alpha above zero.
    #[must_use]
    pub fn has_any_visible_pixel(&self) -> bool {
        self.data.chunks_exact(4).any(|p| p[3] > 0)
    }

    #[must_use]
    pub fn count_opaque(&self) -> u32 {
        self.data
            .chunks_exact(4)
            .filter(|p| p[3] >= OPAQUE_ALPHA)
            .count() as u32
    }

    /// Bottom-most row containing an opaque pixel: the sprite baseline.
    #[must_use]
    pub fn baseline_row(&self) -> Option<u32> {
        (0..self.height)
            .rev()
            .find(|&y| (0..self.width).any(|x| self.is_opaque(x, y)))
    }

    /// Inclusive opaque bounding box `(x0, y0, x1, y1)`.
    #[must_use]
    pub fn opaque_bbox(&self) -> Option<(u32, u32, u32, u32)> {
        let (mut x0, mut y0, mut x1, mut y1) = (self.width, self.height, 0u32, 0u32);
        let mut any = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_opaque(x, y) {
                    any = true;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                }
            }
        }
        any.then_some((x0, y0, x1, y1))
    }

    /// Centroid of opaque pixels in the bottom `root_zone_ratio` of the
    /// opaque mask: the contact patch the sprite stands on.
    #[must_use]
    pub fn root_zone_centroid(&self, root_zone_ratio: f64) -> Option<(f64, f64)> {
        let (_, y0, _, y1) = self.opaque_bbox()?;
        let mask_height = (y1 - y0 + 1) as f64;
        let zone_rows = (mask_height * root_zone_ratio).ceil().max(1.0) as u32;
        let zone_top = y1.saturating_sub(zone_rows - 1);

        let (mut sum_x, mut sum_y, mut n) = (0f64, 0f64, 0u64);
        for y in zone_top..=y1 {
            for x in 0..self.width {
                if self.is_opaque(x, y) {
                    sum_x += f64::from(x);
                    sum_y += f64::from(y);
                    n += 1;
                }
            }
        }
        (n > 0).then(|| (sum_x / n as f64, sum_y / n as f64))
    }

    /// Opaque-pixel color histogram, most frequent first, capped at `top_n`.
    #[must_use]
    pub fn palette_fingerprint(&self, top_n: usize) -> Vec<PaletteEntry> {
        let mut counts: BTreeMap<[u8; 3], u32> = BTreeMap::new();
        for p in self.data.chunks_exact(4) {
            if p[3] >= OPAQUE_ALPHA {
                *counts.entry([p[0], p[1], p[2]]).or_insert(0) += 1;
            }
        }
        let mut entries: Vec<PaletteEntry> = counts
            .into_iter()
            .map(|(rgb, count)| PaletteEntry { rgb, count })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.rgb.cmp(&b.rgb)));
        entries.truncate(top_n);
        entries
    }

    /// Translate by `(dx, dy)` with transparent fill outside the source.
    #[must_use]
    pub fn translated(&self, dx: i64, dy: i64) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let sx = i64::from(x) - dx;
                let sy = i64::from(y) - dy;
                if sx >= 0 && sy >= 0 && (sx as u32) < self.width && (sy as u32) < self.height {
                    out.set_pixel(x, y, self.pixel(sx as u32, sy as u32));
                }
            }
        }
        out
    }

    /// Nearest-neighbor resample to `size × size`. No smoothing: pixel-art
    /// edges must stay hard.
    #[must_use]
    pub fn resample_nearest(&self, size: u32) -> Self {
        let mut out = Self::new(size, size);
        let sx = f64::from(self.width) / f64::from(size);
        let sy = f64::from(self.height) / f64::from(size);
        for y in 0..size {
            for x in 0..size {
                let src_x = ((f64::from(x) + 0.5) * sx) as u32;
                let src_y = ((f64::from(y) + 0.5) * sy) as u32;
                out.set_pixel(
                    x,
                    y,
                    self.pixel(src_x.min(self.width - 1), src_y.min(self.height - 1)),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8x8 buffer with an opaque 4x3 block whose bottom edge is row 6.
    fn block_sprite() -> FrameBuf {
        let mut buf = FrameBuf::new(8, 8);
        for y in 4..=6 {
            for x in 2..=5 {
                buf.set_pixel(x, y, [200, 100, 50, 255]);
            }
        }
        buf
    }

    #[test]
    fn baseline_is_bottom_opaque_row() {
        assert_eq!(block_sprite().baseline_row(), Some(6));
        assert_eq!(FrameBuf::new(4, 4).baseline_row(), None);
    }

    #[test]
    fn bbox_bounds_the_block() {
        assert_eq!(block_sprite().opaque_bbox(), Some((2, 4, 5, 6)));
    }

    #[test]
    fn root_zone_centroid_sits_on_bottom_band() {
        // ratio 0.34 of a 3-row mask is a 2-row band: rows 5 and 6.
        let (cx, cy) = block_sprite().root_zone_centroid(0.34).unwrap();
        assert!((cx - 3.5).abs() < 1e-9);
        assert!((cy - 5.5).abs() < 1e-9);
    }

    #[test]
    fn translation_fills_transparent() {
        let moved = block_sprite().translated(2, 0);
        assert_eq!(moved.opaque_bbox(), Some((4, 4, 7, 6)));
        assert_eq!(moved.alpha(0, 4), 0);
    }

    #[test]
    fn translation_off_canvas_clips() {
        let moved = block_sprite().translated(-6, 0);
        assert_eq!(moved.count_opaque(), 0);
    }

    #[test]
    fn nearest_resample_halves_cleanly() {
        let mut buf = FrameBuf::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                let c = if x < 2 { 0 } else { 255 };
                buf.set_pixel(x, y, [c, c, c, 255]);
            }
        }
        let half = buf.resample_nearest(2);
        assert_eq!(half.pixel(0, 0)[0], 0);
        assert_eq!(half.pixel(1, 0)[0], 255);
    }

    #[test]
    fn palette_fingerprint_sorted_by_count() {
        let mut buf = FrameBuf::new(4, 1);
        buf.set_pixel(0, 0, [1, 1, 1, 255]);
        buf.set_pixel(1, 0, [2, 2, 2, 255]);
        buf.set_pixel(2, 0, [2, 2, 2, 255]);
        buf.set_pixel(3, 0, [3, 3, 3, 20]); // below mask cut
        let fp = buf.palette_fingerprint(8);
        assert_eq!(fp.len(), 2);
        assert_eq!(fp[0].rgb, [2, 2, 2]);
        assert_eq!(fp[0].count, 2);
    }
}
