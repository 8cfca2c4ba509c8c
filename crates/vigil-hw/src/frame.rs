//! Pixel conversion and low-light enhancement.

use image::RgbImage;
use vigil_core::Enhancer;

/// Convert packed YUYV (4:2:2) to interleaved RGB (BT.601, limited range).
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

/// Replicate an 8-bit grayscale buffer into RGB.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&p| [p, p, p]).collect())
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let to_u8 = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        to_u8(c + 1.596 * e),
        to_u8(c - 0.392 * d - 0.813 * e),
        to_u8(c + 2.017 * d),
    ]
}

/// BT.601 luma of an RGB pixel.
fn luma(p: &[u8; 3]) -> u8 {
    (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Contrast-limited adaptive histogram equalization on the luma channel.
///
/// Chroma is preserved by scaling each RGB pixel by the luma gain.
#[derive(Debug, Clone, Copy)]
pub struct ClaheEnhancer {
    /// Tiles per side of the square grid.
    pub tiles: u32,
    /// Histogram clip limit, as a multiple of the mean bin height.
    pub clip_limit: f32,
}

impl Default for ClaheEnhancer {
    fn default() -> Self {
        Self {
            tiles: 8,
            clip_limit: 3.0,
        }
    }
}

impl Enhancer for ClaheEnhancer {
    fn enhance(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let original: Vec<u8> = image.pixels().map(|p| luma(&p.0)).collect();
        let mut equalized = original.clone();
        clahe(&mut equalized, width, height, self.tiles, self.clip_limit);

        let mut out = image.clone();
        for ((pixel, &before), &after) in out.pixels_mut().zip(&original).zip(&equalized) {
            if before == 0 {
                pixel.0 = [after, after, after];
                continue;
            }
            let gain = after as f32 / before as f32;
            for c in pixel.0.iter_mut() {
                *c = (*c as f32 * gain).round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

/// Clipped, normalized CDF for one tile's histogram.
fn tile_cdf(hist: &mut [u32; 256], tile_pixels: usize, clip_limit: f32) -> [f32; 256] {
    let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut cdf = [0f32; 256];
    let mut running = 0f32;
    for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
        running += count as f32;
        *slot = running;
    }
    let cdf_min = cdf.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let denom = tile_pixels as f32 - cdf_min;
    if denom > 0.0 {
        for v in cdf.iter_mut() {
            *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        }
    }
    cdf
}

/// Equalize a single-channel plane in place with bilinear blending
/// between neighbouring tile mappings.
fn clahe(plane: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let (w, h, t) = (width as usize, height as usize, tiles.max(1) as usize);
    if w == 0 || h == 0 || plane.len() < w * h {
        return;
    }
    let (tile_w, tile_h) = (w / t, h / t);
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let cdfs: Vec<[f32; 256]> = (0..t * t)
        .map(|idx| {
            let (row, col) = (idx / t, idx % t);
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for &p in &plane[y * w + col * tile_w..y * w + (col + 1) * tile_w] {
                    hist[p as usize] += 1;
                }
            }
            tile_cdf(&mut hist, tile_w * tile_h, clip_limit)
        })
        .collect();

    let last = (t - 1) as f32;
    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, last);
        let (r0, dy) = (fy as usize, fy.fract());
        let r1 = (r0 + 1).min(t - 1);
        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, last);
            let (c0, dx) = (fx as usize, fx.fract());
            let c1 = (c0 + 1).min(t - 1);

            let v = plane[y * w + x] as usize;
            let top = cdfs[r0 * t + c0][v] * (1.0 - dx) + cdfs[r0 * t + c1][v] * dx;
            let bottom = cdfs[r1 * t + c0][v] * (1.0 - dx) + cdfs[r1 * t + c1][v] * dx;
            plane[y * w + x] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
