//! Pixel kernels on interleaved 8-bit buffers.
//!
//! Every function takes `(data, width, height, channels)` describing a
//! row-major interleaved buffer and returns a new buffer of the same shape
//! unless stated otherwise. Rows are processed in parallel with rayon.
//! Callers guarantee `data.len() == width * height * channels`; an empty
//! buffer yields an empty result.

use rayon::prelude::*;

/// Round and saturate to the 0–255 range.
#[inline]
pub fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// ITU-R BT.601 luma in 14-bit fixed point.
#[inline]
pub fn luma_bt601(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
}

/// Luma plane of an RGB buffer.
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.par_chunks(3)
        .map(|px| luma_bt601(px[0], px[1], px[2]))
        .collect()
}

pub fn apply_lut(data: &mut [u8], lut: &[u8; 256]) {
    data.par_iter_mut().for_each(|v| *v = lut[*v as usize]);
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge.
#[inline]
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    (if m >= n { period - m } else { m }) as usize
}

#[inline]
fn clamp_index(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

// =============================================================================
// Linear filters
// =============================================================================

/// 3×3 convolution with replicated borders.
pub fn convolve3x3(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    kernel: &[f32; 9],
) -> Vec<u8> {
    let stride = width * channels;
    let mut out = vec![0u8; data.len()];
    if out.is_empty() {
        return out;
    }
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for x in 0..width {
            for ch in 0..channels {
                let mut acc = 0.0f32;
                for ky in 0..3 {
                    let sy = clamp_index(y as isize + ky as isize - 1, height);
                    for kx in 0..3 {
                        let sx = clamp_index(x as isize + kx as isize - 1, width);
                        acc += kernel[ky * 3 + kx] * data[sy * stride + sx * channels + ch] as f32;
                    }
                }
                row[x * channels + ch] = saturate(acc);
            }
        }
    });
    out
}

/// Normalized 1-D Gaussian weights for an odd `ksize`.
pub fn gaussian_kernel(ksize: u32, sigma: f64) -> Vec<f32> {
    let r = (ksize / 2) as i64;
    let weights: Vec<f64> = (-r..=r)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// The sigma a Gaussian of size `ksize` gets when none is given.
pub fn sigma_for_kernel(ksize: u32) -> f64 {
    0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Separable Gaussian blur with reflected borders.
pub fn gaussian_blur(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    ksize: u32,
    sigma: f64,
) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let kernel = gaussian_kernel(ksize, sigma);
    let r = (ksize / 2) as isize;
    let stride = width * channels;

    let mut horizontal = vec![0.0f32; data.len()];
    horizontal
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let src = &data[y * stride..(y + 1) * stride];
            for x in 0..width {
                for ch in 0..channels {
                    let mut acc = 0.0f32;
                    for (i, w) in kernel.iter().enumerate() {
                        let sx = reflect101(x as isize + i as isize - r, width);
                        acc += w * src[sx * channels + ch] as f32;
                    }
                    row[x * channels + ch] = acc;
                }
            }
        });

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for (i, slot) in row.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (k, w) in kernel.iter().enumerate() {
                let sy = reflect101(y as isize + k as isize - r, height);
                acc += w * horizontal[sy * stride + i];
            }
            *slot = saturate(acc);
        }
    });
    out
}

/// `v + strength * (v - gaussian(v))` with sigma 3.
pub fn unsharp_mask(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    strength: f32,
) -> Vec<u8> {
    const SIGMA: f64 = 3.0;
    // Kernel size OpenCV derives for an 8-bit image from sigma alone.
    let ksize = ((SIGMA * 6.0 + 1.0).round() as u32) | 1;
    let blurred = gaussian_blur(data, width, height, channels, ksize, SIGMA);
    data.par_iter()
        .zip(blurred.par_iter())
        .map(|(&v, &b)| saturate(v as f32 + strength * (v as f32 - b as f32)))
        .collect()
}

// =============================================================================
// Edges
// =============================================================================

/// Canny edge detector on a single-channel buffer. Returns 255 on edges.
pub fn canny(gray: &[u8], width: usize, height: usize, low: i32, high: i32) -> Vec<u8> {
    if gray.is_empty() {
        return Vec::new();
    }
    let at = |x: isize, y: isize| -> i32 {
        gray[clamp_index(y, height) * width + clamp_index(x, width)] as i32
    };

    let mut gx = vec![0i32; gray.len()];
    let mut gy = vec![0i32; gray.len()];
    gx.par_chunks_mut(width)
        .zip(gy.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (rx, ry))| {
            let y = y as isize;
            for x in 0..width {
                let xi = x as isize;
                let (tl, tc, tr) = (at(xi - 1, y - 1), at(xi, y - 1), at(xi + 1, y - 1));
                let (ml, mr) = (at(xi - 1, y), at(xi + 1, y));
                let (bl, bc, br) = (at(xi - 1, y + 1), at(xi, y + 1), at(xi + 1, y + 1));
                rx[x] = (tr + 2 * mr + br) - (tl + 2 * ml + bl);
                ry[x] = (bl + 2 * bc + br) - (tl + 2 * tc + tr);
            }
        });
    let magnitude: Vec<i32> = gx
        .par_iter()
        .zip(gy.par_iter())
        .map(|(a, b)| a.abs() + b.abs())
        .collect();

    let mag = |x: isize, y: isize| -> i32 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0
        } else {
            magnitude[y as usize * width + x as usize]
        }
    };

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut marks = vec![0u8; gray.len()];
    marks.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let yi = y as isize;
        for (x, mark) in row.iter_mut().enumerate() {
            let i = y * width + x;
            let m = magnitude[i];
            if m <= low {
                continue;
            }
            let xi = x as isize;
            let (ax, ay) = (gx[i].abs() as i64, gy[i].abs() as i64);
            // tan(22.5°) in Q15
            let tg22 = ax * 13573 >> 15;
            let tg67 = tg22 + (ax << 1);
            let is_max = if ay < tg22 {
                m > mag(xi - 1, yi) && m >= mag(xi + 1, yi)
            } else if ay > tg67 {
                m > mag(xi, yi - 1) && m >= mag(xi, yi + 1)
            } else {
                let s = if (gx[i] ^ gy[i]) < 0 { -1 } else { 1 };
                m > mag(xi - s, yi - 1) && m > mag(xi + s, yi + 1)
            };
            if is_max {
                *mark = if m > high { 2 } else { 1 };
            }
        }
    });

    let mut stack: Vec<usize> = marks
        .iter()
        .enumerate()
        .filter(|(_, m)| **m == 2)
        .map(|(i, _)| i)
        .collect();
    while let Some(i) = stack.pop() {
        let (x, y) = ((i % width) as isize, (i / width) as isize);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let n = ny as usize * width + nx as usize;
                if marks[n] == 1 {
                    marks[n] = 2;
                    stack.push(n);
                }
            }
        }
    }

    marks
        .into_par_iter()
        .map(|m| if m == 2 { 255 } else { 0 })
        .collect()
}

// =============================================================================
// Geometry
// =============================================================================

/// Rotate counter-clockwise by `degrees` about the image centre, keeping the
/// canvas size. Uncovered pixels are black.
pub fn rotate_about_center(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    degrees: f64,
) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let radians = degrees.to_radians();
    let (a, b) = (radians.cos(), radians.sin());
    let (cx, cy) = ((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0);
    let stride = width * channels;

    let sample = |x: isize, y: isize, ch: usize| -> f64 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0.0
        } else {
            data[y as usize * stride + x as usize * channels + ch] as f64
        }
    };

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let dy = y as f64 - cy;
        for x in 0..width {
            let dx = x as f64 - cx;
            let sx = a * dx - b * dy + cx;
            let sy = b * dx + a * dy + cy;
            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = (sx - x0, sy - y0);
            let (x0, y0) = (x0 as isize, y0 as isize);
            for ch in 0..channels {
                let top = sample(x0, y0, ch) * (1.0 - fx) + sample(x0 + 1, y0, ch) * fx;
                let bottom = sample(x0, y0 + 1, ch) * (1.0 - fx) + sample(x0 + 1, y0 + 1, ch) * fx;
                row[x * channels + ch] = saturate((top * (1.0 - fy) + bottom * fy) as f32);
            }
        }
    });
    out
}

// =============================================================================
// Tone
// =============================================================================

/// Histogram equalization lookup for a single-channel buffer.
pub fn equalize_lut(gray: &[u8]) -> [u8; 256] {
    let mut hist = [0u64; 256];
    for &v in gray {
        hist[v as usize] += 1;
    }
    let total = gray.len() as u64;
    let mut lut = [0u8; 256];
    let Some(first) = hist.iter().position(|&c| c > 0) else {
        return lut;
    };
    if hist[first] == total {
        // Flat image: everything maps to its single value.
        lut.iter_mut().for_each(|v| *v = first as u8);
        return lut;
    }
    let scale = 255.0 / (total - hist[first]) as f64;
    let mut sum = 0u64;
    for (j, slot) in lut.iter_mut().enumerate().skip(first + 1) {
        sum += hist[j];
        *slot = (sum as f64 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Apply a new luma plane to an RGB buffer by shifting every channel by the
/// luma delta, which leaves the chroma of the YCbCr representation untouched.
pub fn remap_luma(rgb: &[u8], old_luma: &[u8], new_luma: &[u8]) -> Vec<u8> {
    let mut out = rgb.to_vec();
    out.par_chunks_mut(3)
        .zip(old_luma.par_iter().zip(new_luma.par_iter()))
        .for_each(|(px, (&old, &new))| {
            let delta = new as i32 - old as i32;
            for c in px.iter_mut() {
                *c = (*c as i32 + delta).clamp(0, 255) as u8;
            }
        });
    out
}

/// Stretch values so the global minimum maps to 0 and the maximum to 255.
/// A constant buffer becomes all zero.
pub fn stretch(data: &[u8]) -> Vec<u8> {
    let (Some(&min), Some(&max)) = (data.iter().min(), data.iter().max()) else {
        return Vec::new();
    };
    if min == max {
        return vec![0; data.len()];
    }
    let range = (max - min) as f32;
    data.par_iter()
        .map(|&v| saturate((v - min) as u32 as f32 * 255.0 / range))
        .collect()
}

pub fn sepia(rgb: &[u8]) -> Vec<u8> {
    rgb.par_chunks(3)
        .flat_map_iter(|px| {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            [
                saturate(0.393 * r + 0.769 * g + 0.189 * b),
                saturate(0.349 * r + 0.686 * g + 0.168 * b),
                saturate(0.272 * r + 0.534 * g + 0.131 * b),
            ]
        })
        .collect()
}

/// Contrast-limited adaptive histogram equalization on a single channel,
/// using an 8×8 tile grid and bilinear blending between tile lookups.
pub fn clahe(gray: &[u8], width: usize, height: usize, clip_limit: f64) -> Vec<u8> {
    const GRID: usize = 8;
    if gray.is_empty() {
        return Vec::new();
    }
    let tile_w = width.div_ceil(GRID);
    let tile_h = height.div_ceil(GRID);
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let luts: Vec<[u8; 256]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|t| {
            let (tx, ty) = (t % tiles_x, t / tiles_x);
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            let area = ((x1 - x0) * (y1 - y0)) as u64;

            let mut hist = [0u64; 256];
            for y in y0..y1 {
                for &v in &gray[y * width + x0..y * width + x1] {
                    hist[v as usize] += 1;
                }
            }

            let clip = ((clip_limit * area as f64 / 256.0) as u64).max(1);
            let mut excess = 0u64;
            for h in hist.iter_mut() {
                if *h > clip {
                    excess += *h - clip;
                    *h = clip;
                }
            }
            let batch = excess / 256;
            let mut residual = excess % 256;
            for h in hist.iter_mut() {
                *h += batch;
            }
            if residual > 0 {
                let step = (256 / residual as usize).max(1);
                let mut i = 0;
                while i < 256 && residual > 0 {
                    hist[i] += 1;
                    residual -= 1;
                    i += step;
                }
            }

            let scale = 255.0 / area as f64;
            let mut lut = [0u8; 256];
            let mut sum = 0u64;
            for (slot, &h) in lut.iter_mut().zip(hist.iter()) {
                sum += h;
                *slot = (sum as f64 * scale).round().min(255.0) as u8;
            }
            lut
        })
        .collect();

    let mut out = vec![0u8; gray.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let fy = (y as f64 + 0.5) / tile_h as f64 - 0.5;
        let ty1 = fy.floor();
        let ya = fy - ty1;
        let ty1 = ty1 as isize;
        let (ty1, ty2) = (clamp_index(ty1, tiles_y), clamp_index(ty1 + 1, tiles_y));
        for (x, slot) in row.iter_mut().enumerate() {
            let fx = (x as f64 + 0.5) / tile_w as f64 - 0.5;
            let tx1 = fx.floor();
            let xa = fx - tx1;
            let tx1 = tx1 as isize;
            let (tx1, tx2) = (clamp_index(tx1, tiles_x), clamp_index(tx1 + 1, tiles_x));
            let v = gray[y * width + x] as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f64 * (1.0 - xa)
                + luts[ty1 * tiles_x + tx2][v] as f64 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f64 * (1.0 - xa)
                + luts[ty2 * tiles_x + tx2][v] as f64 * xa;
            *slot = saturate((top * (1.0 - ya) + bottom * ya) as f32);
        }
    });
    out
}

// =============================================================================
// Rank filters
// =============================================================================

/// k×k median per channel with replicated borders, using a sliding
/// histogram along each row.
pub fn median(data: &[u8], width: usize, height: usize, channels: usize, ksize: u32) -> Vec<u8> {
    let stride = width * channels;
    let mut out = vec![0u8; data.len()];
    if out.is_empty() {
        return out;
    }
    let r = (ksize / 2) as isize;
    let half = (ksize as u64 * ksize as u64) / 2;

    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let rows: Vec<usize> = (-r..=r)
            .map(|d| clamp_index(y as isize + d, height))
            .collect();
        for ch in 0..channels {
            let column = |hist: &mut [u64; 256], x: isize, add: bool| {
                let cx = clamp_index(x, width);
                for &sy in &rows {
                    let v = data[sy * stride + cx * channels + ch] as usize;
                    if add {
                        hist[v] += 1;
                    } else {
                        hist[v] -= 1;
                    }
                }
            };
            let mut hist = [0u64; 256];
            for dx in -r..=r {
                column(&mut hist, dx, true);
            }
            for x in 0..width {
                if x > 0 {
                    column(&mut hist, x as isize - r - 1, false);
                    column(&mut hist, x as isize + r, true);
                }
                let mut seen = 0u64;
                let mut value = 255u8;
                for (v, &count) in hist.iter().enumerate() {
                    seen += count;
                    if seen > half {
                        value = v as u8;
                        break;
                    }
                }
                row[x * channels + ch] = value;
            }
        }
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Morphology {
    Dilate,
    Erode,
}

/// Rectangular k×k dilation or erosion per channel. The anchor sits at
/// `k / 2`; the window is clipped at the image bounds.
pub fn morphology(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    ksize: u32,
    op: Morphology,
) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let k = ksize as isize;
    let anchor = k / 2;
    let stride = width * channels;
    let pick = move |a: u8, b: u8| match op {
        Morphology::Dilate => a.max(b),
        Morphology::Erode => a.min(b),
    };
    let span = move |i: usize, n: usize| {
        let start = (i as isize - anchor).max(0) as usize;
        let end = ((i as isize - anchor + k - 1).min(n as isize - 1)) as usize;
        start..=end
    };

    let mut horizontal = vec![0u8; data.len()];
    horizontal
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let src = &data[y * stride..(y + 1) * stride];
            for x in 0..width {
                for ch in 0..channels {
                    let mut acc = src[x * channels + ch];
                    for sx in span(x, width) {
                        acc = pick(acc, src[sx * channels + ch]);
                    }
                    row[x * channels + ch] = acc;
                }
            }
        });

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for (i, slot) in row.iter_mut().enumerate() {
            let mut acc = horizontal[y * stride + i];
            for sy in span(y, height) {
                acc = pick(acc, horizontal[sy * stride + i]);
            }
            *slot = acc;
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Vec<u8> {
        (0..width * height)
            .map(|i| ((i % width) * 255 / (width - 1).max(1)) as u8)
            .collect()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn luma_weights() {
        assert_eq!(luma_bt601(0, 0, 0), 0);
        assert_eq!(luma_bt601(255, 255, 255), 255);
        assert_eq!(luma_bt601(255, 0, 0), 76);
        assert_eq!(luma_bt601(0, 255, 0), 150);
        assert_eq!(luma_bt601(0, 0, 255), 29);
    }

    #[test]
    fn reflect101_mirrors_without_repeating_edge() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-7, 2), 1);
        assert_eq!(reflect101(3, 1), 0);
    }

    #[test]
    fn empty_buffers_stay_empty() {
        assert!(convolve3x3(&[], 0, 0, 1, &[0.0; 9]).is_empty());
        assert!(gaussian_blur(&[], 0, 0, 3, 3, 0.8).is_empty());
        assert!(median(&[], 0, 0, 1, 3).is_empty());
        assert!(morphology(&[], 0, 0, 1, 3, Morphology::Dilate).is_empty());
        assert!(stretch(&[]).is_empty());
        assert!(canny(&[], 0, 0, 100, 200).is_empty());
    }

    // =========================================================================
    // Linear filters
    // =========================================================================

    #[test]
    fn identity_kernel_is_identity() {
        let data = ramp(7, 5);
        let id = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(convolve3x3(&data, 7, 5, 1, &id), data);
    }

    #[test]
    fn sharpen_keeps_flat_regions() {
        let data = vec![120u8; 16 * 3];
        let k = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
        assert_eq!(convolve3x3(&data, 4, 4, 3, &k), data);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(5, sigma_for_kernel(5));
        assert_eq!(k.len(), 5);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((k[0] - k[4]).abs() < 1e-7);
        assert!(k[2] > k[1] && k[1] > k[0]);
        assert_eq!(gaussian_kernel(1, sigma_for_kernel(1)), vec![1.0]);
    }

    #[test]
    fn blur_preserves_constant_and_smooths_step() {
        let flat = vec![77u8; 9 * 9];
        assert_eq!(gaussian_blur(&flat, 9, 9, 1, 5, 1.1), flat);

        let mut step = vec![0u8; 10];
        step[5..].fill(255);
        let out = gaussian_blur(&step, 10, 1, 1, 5, 1.1);
        assert!(out[4] > 0 && out[4] < 255);
        assert!(out[5] > 0 && out[5] < 255);
        assert_eq!(out[0], 0);
        assert_eq!(out[9], 255);
    }

    #[test]
    fn unsharp_zero_strength_is_identity() {
        let data = ramp(12, 6);
        assert_eq!(unsharp_mask(&data, 12, 6, 1, 0.0), data);
    }

    // =========================================================================
    // Edges
    // =========================================================================

    #[test]
    fn canny_finds_vertical_step() {
        let (w, h) = (20, 10);
        let data: Vec<u8> = (0..w * h).map(|i| if i % w < 10 { 0 } else { 255 }).collect();
        let edges = canny(&data, w, h, 100, 200);
        assert!(edges.iter().all(|&v| v == 0 || v == 255));
        let row = &edges[5 * w..6 * w];
        assert!(row[9] == 255 || row[10] == 255);
        assert_eq!(row[0], 0);
        assert_eq!(row[19], 0);
    }

    #[test]
    fn canny_flat_image_has_no_edges() {
        let edges = canny(&vec![128u8; 64], 8, 8, 100, 200);
        assert!(edges.iter().all(|&v| v == 0));
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    #[test]
    fn rotate_zero_is_identity() {
        let data = ramp(9, 7);
        assert_eq!(rotate_about_center(&data, 9, 7, 1, 0.0), data);
    }

    #[test]
    fn rotate_180_reverses_pixels() {
        let data: Vec<u8> = (0..12).map(|v| v * 10).collect();
        let out = rotate_about_center(&data, 4, 3, 1, 180.0);
        let reversed: Vec<u8> = data.iter().rev().copied().collect();
        assert_eq!(out, reversed);
    }

    #[test]
    fn rotate_90_is_counter_clockwise() {
        // 3×3 with a marker in the top-right corner ends up top-left.
        let mut data = vec![0u8; 9];
        data[2] = 200;
        let out = rotate_about_center(&data, 3, 3, 1, 90.0);
        assert_eq!(out[0], 200);
        assert_eq!(out[2], 0);
    }

    // =========================================================================
    // Tone
    // =========================================================================

    #[test]
    fn equalize_spreads_narrow_histogram() {
        let data: Vec<u8> = (0..100).map(|i| 100 + (i % 10) as u8).collect();
        let lut = equalize_lut(&data);
        assert_eq!(lut[100], 0);
        assert_eq!(lut[109], 255);
        let flat = equalize_lut(&[42; 10]);
        assert_eq!(flat[42], 42);
    }

    #[test]
    fn remap_luma_shifts_all_channels() {
        let out = remap_luma(&[10, 20, 30], &[20], &[25]);
        assert_eq!(out, vec![15, 25, 35]);
    }

    #[test]
    fn stretch_maps_range_to_full_scale() {
        assert_eq!(stretch(&[50, 100, 150]), vec![0, 128, 255]);
        assert_eq!(stretch(&[9, 9, 9]), vec![0, 0, 0]);
    }

    #[test]
    fn sepia_of_white_saturates() {
        assert_eq!(sepia(&[255, 255, 255]), vec![255, 255, 239]);
        assert_eq!(sepia(&[0, 0, 0]), vec![0, 0, 0]);
    }

    #[test]
    fn clahe_keeps_shape_and_flattens_constant() {
        let data = ramp(32, 24);
        let out = clahe(&data, 32, 24, 2.0);
        assert_eq!(out.len(), data.len());
        let flat = clahe(&vec![100u8; 16 * 16], 16, 16, 2.0);
        let first = flat[0];
        assert!(flat.iter().all(|&v| v == first));
    }

    #[test]
    fn clahe_handles_tiny_images() {
        let out = clahe(&[0, 255, 128], 3, 1, 2.0);
        assert_eq!(out.len(), 3);
    }

    // =========================================================================
    // Rank filters
    // =========================================================================

    #[test]
    fn median_removes_salt_noise() {
        let mut data = vec![50u8; 25];
        data[12] = 255;
        let out = median(&data, 5, 5, 1, 3);
        assert!(out.iter().all(|&v| v == 50));
    }

    #[test]
    fn median_kernel_one_is_identity() {
        let data = ramp(6, 4);
        assert_eq!(median(&data, 6, 4, 1, 1), data);
    }

    #[test]
    fn dilate_and_erode_single_pixel() {
        let mut data = vec![0u8; 25];
        data[12] = 200;
        let dilated = morphology(&data, 5, 5, 1, 3, Morphology::Dilate);
        assert_eq!(dilated.iter().filter(|&&v| v == 200).count(), 9);
        let eroded = morphology(&data, 5, 5, 1, 3, Morphology::Erode);
        assert!(eroded.iter().all(|&v| v == 0));
    }

    #[test]
    fn morphology_kernel_one_is_identity() {
        let data = ramp(5, 5);
        assert_eq!(morphology(&data, 5, 5, 1, 1, Morphology::Erode), data);
    }
}
