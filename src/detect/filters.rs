//! Small image filters used by the occupancy strategies.
//!
//! - Sobel gradient magnitude → edge density.
//! - Separable Gaussian blur.
//! - 4-neighbour Laplacian → masked texture energy.
//!
//! All kernels clamp at the image border, so a flat ROI produces no edges or texture
//! along its rim.

use crate::frame::GrayImage;

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

#[inline]
fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Per-pixel Sobel magnitude `sqrt(gx² + gy²)`, row-major.
pub fn sobel_magnitude(img: &GrayImage) -> Vec<f32> {
    let (w, h) = (img.width, img.height);
    let mut mag = vec![0.0f32; w * h];
    if img.is_empty() {
        return mag;
    }

    for y in 0..h {
        let rows = [
            img.row(clamp_index(y as isize - 1, h)),
            img.row(y),
            img.row(clamp_index(y as isize + 1, h)),
        ];
        for x in 0..w {
            let xs = [clamp_index(x as isize - 1, w), x, clamp_index(x as isize + 1, w)];
            let mut gx = 0.0;
            let mut gy = 0.0;
            for (ky, row) in rows.iter().enumerate() {
                for (kx, &xx) in xs.iter().enumerate() {
                    let v = row[xx] as f32;
                    gx += v * SOBEL_KERNEL_X[ky][kx];
                    gy += v * SOBEL_KERNEL_Y[ky][kx];
                }
            }
            mag[y * w + x] = (gx * gx + gy * gy).sqrt();
        }
    }
    mag
}

/// Fraction of pixels whose gradient magnitude exceeds `threshold`, over the whole image.
/// An empty image has density 0.
pub fn edge_density(img: &GrayImage, threshold: f32) -> f64 {
    let total = img.width * img.height;
    if total == 0 {
        return 0.0;
    }
    let edges = sobel_magnitude(img)
        .into_iter()
        .filter(|&m| m > threshold)
        .count();
    edges as f64 / total as f64
}

fn gaussian_taps(sigma: f32, radius: usize) -> Vec<f32> {
    let sigma = sigma.max(f32::EPSILON);
    let mut taps: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t /= sum;
    }
    taps
}

/// Separable Gaussian blur with a `(2 * radius + 1)`-tap kernel. Output stays `f32` so the
/// Laplacian that follows sees sub-integer differences.
pub fn gaussian_blur(img: &GrayImage, sigma: f32, radius: usize) -> Vec<f32> {
    let (w, h) = (img.width, img.height);
    if img.is_empty() {
        return Vec::new();
    }
    let taps = gaussian_taps(sigma, radius);

    let mut horizontal = vec![0.0f32; w * h];
    for y in 0..h {
        let row = img.row(y);
        for x in 0..w {
            let mut acc = 0.0;
            for (t, &tap) in taps.iter().enumerate() {
                let xx = clamp_index(x as isize + t as isize - radius as isize, w);
                acc += row[xx] as f32 * tap;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (t, &tap) in taps.iter().enumerate() {
                let yy = clamp_index(y as isize + t as isize - radius as isize, h);
                acc += horizontal[yy * w + x] * tap;
            }
            out[y * w + x] = acc;
        }
    }
    out
}

/// Mean absolute 4-neighbour Laplacian over a `width × height` field, counting only
/// pixels inside `mask` but averaging over the full area.
pub fn masked_laplacian_energy(field: &[f32], width: usize, height: usize, mask: &[bool]) -> f64 {
    let total = width * height;
    if total == 0 || field.len() != total || mask.len() != total {
        return 0.0;
    }
    let at = |x: isize, y: isize| field[clamp_index(y, height) * width + clamp_index(x, width)];

    let mut sum = 0.0f64;
    for y in 0..height {
        for x in 0..width {
            if !mask[y * width + x] {
                continue;
            }
            let (xi, yi) = (x as isize, y as isize);
            let lap = at(xi - 1, yi) + at(xi + 1, yi) + at(xi, yi - 1) + at(xi, yi + 1)
                - 4.0 * at(xi, yi);
            sum += lap.abs() as f64;
        }
    }
    sum / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.set(x, y, f(x, y));
            }
        }
        img
    }

    #[test]
    fn flat_image_has_no_edges() {
        let img = image(12, 12, |_, _| 77);
        assert_eq!(edge_density(&img, 1.0), 0.0);
    }

    #[test]
    fn vertical_step_marks_two_columns() {
        let img = image(10, 5, |x, _| if x < 5 { 0 } else { 200 });
        // Columns 4 and 5 straddle the step: 2 of 10 columns.
        assert!((edge_density(&img, 100.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn empty_image_density_is_zero() {
        assert_eq!(edge_density(&GrayImage::new(0, 7), 10.0), 0.0);
    }

    #[test]
    fn blur_preserves_constant_field() {
        let img = image(7, 9, |_, _| 50);
        let blurred = gaussian_blur(&img, 3.0, 2);
        assert!(blurred.iter().all(|&v| (v - 50.0).abs() < 1e-3));
    }

    #[test]
    fn laplacian_energy_respects_mask() {
        let img = image(6, 6, |x, y| if (x + y) % 2 == 0 { 0 } else { 255 });
        let field: Vec<f32> = img.data.iter().map(|&v| v as f32).collect();
        let all = vec![true; 36];
        let none = vec![false; 36];
        assert!(masked_laplacian_energy(&field, 6, 6, &all) > 100.0);
        assert_eq!(masked_laplacian_energy(&field, 6, 6, &none), 0.0);
    }
}
