//! Structural similarity (SSIM) between two 8-bit renderings.
//!
//! Local statistics are taken over a 7×7 uniform window with
//! half-sample symmetric (reflect) padding at the borders, and the
//! local variances use the sample (`n - 1`) normalization:
//!
//! ```text
//! S = (2·μx·μy + C1)(2·σxy + C2) / ((μx² + μy² + C1)(σx² + σy² + C2))
//! C1 = (K1·L)²,  C2 = (K2·L)²,  L = 255
//! ```
//!
//! The global score is the mean of `S` over the pixels at least
//! half a window away from every border.

use image::{GrayImage, Luma};

use crate::types::{DetectionError, FloatImage, ensure_same_dimensions};

/// Side length of the square averaging window.
pub const WINDOW_SIZE: u32 = 7;

const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Global score plus the per-pixel similarity map.
#[derive(Debug, Clone)]
pub struct StructuralSimilarity {
    /// Mean similarity in `[-1, 1]`.
    pub score: f64,
    /// Per-pixel similarity, same dimensions as the inputs.
    pub map: FloatImage,
}

/// Compute the structural similarity of two equally-shaped renderings.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the images differ in
/// size and [`DetectionError::ImageTooSmall`] if either side is shorter
/// than [`WINDOW_SIZE`].
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn structural_similarity(
    a: &GrayImage,
    b: &GrayImage,
) -> Result<StructuralSimilarity, DetectionError> {
    ensure_same_dimensions(a, b)?;
    let (width, height) = a.dimensions();
    if width < WINDOW_SIZE || height < WINDOW_SIZE {
        return Err(DetectionError::ImageTooSmall {
            width,
            height,
            min: WINDOW_SIZE,
        });
    }

    let w = width as usize;
    let h = height as usize;
    let x: Vec<f64> = a.as_raw().iter().map(|&v| f64::from(v)).collect();
    let y: Vec<f64> = b.as_raw().iter().map(|&v| f64::from(v)).collect();
    let xx: Vec<f64> = x.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = y.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = x.iter().zip(&y).map(|(p, q)| p * q).collect();

    let radius = (WINDOW_SIZE / 2) as usize;
    let ux = box_mean(&x, w, h, radius);
    let uy = box_mean(&y, w, h, radius);
    let uxx = box_mean(&xx, w, h, radius);
    let uyy = box_mean(&yy, w, h, radius);
    let uxy = box_mean(&xy, w, h, radius);

    let np = f64::from(WINDOW_SIZE * WINDOW_SIZE);
    let cov_norm = np / (np - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let map: Vec<f64> = (0..w * h)
        .map(|i| {
            let vx = cov_norm * ux[i].mul_add(-ux[i], uxx[i]);
            let vy = cov_norm * uy[i].mul_add(-uy[i], uyy[i]);
            let vxy = cov_norm * ux[i].mul_add(-uy[i], uxy[i]);
            let a1 = (2.0 * ux[i]).mul_add(uy[i], c1);
            let a2 = 2.0f64.mul_add(vxy, c2);
            let b1 = ux[i].mul_add(ux[i], uy[i].mul_add(uy[i], c1));
            let b2 = vx + vy + c2;
            (a1 * a2) / (b1 * b2)
        })
        .collect();

    let mut sum = 0.0;
    let mut count = 0usize;
    for row in radius..h - radius {
        for col in radius..w - radius {
            sum += map[row * w + col];
            count += 1;
        }
    }
    let score = sum / count as f64;
    tracing::debug!(score, "structural similarity computed");

    let map = FloatImage::from_fn(width, height, |px, py| {
        Luma([map[py as usize * w + px as usize] as f32])
    });
    Ok(StructuralSimilarity { score, map })
}

/// Separable `(2r + 1)²` box mean with reflect padding.
fn box_mean(values: &[f64], w: usize, h: usize, radius: usize) -> Vec<f64> {
    let mut horizontal = vec![0.0; values.len()];
    for row in 0..h {
        let line = &values[row * w..(row + 1) * w];
        for col in 0..w {
            horizontal[row * w + col] = window_mean(|i| line[i], w, col, radius);
        }
    }

    let mut out = vec![0.0; values.len()];
    for col in 0..w {
        for row in 0..h {
            out[row * w + col] = window_mean(|i| horizontal[i * w + col], h, row, radius);
        }
    }
    out
}

#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn window_mean(at: impl Fn(usize) -> f64, len: usize, center: usize, radius: usize) -> f64 {
    let center = center as isize;
    let r = radius as isize;
    let total: f64 = (center - r..=center + r)
        .map(|i| at(reflect(i, len)))
        .sum();
    total / (2 * radius + 1) as f64
}

/// Half-sample symmetric index: `d c b a | a b c d | d c b a`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn reflect(i: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut k = i % period;
    if k < 0 {
        k += period;
    }
    if k >= n { (period - 1 - k) as usize } else { k as usize }
}
