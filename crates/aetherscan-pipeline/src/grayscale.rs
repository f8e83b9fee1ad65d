//! 8-bit renderings of raw bands.
//!
//! Raw reflectance bands have arbitrary range and heavy tails, so they
//! are stretched between robust percentiles before anything that
//! expects 8-bit input (structural similarity, display) sees them.

use image::{GrayImage, Luma};

use crate::threshold::NORMALIZE_EPSILON;
use crate::types::FloatImage;

/// Lower percentile of the display stretch.
pub const LOW_PERCENTILE: f64 = 2.0;
/// Upper percentile of the display stretch.
pub const HIGH_PERCENTILE: f64 = 98.0;

/// The `low` and `high` percentiles of `values`, ignoring NaN.
///
/// Percentiles interpolate linearly between the two nearest order
/// statistics. Returns `None` if there are no non-NaN values.
#[must_use]
pub fn percentile_bounds(
    values: impl IntoIterator<Item = f32>,
    low: f64,
    high: f64,
) -> Option<(f32, f32)> {
    let mut sorted: Vec<f32> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable_by(f32::total_cmp);
    Some((percentile(&sorted, low), percentile(&sorted, high)))
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f32], p: f64) -> f32 {
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    let a = f64::from(sorted[lo]);
    let b = f64::from(sorted[hi]);
    frac.mul_add(b - a, a) as f32
}

/// Linearly map `[lo, hi]` onto `0..=255`, clipping outside values.
///
/// `(v - lo) / (hi - lo + ε)`, clipped to `[0, 1]`, scaled by 255 and
/// truncated. NaN maps to `0`.
#[must_use = "returns the stretched 8-bit image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn stretch_to_u8(field: &FloatImage, lo: f32, hi: f32) -> GrayImage {
    let scale = hi - lo + NORMALIZE_EPSILON;
    GrayImage::from_fn(field.width(), field.height(), |x, y| {
        let v = (field.get_pixel(x, y).0[0] - lo) / scale;
        Luma([(v.clamp(0.0, 1.0) * 255.0) as u8])
    })
}

/// Stretch a band between its 2nd and 98th percentiles.
///
/// An all-NaN band renders black.
#[must_use = "returns the stretched 8-bit image"]
pub fn percentile_stretch(band: &FloatImage) -> GrayImage {
    match percentile_bounds(band.pixels().map(|p| p.0[0]), LOW_PERCENTILE, HIGH_PERCENTILE) {
        Some((lo, hi)) => stretch_to_u8(band, lo, hi),
        None => GrayImage::new(band.width(), band.height()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_interpolate_linearly() {
        let values: Vec<f32> = (0..=100u8).map(f32::from).collect();
        let (lo, hi) = percentile_bounds(values, 2.0, 98.0).unwrap();
        assert!((lo - 2.0).abs() < 1e-5);
        assert!((hi - 98.0).abs() < 1e-5);

        let (lo, hi) = percentile_bounds([0.0, 10.0], 25.0, 50.0).unwrap();
        assert!((lo - 2.5).abs() < 1e-5);
        assert!((hi - 5.0).abs() < 1e-5);
    }

    #[test]
    fn percentiles_ignore_nan() {
        let (lo, hi) = percentile_bounds([f32::NAN, 4.0, f32::NAN], 2.0, 98.0).unwrap();
        assert!((lo - 4.0).abs() < f32::EPSILON);
        assert!((hi - 4.0).abs() < f32::EPSILON);
        assert!(percentile_bounds([f32::NAN], 2.0, 98.0).is_none());
    }

    #[test]
    fn stretch_clips_tails() {
        let band = FloatImage::from_fn(101, 1, |x, _| Luma([x as f32]));
        let gray = percentile_stretch(&band);
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 0);
        assert_eq!(gray.get_pixel(100, 0).0[0], 255);
        assert_eq!(gray.get_pixel(99, 0).0[0], 255);
        assert!(gray.get_pixel(50, 0).0[0] > 120 && gray.get_pixel(50, 0).0[0] < 135);
    }

    #[test]
    fn uniform_band_renders_black() {
        let band = FloatImage::from_pixel(5, 5, Luma([1234.0]));
        let gray = percentile_stretch(&band);
        assert!(gray.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn nan_pixels_render_black() {
        let band = FloatImage::from_raw(3, 1, vec![0.0, f32::NAN, 10.0]).unwrap();
        let gray = stretch_to_u8(&band, 0.0, 10.0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 0);
        assert_eq!(gray.get_pixel(2, 0).0[0], 254);
    }
}
