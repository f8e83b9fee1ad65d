//! Normalization of continuous change fields to 8 bits and automatic
//! bimodal (Otsu) binarization.
//!
//! Both change estimators reduce their per-pixel magnitude field to an
//! 8-bit rendering and let [`otsu_binarize`] pick the cut, so no
//! manually tuned cutoff is involved.

use image::{GrayImage, Luma};

use crate::types::{ChangeMask, FloatImage, MASK_ON};

/// Additive guard on normalization denominators.
pub const NORMALIZE_EPSILON: f32 = 1e-6;

/// Min-max normalize a field into `0..=255`.
///
/// `(v - min) / (max - min + ε) * 255`, truncated toward zero.
#[must_use = "returns the normalized 8-bit image"]
pub fn min_max_to_u8(field: &FloatImage) -> GrayImage {
    let Some((min, max)) = value_range(field) else {
        return GrayImage::new(field.width(), field.height());
    };
    let scale = max - min + NORMALIZE_EPSILON;
    map_to_u8(field, |v| (v - min) / scale * 255.0)
}

/// Max-normalize a non-negative field into `0..=255`.
///
/// `v / (max + ε) * 255`, truncated toward zero. Unlike
/// [`min_max_to_u8`] the zero point is kept, so a field that is uniformly
/// positive maps to a uniform bright image.
#[must_use = "returns the normalized 8-bit image"]
pub fn max_to_u8(field: &FloatImage) -> GrayImage {
    let Some((_, max)) = value_range(field) else {
        return GrayImage::new(field.width(), field.height());
    };
    let scale = max + NORMALIZE_EPSILON;
    map_to_u8(field, |v| 255.0 * (v / scale))
}

/// Binarize an 8-bit image at the Otsu level.
///
/// Pixels strictly above the level become [`MASK_ON`], the rest `0`.
/// An image whose histogram occupies a single bin has no bimodal split;
/// it is reported as entirely unchanged.
#[must_use = "returns the binary change mask"]
pub fn otsu_binarize(gray: &GrayImage) -> ChangeMask {
    let (width, height) = gray.dimensions();
    let Some((lo, hi)) = intensity_range(gray) else {
        return ChangeMask::new(width, height);
    };
    if lo == hi {
        tracing::warn!(
            value = lo,
            "zero-variance change field; reporting no change"
        );
        return ChangeMask::new(width, height);
    }

    let level = imageproc::contrast::otsu_level(gray);
    tracing::debug!(level, "otsu threshold selected");
    binarize(gray, level)
}

/// Binarize at a fixed level: `v > level` becomes [`MASK_ON`].
#[must_use = "returns the binary change mask"]
pub fn binarize(gray: &GrayImage, level: u8) -> ChangeMask {
    ChangeMask::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y).0[0] > level {
            Luma([MASK_ON])
        } else {
            Luma([0])
        }
    })
}

/// Smallest and largest value of a field, or `None` if it has no pixels.
fn value_range(field: &FloatImage) -> Option<(f32, f32)> {
    field.pixels().map(|p| p.0[0]).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn intensity_range(gray: &GrayImage) -> Option<(u8, u8)> {
    gray.pixels().map(|p| p.0[0]).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Apply `f` per pixel and truncate to `u8`.
///
/// `as` saturates, so values slightly outside `0..=255` clamp and NaN
/// maps to `0`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn map_to_u8(field: &FloatImage, f: impl Fn(f32) -> f32) -> GrayImage {
    GrayImage::from_fn(field.width(), field.height(), |x, y| {
        Luma([f(field.get_pixel(x, y).0[0]) as u8])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn field(width: u32, values: &[f32]) -> FloatImage {
        let height = u32::try_from(values.len()).unwrap() / width;
        FloatImage::from_raw(width, height, values.to_vec()).unwrap()
    }

    #[test]
    fn min_max_spans_full_range() {
        let gray = min_max_to_u8(&field(3, &[0.5, 1.0, 1.5]));
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 127);
        // 254.99975 truncates to 254.
        assert_eq!(gray.get_pixel(2, 0).0[0], 254);
    }

    #[test]
    fn min_max_of_uniform_field_is_zero() {
        let gray = min_max_to_u8(&field(2, &[0.7, 0.7, 0.7, 0.7]));
        assert!(gray.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn max_normalization_keeps_zero_point() {
        let gray = max_to_u8(&field(2, &[0.5, 1.0]));
        assert_eq!(gray.get_pixel(0, 0).0[0], 127);
        assert_eq!(gray.get_pixel(1, 0).0[0], 254);
    }

    #[test]
    fn max_normalization_of_zero_field_is_zero() {
        let gray = max_to_u8(&FloatImage::new(3, 3));
        assert!(gray.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn empty_field_normalizes_to_empty_image() {
        let gray = min_max_to_u8(&FloatImage::new(0, 0));
        assert_eq!(gray.dimensions(), (0, 0));
    }

    #[test]
    fn otsu_separates_two_populations() {
        let gray = GrayImage::from_fn(10, 10, |x, _| {
            if x < 7 { Luma([10]) } else { Luma([200]) }
        });
        let mask = otsu_binarize(&gray);
        for (x, _, p) in mask.enumerate_pixels() {
            let expected = if x < 7 { 0 } else { MASK_ON };
            assert_eq!(p.0[0], expected);
        }
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn otsu_output_is_strictly_binary() {
        let gray = GrayImage::from_fn(16, 16, |x, y| Luma([((x * 16 + y) % 256) as u8]));
        let mask = otsu_binarize(&gray);
        assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == MASK_ON));
    }

    #[test]
    fn uniform_bright_input_is_all_unchanged() {
        let gray = GrayImage::from_pixel(8, 8, Luma([255]));
        let mask = otsu_binarize(&gray);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn uniform_dark_input_is_all_unchanged() {
        let gray = GrayImage::new(8, 8);
        let mask = otsu_binarize(&gray);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn binarize_is_strictly_greater() {
        let gray = GrayImage::from_raw(3, 1, vec![99, 100, 101]).unwrap();
        let mask = binarize(&gray, 100);
        assert_eq!(mask.as_raw(), &vec![0, 0, MASK_ON]);
    }
}
