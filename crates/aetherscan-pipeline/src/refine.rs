//! Mask refinement: morphological cleanup and water suppression.
//!
//! Every function returns a new mask; inputs are never modified, so a
//! raw mask can be shared by several downstream consumers. When both
//! refinements are used they run in the order cleanup, then water
//! suppression, so morphology cannot reconnect water-masked holes.

use image::Luma;
use imageproc::distance_transform::Norm;

use crate::types::{ChangeMask, DetectionError, GrayImage, IndexMap, MASK_ON, ensure_same_dimensions};

/// Chebyshev radius of the square structuring element (3×3).
const ELEMENT_RADIUS: u8 = 1;

/// Opening followed by closing with a 3×3 square element.
///
/// The opening drops isolated single-pixel noise; the closing then
/// fills small gaps inside larger changed regions. The result only
/// contains `0` and [`MASK_ON`].
#[must_use = "returns the cleaned mask"]
pub fn morphological_clean(mask: &ChangeMask) -> ChangeMask {
    let opened = imageproc::morphology::open(mask, Norm::LInf, ELEMENT_RADIUS);
    imageproc::morphology::close(&opened, Norm::LInf, ELEMENT_RADIUS)
}

/// Boolean water mask: [`MASK_ON`] where `ndwi > threshold`.
#[must_use = "returns the water mask"]
pub fn water_mask(ndwi: &IndexMap, threshold: f32) -> GrayImage {
    GrayImage::from_fn(ndwi.width(), ndwi.height(), |x, y| {
        if ndwi.get_pixel(x, y).0[0] > threshold {
            Luma([MASK_ON])
        } else {
            Luma([0])
        }
    })
}

/// Mark every pixel whose NDWI exceeds `threshold` as unchanged.
///
/// Only ever removes changed pixels; it never adds any.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the mask and the NDWI
/// field differ in size.
pub fn suppress_water(
    mask: &ChangeMask,
    ndwi: &IndexMap,
    threshold: f32,
) -> Result<ChangeMask, DetectionError> {
    ensure_same_dimensions(mask, ndwi)?;
    let water = water_mask(ndwi, threshold);
    let suppressed = ChangeMask::from_fn(mask.width(), mask.height(), |x, y| {
        if water.get_pixel(x, y).0[0] != 0 {
            Luma([0])
        } else {
            *mask.get_pixel(x, y)
        }
    });
    tracing::debug!(
        before = count_on(mask),
        after = count_on(&suppressed),
        threshold,
        "water suppression applied"
    );
    Ok(suppressed)
}

/// Number of nonzero pixels.
#[must_use]
pub fn count_on(mask: &GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}

/// Swap changed and unchanged pixels.
#[must_use = "returns the inverted mask"]
pub fn invert_mask(mask: &ChangeMask) -> ChangeMask {
    ChangeMask::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            Luma([MASK_ON])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mask_with_block(size: u32, x0: u32, y0: u32, w: u32, h: u32) -> ChangeMask {
        ChangeMask::from_fn(size, size, |x, y| {
            if (x0..x0 + w).contains(&x) && (y0..y0 + h).contains(&y) {
                Luma([MASK_ON])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn clean_removes_isolated_pixels() {
        let mut mask = ChangeMask::new(20, 20);
        mask.put_pixel(5, 5, Luma([MASK_ON]));
        mask.put_pixel(14, 3, Luma([MASK_ON]));
        let cleaned = morphological_clean(&mask);
        assert_eq!(count_on(&cleaned), 0);
    }

    #[test]
    fn clean_preserves_large_blocks() {
        let mask = mask_with_block(30, 5, 5, 10, 10);
        let cleaned = morphological_clean(&mask);
        assert_eq!(cleaned, mask);
    }

    #[test]
    fn clean_fills_single_pixel_holes() {
        let mut mask = mask_with_block(30, 5, 5, 10, 10);
        mask.put_pixel(9, 9, Luma([0]));
        let cleaned = morphological_clean(&mask);
        assert_eq!(cleaned.get_pixel(9, 9).0[0], MASK_ON);
        assert_eq!(count_on(&cleaned), 100);
    }

    #[test]
    fn clean_keeps_blocks_touching_the_border() {
        let mask = mask_with_block(20, 0, 0, 6, 6);
        let cleaned = morphological_clean(&mask);
        assert_eq!(count_on(&cleaned), 36);
    }

    #[test]
    fn clean_does_not_mutate_input() {
        let mut mask = mask_with_block(20, 4, 4, 5, 5);
        mask.put_pixel(15, 15, Luma([MASK_ON]));
        let snapshot = mask.clone();
        let _ = morphological_clean(&mask);
        assert_eq!(mask, snapshot);
    }

    #[test]
    fn water_suppression_zeroes_water_pixels() {
        let mask = mask_with_block(10, 0, 0, 10, 10);
        let ndwi = IndexMap::from_fn(10, 10, |x, _| if x < 5 { Luma([0.4]) } else { Luma([-0.2]) });
        let out = suppress_water(&mask, &ndwi, 0.15).unwrap();
        assert_eq!(count_on(&out), 50);
        assert_eq!(out.get_pixel(2, 2).0[0], 0);
        assert_eq!(out.get_pixel(7, 2).0[0], MASK_ON);
    }

    #[test]
    fn water_threshold_is_strict() {
        let mask = mask_with_block(4, 0, 0, 4, 4);
        let ndwi = IndexMap::from_pixel(4, 4, Luma([0.15]));
        let out = suppress_water(&mask, &ndwi, 0.15).unwrap();
        assert_eq!(out, mask);
    }

    #[test]
    fn water_suppression_rejects_mismatched_shapes() {
        let mask = ChangeMask::new(4, 4);
        let ndwi = IndexMap::new(5, 4);
        assert!(matches!(
            suppress_water(&mask, &ndwi, 0.15),
            Err(DetectionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn water_mask_marks_high_ndwi() {
        let ndwi = IndexMap::from_raw(3, 1, vec![0.1, 0.2, 0.9]).unwrap();
        let water = water_mask(&ndwi, 0.15);
        assert_eq!(water.as_raw(), &vec![0, MASK_ON, MASK_ON]);
    }

    #[test]
    fn invert_round_trips() {
        let mask = mask_with_block(8, 2, 2, 3, 3);
        assert_eq!(invert_mask(&invert_mask(&mask)), mask);
        assert_eq!(count_on(&invert_mask(&mask)), 64 - 9);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        const SIDE: u32 = 12;

        fn mask_from_bits(bits: &[bool]) -> ChangeMask {
            ChangeMask::from_fn(SIDE, SIDE, |x, y| {
                if bits[(y * SIDE + x) as usize] {
                    Luma([MASK_ON])
                } else {
                    Luma([0])
                }
            })
        }

        fn bits() -> impl Strategy<Value = Vec<bool>> {
            proptest::collection::vec(any::<bool>(), (SIDE * SIDE) as usize)
        }

        proptest! {
            #[test]
            fn clean_is_idempotent(bits in bits()) {
                let once = morphological_clean(&mask_from_bits(&bits));
                let twice = morphological_clean(&once);
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn clean_output_is_binary(bits in bits()) {
                let cleaned = morphological_clean(&mask_from_bits(&bits));
                prop_assert!(cleaned.pixels().all(|p| p.0[0] == 0 || p.0[0] == MASK_ON));
            }

            #[test]
            fn suppression_never_adds_pixels(
                bits in bits(),
                water in proptest::collection::vec(-1.0f32..1.0, (SIDE * SIDE) as usize),
                threshold in -1.0f32..1.0,
            ) {
                let mask = mask_from_bits(&bits);
                let ndwi = IndexMap::from_raw(SIDE, SIDE, water).unwrap();
                let out = suppress_water(&mask, &ndwi, threshold).unwrap();
                prop_assert!(count_on(&out) <= count_on(&mask));
            }
        }
    }
}
