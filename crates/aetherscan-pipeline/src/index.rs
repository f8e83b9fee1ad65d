//! Normalized difference indices (NDVI, NDWI) from raw band arrays.
//!
//! Every index is `(a - b) / (a + b + ε)` evaluated element-wise in
//! floating point. The additive [`INDEX_EPSILON`] keeps the denominator
//! away from zero so bands that are both zero produce `0`, never NaN.

use image::Luma;

use crate::types::{DetectionError, FloatImage, IndexMap, ensure_same_dimensions};

/// Additive guard on index denominators.
pub const INDEX_EPSILON: f32 = 1e-6;

/// Compute `(a - b) / (a + b + ε)` for two equally-shaped bands.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the bands differ in size.
pub fn normalized_difference(a: &FloatImage, b: &FloatImage) -> Result<IndexMap, DetectionError> {
    ensure_same_dimensions(a, b)?;
    Ok(IndexMap::from_fn(a.width(), a.height(), |x, y| {
        let va = a.get_pixel(x, y).0[0];
        let vb = b.get_pixel(x, y).0[0];
        Luma([(va - vb) / (va + vb + INDEX_EPSILON)])
    }))
}

/// Normalized Difference Vegetation Index: `(NIR - RED) / (NIR + RED + ε)`.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the bands differ in size.
pub fn compute_ndvi(nir: &FloatImage, red: &FloatImage) -> Result<IndexMap, DetectionError> {
    normalized_difference(nir, red)
}

/// Normalized Difference Water Index: `(GREEN - NIR) / (GREEN + NIR + ε)`.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the bands differ in size.
pub fn compute_ndwi(green: &FloatImage, nir: &FloatImage) -> Result<IndexMap, DetectionError> {
    normalized_difference(green, nir)
}

/// Per-pixel mean of two index maps.
///
/// Used to build a single water field from the NDWI of both dates.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the maps differ in size.
pub fn mean_index(a: &IndexMap, b: &IndexMap) -> Result<IndexMap, DetectionError> {
    ensure_same_dimensions(a, b)?;
    Ok(IndexMap::from_fn(a.width(), a.height(), |x, y| {
        Luma([(a.get_pixel(x, y).0[0] + b.get_pixel(x, y).0[0]) / 2.0])
    }))
}
