//! Change estimators: turn a pair of per-pixel inputs into a binary
//! change mask.
//!
//! Two independent strategies are provided:
//!
//! - [`delta_mask`] thresholds the absolute difference of an index
//!   (e.g. NDVI) between two dates.
//! - [`ssim_mask`] thresholds the structural dissimilarity between two
//!   8-bit renderings of a band.
//!
//! Both binarize with [`otsu_binarize`](crate::threshold::otsu_binarize)
//! and finish with [`morphological_clean`](crate::refine::morphological_clean).
//! They may be run on the same image pair with different band
//! selections and are not required to agree.

use image::Luma;
use serde::{Deserialize, Serialize};

use crate::refine::morphological_clean;
use crate::ssim::structural_similarity;
use crate::threshold::{max_to_u8, min_max_to_u8, otsu_binarize};
use crate::types::{
    ChangeMask, DetectionError, FloatImage, GrayImage, IndexMap, ensure_same_dimensions,
};

/// Identifies which estimator produced a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeMethod {
    /// Absolute index difference, Otsu-thresholded.
    DeltaIndex,
    /// Structural dissimilarity, Otsu-thresholded.
    StructuralSimilarity,
}

impl ChangeMethod {
    /// Short label used in summaries and file names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DeltaIndex => "ndvi",
            Self::StructuralSimilarity => "ssim",
        }
    }
}

/// Output of [`delta_mask`].
#[derive(Debug, Clone)]
pub struct DeltaEstimate {
    /// Signed `after - before`, kept for gain/loss decomposition.
    pub delta: FloatImage,
    /// Refined binary change mask.
    pub mask: ChangeMask,
}

/// Output of [`ssim_mask`].
#[derive(Debug, Clone)]
pub struct SimilarityEstimate {
    /// Global SSIM score in `[-1, 1]`.
    pub score: f64,
    /// Refined binary change mask.
    pub mask: ChangeMask,
}

/// Delta-index strategy.
///
/// 1. `delta = after - before`
/// 2. `|delta|` min-max normalized to 8 bits
/// 3. Otsu binarization
/// 4. Morphological cleanup
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the index maps differ
/// in size.
pub fn delta_mask(before: &IndexMap, after: &IndexMap) -> Result<DeltaEstimate, DetectionError> {
    ensure_same_dimensions(before, after)?;
    let delta = FloatImage::from_fn(before.width(), before.height(), |x, y| {
        Luma([after.get_pixel(x, y).0[0] - before.get_pixel(x, y).0[0]])
    });
    let magnitude = FloatImage::from_fn(delta.width(), delta.height(), |x, y| {
        Luma([delta.get_pixel(x, y).0[0].abs()])
    });

    let raw = otsu_binarize(&min_max_to_u8(&magnitude));
    let mask = morphological_clean(&raw);
    tracing::debug!(
        method = ChangeMethod::DeltaIndex.label(),
        changed = crate::refine::count_on(&mask),
        "delta mask estimated"
    );
    Ok(DeltaEstimate { delta, mask })
}

/// Structural-dissimilarity strategy.
///
/// 1. SSIM map between the renderings
/// 2. `dissimilarity = 1 - similarity`
/// 3. Max-normalized to 8 bits (not min-max: the field is already
///    non-negative)
/// 4. Otsu binarization
/// 5. Morphological cleanup
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if the renderings differ in
/// size and [`DetectionError::ImageTooSmall`] if they are smaller than
/// the similarity window.
pub fn ssim_mask(before: &GrayImage, after: &GrayImage) -> Result<SimilarityEstimate, DetectionError> {
    let similarity = structural_similarity(before, after)?;
    let dissimilarity = FloatImage::from_fn(
        similarity.map.width(),
        similarity.map.height(),
        |x, y| Luma([1.0 - similarity.map.get_pixel(x, y).0[0]]),
    );

    let raw = otsu_binarize(&max_to_u8(&dissimilarity));
    let mask = morphological_clean(&raw);
    tracing::debug!(
        method = ChangeMethod::StructuralSimilarity.label(),
        score = similarity.score,
        changed = crate::refine::count_on(&mask),
        "similarity mask estimated"
    );
    Ok(SimilarityEstimate {
        score: similarity.score,
        mask,
    })
}
