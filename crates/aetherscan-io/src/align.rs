//! Naive co-registration: resample a raster onto a reference grid.
//!
//! No geometric registration happens here. The moving raster is simply
//! resized to the reference height and width, which is enough for
//! pairs that already cover the same footprint at different
//! resolutions.

use std::fmt;

use aetherscan_pipeline::{DetectionError, Dimensions, FloatImage, RasterImage};
use image::Luma;
use serde::{Deserialize, Serialize};

use crate::IoError;

/// Resampling filter used when resizing bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor.
    Nearest,
    /// Bilinear interpolation.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

impl ResampleFilter {
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Resize every band of `moving` to `reference` dimensions.
///
/// Returns the (possibly unchanged) raster and whether resampling was
/// applied. The transform of `moving` is kept as is; callers place
/// results with the reference transform.
///
/// # Errors
///
/// Returns [`IoError::Raster`] if `reference` has no pixels.
pub fn align_to(
    reference: Dimensions,
    moving: RasterImage,
    filter: ResampleFilter,
) -> Result<(RasterImage, bool), IoError> {
    if moving.dimensions() == reference {
        return Ok((moving, false));
    }
    if reference.pixel_count() == 0 {
        return Err(DetectionError::EmptyRaster.into());
    }

    tracing::info!(
        from = %moving.dimensions(),
        to = %reference,
        %filter,
        "resampling raster to reference grid"
    );
    let (bands, transform) = moving.into_parts();
    let resized = bands
        .iter()
        .map(|band| resize_band(band, reference, filter))
        .collect();
    Ok((RasterImage::new(resized, transform)?, true))
}

/// Resize one band without losing its value range.
///
/// `image` clamps float samples to `[0, 1]` while resampling, so the
/// band is mapped onto that interval first and scaled back afterwards.
fn resize_band(band: &FloatImage, to: Dimensions, filter: ResampleFilter) -> FloatImage {
    let (lo, hi) = band
        .pixels()
        .map(|p| p.0[0])
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;
    if !(span.is_finite() && span > 0.0) {
        let fill = if lo.is_finite() { lo } else { 0.0 };
        return FloatImage::from_pixel(to.width, to.height, Luma([fill]));
    }

    let unit = FloatImage::from_fn(band.width(), band.height(), |x, y| {
        Luma([(band.get_pixel(x, y).0[0] - lo) / span])
    });
    let resized = image::imageops::resize(&unit, to.width, to.height, filter.to_image_filter());
    FloatImage::from_fn(to.width, to.height, |x, y| {
        Luma([resized.get_pixel(x, y).0[0].mul_add(span, lo)])
    })
}
