//! Shared types for the aetherscan change-detection pipeline.

use image::{GenericImageView, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::polygon::FeatureCollection;

/// Re-export `GrayImage` so downstream crates can reference masks and
/// 8-bit renderings without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` for presentation collaborators.
pub use image::RgbImage;

/// Single-channel floating-point raster (one band, one index map, ...).
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel normalized difference index, approximately in `[-1, 1]`.
pub type IndexMap = FloatImage;

/// Binary change mask: `0` is unchanged, [`MASK_ON`] is changed.
pub type ChangeMask = GrayImage;

/// The single "on" value a thresholded mask may contain.
pub const MASK_ON: u8 = 255;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any `image` view.
    #[must_use]
    pub fn of<I: GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Check that two paired inputs share the same shape.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] when they differ.
pub fn ensure_same_dimensions<A, B>(expected: &A, actual: &B) -> Result<(), DetectionError>
where
    A: GenericImageView,
    B: GenericImageView,
{
    let expected = Dimensions::of(expected);
    let actual = Dimensions::of(actual);
    if expected == actual {
        Ok(())
    } else {
        Err(DetectionError::ShapeMismatch { expected, actual })
    }
}

/// Affine georeferencing transform.
///
/// Maps pixel coordinates (column, row) to spatial coordinates:
///
/// ```text
/// x = pixel_width * col + row_rotation * row + origin_x
/// y = col_rotation * col + pixel_height * row + origin_y
/// ```
///
/// For north-up rasters both rotation terms are zero and
/// `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Cell size in X.
    pub pixel_width: f64,
    /// X shear per row (usually 0).
    pub row_rotation: f64,
    /// X coordinate of the upper-left corner.
    pub origin_x: f64,
    /// Y shear per column (usually 0).
    pub col_rotation: f64,
    /// Cell size in Y (usually negative).
    pub pixel_height: f64,
    /// Y coordinate of the upper-left corner.
    pub origin_y: f64,
}

impl GeoTransform {
    /// Pixel coordinates map to themselves.
    pub const IDENTITY: Self = Self {
        pixel_width: 1.0,
        row_rotation: 0.0,
        origin_x: 0.0,
        col_rotation: 0.0,
        pixel_height: 1.0,
        origin_y: 0.0,
    };

    /// North-up transform with no rotation.
    #[must_use]
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            pixel_width,
            row_rotation: 0.0,
            origin_x,
            col_rotation: 0.0,
            pixel_height,
            origin_y,
        }
    }

    /// Build from the six coefficients `[a, b, c, d, e, f]` in
    /// row-major affine matrix order.
    #[must_use]
    pub const fn from_coefficients(c: [f64; 6]) -> Self {
        Self {
            pixel_width: c[0],
            row_rotation: c[1],
            origin_x: c[2],
            col_rotation: c[3],
            pixel_height: c[4],
            origin_y: c[5],
        }
    }

    /// Build from a GDAL-ordered geotransform
    /// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
    #[must_use]
    pub const fn from_gdal(c: [f64; 6]) -> Self {
        Self {
            pixel_width: c[1],
            row_rotation: c[2],
            origin_x: c[0],
            col_rotation: c[4],
            pixel_height: c[5],
            origin_y: c[3],
        }
    }

    /// Map a (possibly fractional) pixel position to spatial coordinates.
    ///
    /// Integer positions address pixel corners, not centers.
    #[must_use]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self
            .pixel_width
            .mul_add(col, self.row_rotation.mul_add(row, self.origin_x));
        let y = self
            .col_rotation
            .mul_add(col, self.pixel_height.mul_add(row, self.origin_y));
        (x, y)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A multi-band raster plus its georeferencing transform.
///
/// Bands are stored as floating-point images so index math never
/// depends on the sample type of the source file. Every band has the
/// same dimensions and there is at least one band.
#[derive(Debug, Clone)]
pub struct RasterImage {
    bands: Vec<FloatImage>,
    transform: GeoTransform,
}

impl RasterImage {
    /// Assemble a raster from its bands.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::EmptyRaster`] if `bands` is empty or
    /// the bands have no pixels, and [`DetectionError::ShapeMismatch`]
    /// if the bands differ in size.
    pub fn new(bands: Vec<FloatImage>, transform: GeoTransform) -> Result<Self, DetectionError> {
        let Some(first) = bands.first() else {
            return Err(DetectionError::EmptyRaster);
        };
        if Dimensions::of(first).pixel_count() == 0 {
            return Err(DetectionError::EmptyRaster);
        }
        for band in &bands[1..] {
            ensure_same_dimensions(first, band)?;
        }
        Ok(Self { bands, transform })
    }

    /// Number of bands.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Borrow one band.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::BandOutOfRange`] if `index` is past
    /// the last band.
    pub fn band(&self, index: usize) -> Result<&FloatImage, DetectionError> {
        self.bands.get(index).ok_or(DetectionError::BandOutOfRange {
            band: index,
            available: self.bands.len(),
        })
    }

    /// All bands in order.
    #[must_use]
    pub fn bands(&self) -> &[FloatImage] {
        &self.bands
    }

    /// The georeferencing transform.
    #[must_use]
    pub const fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Replace the georeferencing transform.
    #[must_use]
    pub const fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Shared band dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        self.bands
            .first()
            .map_or(Dimensions { width: 0, height: 0 }, Dimensions::of)
    }

    /// Consume the raster, returning its bands and transform.
    #[must_use]
    pub fn into_parts(self) -> (Vec<FloatImage>, GeoTransform) {
        (self.bands, self.transform)
    }
}

/// Configuration for a change-detection run.
///
/// Constructed once per run and never mutated while the pipeline
/// executes. Numerical guards (index epsilon, SSIM window) are fixed
/// constants and deliberately not part of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// NDWI value above which a pixel is treated as water.
    pub water_threshold: f32,

    /// Whether water suppression is applied when NDWI is available.
    /// Affects both the change masks and the gain/loss counts.
    pub water_masking: bool,

    /// Half-width of the gain/loss dead zone around zero delta.
    pub delta_eps: f32,

    /// Smallest label the polygonizer treats as "on".
    pub polygon_min_value: u8,

    /// Drop polygon regions with fewer pixels than this.
    ///
    /// `None` disables area filtering entirely; there is no agreed
    /// default minimum.
    pub min_area_px: Option<u32>,

    /// Whether [`crate::detect`] polygonizes the refined masks.
    pub export_polygons: bool,
}

impl DetectionConfig {
    /// Default NDWI water threshold.
    pub const DEFAULT_WATER_THRESHOLD: f32 = 0.15;
    /// Default gain/loss dead-zone half-width.
    pub const DEFAULT_DELTA_EPS: f32 = 1e-3;
    /// Default minimum "on" label for polygon export.
    pub const DEFAULT_POLYGON_MIN_VALUE: u8 = 1;

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::InvalidConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), DetectionError> {
        if !self.water_threshold.is_finite() {
            return Err(DetectionError::InvalidConfig(format!(
                "water_threshold must be finite, got {}",
                self.water_threshold
            )));
        }
        if !self.delta_eps.is_finite() || self.delta_eps < 0.0 {
            return Err(DetectionError::InvalidConfig(format!(
                "delta_eps must be finite and non-negative, got {}",
                self.delta_eps
            )));
        }
        if self.polygon_min_value == 0 {
            return Err(DetectionError::InvalidConfig(
                "polygon_min_value must be at least 1".to_string(),
            ));
        }
        if self.min_area_px == Some(0) {
            return Err(DetectionError::InvalidConfig(
                "min_area_px must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            water_threshold: Self::DEFAULT_WATER_THRESHOLD,
            water_masking: true,
            delta_eps: Self::DEFAULT_DELTA_EPS,
            polygon_min_value: Self::DEFAULT_POLYGON_MIN_VALUE,
            min_area_px: None,
            export_polygons: true,
        }
    }
}

/// Changed-pixel summary of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeStats {
    /// Number of nonzero pixels.
    pub changed: u64,
    /// Number of pixels in the mask.
    pub total: u64,
    /// `100 * changed / max(total, 1)`.
    pub percent: f64,
}

/// Directional decomposition of a signed index delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainLossStats {
    /// Pixels whose index dropped by more than the dead zone.
    pub loss_px: u64,
    /// Pixels whose index rose by more than the dead zone.
    pub gain_px: u64,
    /// Number of pixels considered.
    pub total_px: u64,
    /// `100 * loss_px / max(total_px, 1)`.
    pub loss_pct: f64,
    /// `100 * gain_px / max(total_px, 1)`.
    pub gain_pct: f64,
    /// `gain_pct - loss_pct`.
    pub net_pct: f64,
}

/// Output of the index-delta path of [`crate::detect`].
#[derive(Debug, Clone)]
pub struct VegetationChange {
    /// Signed `ndvi_after - ndvi_before`.
    pub delta: FloatImage,
    /// Refined (and, when enabled, water-suppressed) change mask.
    pub mask: ChangeMask,
    /// Changed-pixel summary of `mask`.
    pub stats: ChangeStats,
    /// Gain/loss decomposition of `delta`.
    pub gain_loss: GainLossStats,
    /// Polygons of `mask` (empty when polygon export is disabled).
    pub polygons: FeatureCollection,
}

/// Output of the structural-similarity path of [`crate::detect`].
#[derive(Debug, Clone)]
pub struct StructuralChange {
    /// Global SSIM score in `[-1, 1]`.
    pub score: f64,
    /// Refined (and, when enabled, water-suppressed) change mask.
    pub mask: ChangeMask,
    /// Changed-pixel summary of `mask`.
    pub stats: ChangeStats,
    /// Polygons of `mask` (empty when polygon export is disabled).
    pub polygons: FeatureCollection,
}

/// Result of running [`crate::detect`] on an image pair.
///
/// The two paths are independent and are not required to agree.
#[derive(Debug, Clone)]
pub struct ChangeReport {
    /// Shared dimensions of both inputs.
    pub dimensions: Dimensions,
    /// Index-delta result, present only when spectral bands were selected.
    pub vegetation: Option<VegetationChange>,
    /// Structural-similarity result, always present.
    pub structural: StructuralChange,
    /// Whether water suppression was applied to the results.
    pub water_masked: bool,
}

/// Errors that can occur during change detection.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// Paired inputs have different shapes.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Dimensions of the reference input.
        expected: Dimensions,
        /// Dimensions of the offending input.
        actual: Dimensions,
    },

    /// A band index does not exist in the raster.
    #[error("band {band} out of range ({available} bands available)")]
    BandOutOfRange {
        /// Requested 0-based band index.
        band: usize,
        /// Number of bands in the raster.
        available: usize,
    },

    /// Image is smaller than the structural-similarity window.
    #[error("image {width}x{height} is smaller than the {min}x{min} similarity window")]
    ImageTooSmall {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Minimum side length.
        min: u32,
    },

    /// Raster has no bands or no pixels.
    #[error("raster has no bands or no pixels")]
    EmptyRaster,

    /// Detection configuration is invalid.
    #[error("invalid detection configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn band(w: u32, h: u32, v: f32) -> FloatImage {
        FloatImage::from_pixel(w, h, Luma([v]))
    }

    #[test]
    fn identity_transform_maps_pixels_to_themselves() {
        let (x, y) = GeoTransform::IDENTITY.apply(3.0, 7.0);
        assert!((x - 3.0).abs() < f64::EPSILON);
        assert!((y - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn north_up_transform_flips_rows() {
        let t = GeoTransform::north_up(500_000.0, 4_200_000.0, 10.0, -10.0);
        let (x, y) = t.apply(2.0, 3.0);
        assert!((x - 500_020.0).abs() < 1e-9);
        assert!((y - 4_199_970.0).abs() < 1e-9);
    }

    #[test]
    fn gdal_and_affine_orders_agree() {
        let affine = GeoTransform::from_coefficients([10.0, 0.5, 100.0, 0.25, -10.0, 200.0]);
        let gdal = GeoTransform::from_gdal([100.0, 10.0, 0.5, 200.0, 0.25, -10.0]);
        assert_eq!(affine, gdal);
    }

    #[test]
    fn with_transform_keeps_bands() {
        let raster = RasterImage::new(
            vec![FloatImage::from_pixel(3, 2, Luma([1.0])); 2],
            GeoTransform::IDENTITY,
        )
        .unwrap();
        let moved = GeoTransform::north_up(5.0, 6.0, 1.0, -1.0);
        let raster = raster.with_transform(moved);
        assert_eq!(*raster.transform(), moved);
        assert_eq!(raster.band_count(), 2);
    }

    #[test]
    fn raster_requires_bands() {
        let result = RasterImage::new(vec![], GeoTransform::IDENTITY);
        assert!(matches!(result, Err(DetectionError::EmptyRaster)));
    }

    #[test]
    fn raster_rejects_zero_sized_bands() {
        let result = RasterImage::new(vec![band(0, 4, 0.0)], GeoTransform::IDENTITY);
        assert!(matches!(result, Err(DetectionError::EmptyRaster)));
    }

    #[test]
    fn raster_rejects_mismatched_bands() {
        let result = RasterImage::new(
            vec![band(4, 4, 0.0), band(4, 5, 0.0)],
            GeoTransform::IDENTITY,
        );
        assert!(matches!(
            result,
            Err(DetectionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn raster_band_out_of_range() {
        let raster = RasterImage::new(vec![band(2, 2, 1.0)], GeoTransform::IDENTITY).unwrap();
        assert_eq!(raster.band_count(), 1);
        assert_eq!(
            raster.dimensions(),
            Dimensions {
                width: 2,
                height: 2
            }
        );
        assert!(matches!(
            raster.band(3),
            Err(DetectionError::BandOutOfRange {
                band: 3,
                available: 1
            })
        ));
    }

    #[test]
    fn config_defaults() {
        let config = DetectionConfig::default();
        assert!((config.water_threshold - 0.15).abs() < f32::EPSILON);
        assert!((config.delta_eps - 1e-3).abs() < f32::EPSILON);
        assert!(config.water_masking);
        assert_eq!(config.polygon_min_value, 1);
        assert_eq!(config.min_area_px, None);
        assert!(config.export_polygons);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let bad = [
            DetectionConfig {
                water_threshold: f32::NAN,
                ..DetectionConfig::default()
            },
            DetectionConfig {
                delta_eps: -0.1,
                ..DetectionConfig::default()
            },
            DetectionConfig {
                polygon_min_value: 0,
                ..DetectionConfig::default()
            },
            DetectionConfig {
                min_area_px: Some(0),
                ..DetectionConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(DetectionError::InvalidConfig(_))),
                "expected rejection for {config:?}"
            );
        }
    }

    #[test]
    fn config_serde_fills_missing_fields_with_defaults() {
        let config: DetectionConfig = serde_json::from_str(r#"{"water_threshold":0.3}"#).unwrap();
        assert!((config.water_threshold - 0.3).abs() < f32::EPSILON);
        assert!((config.delta_eps - DetectionConfig::DEFAULT_DELTA_EPS).abs() < f32::EPSILON);
    }

    #[test]
    fn config_serde_round_trip() {
        let config = DetectionConfig {
            water_threshold: 0.2,
            water_masking: false,
            delta_eps: 0.01,
            polygon_min_value: 128,
            min_area_px: Some(25),
            export_polygons: false,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: DetectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn shape_mismatch_display() {
        let err = DetectionError::ShapeMismatch {
            expected: Dimensions {
                width: 10,
                height: 20,
            },
            actual: Dimensions {
                width: 10,
                height: 21,
            },
        };
        assert_eq!(err.to_string(), "shape mismatch: expected 10x20, got 10x21");
    }

    #[test]
    fn image_too_small_display() {
        let err = DetectionError::ImageTooSmall {
            width: 5,
            height: 9,
            min: 7,
        };
        assert_eq!(
            err.to_string(),
            "image 5x9 is smaller than the 7x7 similarity window"
        );
    }
}
