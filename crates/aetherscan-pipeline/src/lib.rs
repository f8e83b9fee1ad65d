//! aetherscan-pipeline: Land-cover change detection between two
//! co-registered rasters (sans-IO).
//!
//! Turns a before/after pair of multi-band rasters into binary change
//! masks, change statistics and vector polygons through:
//! band math (NDVI/NDWI) -> change estimation (index delta and
//! structural similarity) -> mask refinement -> stats and polygons.
//!
//! This crate has **no I/O dependencies**: rasters arrive as in-memory
//! float bands plus an affine transform. Decoding and resampling live in
//! `aetherscan-io`; rendering and serialization in `aetherscan-export`.

pub mod bands;
pub mod estimator;
pub mod grayscale;
pub mod index;
pub mod polygon;
pub mod refine;
pub mod ssim;
pub mod stats;
pub mod threshold;
pub mod types;

pub use bands::{BandRequest, BandSelection, SpectralBands};
pub use estimator::ChangeMethod;
pub use polygon::{FeatureCollection, PolygonFeature, PolygonizeOptions};
pub use types::{
    ChangeMask, ChangeReport, ChangeStats, DetectionConfig, DetectionError, Dimensions,
    FloatImage, GainLossStats, GeoTransform, IndexMap, MASK_ON, RasterImage, StructuralChange,
    VegetationChange,
};

/// Run both change-detection paths on a raster pair.
///
/// # Pipeline steps
///
/// 1. NDVI of both dates and the mean NDWI water field (spectral only)
/// 2. Index-delta mask, water suppression, stats, gain/loss, polygons
///    (spectral only)
/// 3. Percentile-stretched renderings of the red band, or band 0 when
///    no spectral bands are selected
/// 4. Structural-similarity mask, water suppression when NDWI is
///    available, stats, polygons
///
/// Polygons are placed with the transform of `before`.
///
/// # Errors
///
/// Returns [`DetectionError::InvalidConfig`] for an invalid `config`,
/// [`DetectionError::ShapeMismatch`] if the rasters differ in size,
/// [`DetectionError::BandOutOfRange`] if `selection` names a band a
/// raster lacks, and [`DetectionError::ImageTooSmall`] if the rasters
/// are smaller than the similarity window.
pub fn detect(
    before: &RasterImage,
    after: &RasterImage,
    selection: &BandSelection,
    config: &DetectionConfig,
) -> Result<ChangeReport, DetectionError> {
    config.validate()?;
    let dimensions = before.dimensions();
    if after.dimensions() != dimensions {
        return Err(DetectionError::ShapeMismatch {
            expected: dimensions,
            actual: after.dimensions(),
        });
    }
    let transform = before.transform();
    let options = PolygonizeOptions::from(config);
    let polygonize = |mask: &ChangeMask| {
        if config.export_polygons {
            polygon::to_polygons(mask, transform, options)
        } else {
            FeatureCollection::default()
        }
    };

    // 1-2. Index-delta path.
    let (vegetation, water, ssim_band) = match selection {
        BandSelection::Spectral(bands) => {
            let ndvi_before = index::compute_ndvi(before.band(bands.nir)?, before.band(bands.red)?)?;
            let ndvi_after = index::compute_ndvi(after.band(bands.nir)?, after.band(bands.red)?)?;
            let ndwi = index::mean_index(
                &index::compute_ndwi(before.band(bands.green_before)?, before.band(bands.nir)?)?,
                &index::compute_ndwi(after.band(bands.green_after)?, after.band(bands.nir)?)?,
            )?;
            let water = config.water_masking.then_some(ndwi);

            let estimate = estimator::delta_mask(&ndvi_before, &ndvi_after)?;
            let mask = match &water {
                Some(ndwi) => refine::suppress_water(&estimate.mask, ndwi, config.water_threshold)?,
                None => estimate.mask,
            };
            let gain_loss = stats::gain_loss_stats(
                &ndvi_before,
                &ndvi_after,
                water.as_ref(),
                config.water_threshold,
                config.delta_eps,
            )?;
            let vegetation = VegetationChange {
                delta: estimate.delta,
                stats: stats::basic_stats(&mask),
                gain_loss,
                polygons: polygonize(&mask),
                mask,
            };
            (Some(vegetation), water, bands.red)
        }
        BandSelection::GrayscaleOnly => (None, None, 0),
    };

    // 3-4. Structural-similarity path.
    let estimate = estimator::ssim_mask(
        &grayscale::percentile_stretch(before.band(ssim_band)?),
        &grayscale::percentile_stretch(after.band(ssim_band)?),
    )?;
    let mask = match &water {
        Some(ndwi) => refine::suppress_water(&estimate.mask, ndwi, config.water_threshold)?,
        None => estimate.mask,
    };
    let structural = StructuralChange {
        score: estimate.score,
        stats: stats::basic_stats(&mask),
        polygons: polygonize(&mask),
        mask,
    };

    tracing::debug!(
        %dimensions,
        vegetation_changed = vegetation.as_ref().map(|v| v.stats.changed),
        structural_changed = structural.stats.changed,
        water_masked = water.is_some(),
        "change detection finished"
    );
    Ok(ChangeReport {
        dimensions,
        vegetation,
        structural,
        water_masked: water.is_some(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Luma;

    use super::*;

    const SIZE: u32 = 40;

    fn in_block(x: u32, y: u32) -> bool {
        (10..30).contains(&x) && (10..30).contains(&y)
    }

    /// Four-band raster in `B02,B03,B04,B08` order.
    fn four_band(green: f32, nir: impl Fn(u32, u32) -> f32) -> RasterImage {
        let flat = |v: f32| FloatImage::from_pixel(SIZE, SIZE, Luma([v]));
        let nir = FloatImage::from_fn(SIZE, SIZE, |x, y| Luma([nir(x, y)]));
        RasterImage::new(
            vec![flat(0.1), flat(green), flat(0.1), nir],
            GeoTransform::IDENTITY,
        )
        .unwrap()
    }

    fn greening_pair(green: f32) -> (RasterImage, RasterImage) {
        let before = four_band(green, |_, _| 0.1);
        let after = four_band(green, |x, y| if in_block(x, y) { 0.9 } else { 0.1 });
        (before, after)
    }

    fn spectral(before: &RasterImage, after: &RasterImage) -> BandSelection {
        BandSelection::resolve(before, after, &BandRequest::default()).unwrap()
    }

    #[test]
    fn vegetation_gain_is_detected() {
        let (before, after) = greening_pair(0.1);
        let report = detect(&before, &after, &spectral(&before, &after), &DetectionConfig::default()).unwrap();

        let vegetation = report.vegetation.unwrap();
        assert_eq!(vegetation.stats.changed, 400);
        assert_eq!(vegetation.stats.total, 1600);
        assert!((vegetation.stats.percent - 25.0).abs() < 1e-9);
        assert_eq!(vegetation.gain_loss.gain_px, 400);
        assert_eq!(vegetation.gain_loss.loss_px, 0);
        assert_eq!(vegetation.polygons.len(), 1);
        assert_eq!(vegetation.polygons.features[0].value, MASK_ON);
        assert!(report.water_masked);
    }

    #[test]
    fn unchanged_red_band_has_no_structural_change() {
        let (before, after) = greening_pair(0.1);
        let report = detect(&before, &after, &spectral(&before, &after), &DetectionConfig::default()).unwrap();
        assert_eq!(report.structural.stats.changed, 0);
        assert!(report.structural.polygons.is_empty());
        assert!((report.structural.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn water_suppresses_both_paths() {
        let (before, after) = greening_pair(0.9);
        let report = detect(&before, &after, &spectral(&before, &after), &DetectionConfig::default()).unwrap();
        let vegetation = report.vegetation.unwrap();
        assert_eq!(vegetation.stats.changed, 0);
        assert_eq!(vegetation.gain_loss.gain_px, 0);
        assert!(vegetation.polygons.is_empty());
    }

    #[test]
    fn water_masking_can_be_disabled() {
        let (before, after) = greening_pair(0.9);
        let config = DetectionConfig {
            water_masking: false,
            ..DetectionConfig::default()
        };
        let report = detect(&before, &after, &spectral(&before, &after), &config).unwrap();
        assert!(!report.water_masked);
        let vegetation = report.vegetation.unwrap();
        assert_eq!(vegetation.stats.changed, 400);
        assert_eq!(vegetation.gain_loss.gain_px, 400);
    }

    #[test]
    fn polygon_export_can_be_disabled() {
        let (before, after) = greening_pair(0.1);
        let config = DetectionConfig {
            export_polygons: false,
            ..DetectionConfig::default()
        };
        let report = detect(&before, &after, &spectral(&before, &after), &config).unwrap();
        let vegetation = report.vegetation.unwrap();
        assert_eq!(vegetation.stats.changed, 400);
        assert!(vegetation.polygons.is_empty());
    }

    #[test]
    fn grayscale_only_runs_structural_path_on_band_zero() {
        let before = RasterImage::new(
            vec![FloatImage::from_pixel(SIZE, SIZE, Luma([100.0]))],
            GeoTransform::IDENTITY,
        )
        .unwrap();
        let after = RasterImage::new(
            vec![FloatImage::from_fn(SIZE, SIZE, |x, y| {
                if in_block(x, y) && (x + y) % 2 == 0 {
                    Luma([400.0])
                } else {
                    Luma([100.0])
                }
            })],
            GeoTransform::IDENTITY,
        )
        .unwrap();
        let selection = spectral(&before, &after);
        assert_eq!(selection, BandSelection::GrayscaleOnly);

        let report = detect(&before, &after, &selection, &DetectionConfig::default()).unwrap();
        assert!(report.vegetation.is_none());
        assert!(!report.water_masked);
        assert!(report.structural.stats.changed > 0);
        assert!(report.structural.score < 1.0);
        assert_eq!(report.structural.mask.get_pixel(20, 20).0[0], MASK_ON);
        assert_eq!(report.structural.mask.get_pixel(1, 1).0[0], 0);
    }

    #[test]
    fn mismatched_rasters_are_rejected() {
        let before = four_band(0.1, |_, _| 0.1);
        let after = RasterImage::new(
            vec![FloatImage::new(SIZE + 1, SIZE); 4],
            GeoTransform::IDENTITY,
        )
        .unwrap();
        let result = detect(&before, &after, &BandSelection::GrayscaleOnly, &DetectionConfig::default());
        assert!(matches!(result, Err(DetectionError::ShapeMismatch { .. })));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (before, after) = greening_pair(0.1);
        let config = DetectionConfig {
            delta_eps: -1.0,
            ..DetectionConfig::default()
        };
        let result = detect(&before, &after, &BandSelection::GrayscaleOnly, &config);
        assert!(matches!(result, Err(DetectionError::InvalidConfig(_))));
    }
}
