//! Band stacking: build one multi-band raster from per-band files.
//!
//! Sentinel-2 style products ship every band as its own file, often at
//! different resolutions (10 m visible/NIR next to 20 m red-edge). The
//! first band fixes the output grid and georeferencing; every other
//! band is resampled onto it with nearest-neighbor so sample values are
//! never blended.

use aetherscan_pipeline::{DetectionError, FloatImage, RasterImage};

use crate::IoError;
use crate::align::{ResampleFilter, align_to};
use crate::raster::DecodedRaster;

/// Stack the first band of each source, in order.
///
/// # Errors
///
/// Returns [`IoError::Raster`] if `sources` is empty,
/// [`IoError::CrsMismatch`] if the sources do not all declare the same
/// EPSG code (a source without one counts as different from one with
/// one), and [`IoError::Raster`] if resampling fails.
pub fn stack_bands(sources: Vec<DecodedRaster>) -> Result<DecodedRaster, IoError> {
    let mut sources = sources.into_iter().enumerate();
    let Some((_, first)) = sources.next() else {
        return Err(DetectionError::EmptyRaster.into());
    };
    let reference = first.raster.dimensions();
    let crs = first.epsg();
    let georeferencing = first.georeferencing;
    let transform = *first.raster.transform();

    let mut bands = vec![first_band(first.raster)?];
    for (index, source) in sources {
        if source.epsg() != crs {
            return Err(IoError::CrsMismatch {
                band: index,
                expected: crs_label(crs),
                found: crs_label(source.epsg()),
            });
        }
        if source.raster.band_count() > 1 {
            tracing::warn!(
                band = index,
                count = source.raster.band_count(),
                "band source has several bands; stacking the first"
            );
        }
        let single = RasterImage::new(vec![first_band(source.raster)?], transform)?;
        let (aligned, _) = align_to(reference, single, ResampleFilter::Nearest)?;
        bands.push(first_band(aligned)?);
    }

    tracing::info!(bands = bands.len(), grid = %reference, "stacked band files");
    Ok(DecodedRaster {
        raster: RasterImage::new(bands, transform)?,
        georeferencing,
    })
}

fn first_band(raster: RasterImage) -> Result<FloatImage, IoError> {
    let (bands, _) = raster.into_parts();
    bands
        .into_iter()
        .next()
        .ok_or(IoError::Raster(DetectionError::EmptyRaster))
}

fn crs_label(epsg: Option<u16>) -> String {
    epsg.map_or_else(|| "none".to_owned(), |code| format!("EPSG:{code}"))
}
