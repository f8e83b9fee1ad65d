//! Band selection: decide once, per image pair, whether index-based
//! detection is possible and which bands feed it.

use serde::{Deserialize, Serialize};

use crate::types::{DetectionError, RasterImage};

/// Red band of the default stacked `B02,B03,B04,B08` layout.
pub const DEFAULT_RED_BAND: usize = 2;
/// NIR band of the default stacked layout.
pub const DEFAULT_NIR_BAND: usize = 3;
/// Green band of the default stacked layout, also the NDWI fallback.
pub const DEFAULT_GREEN_BAND: usize = 1;

/// Band indices requested by the caller (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandRequest {
    /// Explicit red band. Only used together with `nir`.
    pub red: Option<usize>,
    /// Explicit near-infrared band. Only used together with `red`.
    pub nir: Option<usize>,
    /// Green band for NDWI.
    pub green: usize,
}

impl Default for BandRequest {
    fn default() -> Self {
        Self {
            red: None,
            nir: None,
            green: DEFAULT_GREEN_BAND,
        }
    }
}

/// Resolved band indices for index-based detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectralBands {
    /// Red band, present in both rasters.
    pub red: usize,
    /// Near-infrared band, present in both rasters.
    pub nir: usize,
    /// Green band of the earlier raster.
    pub green_before: usize,
    /// Green band of the later raster.
    pub green_after: usize,
}

/// Outcome of the capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandSelection {
    /// NDVI/NDWI can be computed; both detection paths run.
    Spectral(SpectralBands),
    /// No red/NIR pair; only structural similarity on band 0 runs.
    GrayscaleOnly,
}

impl BandSelection {
    /// Decide which bands to use for a pair of rasters.
    ///
    /// - Explicit `red` and `nir` must exist in both rasters.
    /// - Otherwise, if both rasters have at least four bands, the default
    ///   stacked layout is assumed.
    /// - Otherwise detection is grayscale-only.
    ///
    /// A requested green band missing from a raster falls back to
    /// [`DEFAULT_GREEN_BAND`] for that raster.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::BandOutOfRange`] if an explicit red or
    /// NIR index, or the green fallback, is missing from either raster.
    pub fn resolve(
        before: &RasterImage,
        after: &RasterImage,
        request: &BandRequest,
    ) -> Result<Self, DetectionError> {
        let (red, nir) = match (request.red, request.nir) {
            (Some(red), Some(nir)) => {
                for raster in [before, after] {
                    raster.band(red)?;
                    raster.band(nir)?;
                }
                (red, nir)
            }
            _ if before.band_count() >= 4 && after.band_count() >= 4 => {
                (DEFAULT_RED_BAND, DEFAULT_NIR_BAND)
            }
            _ => {
                tracing::info!(
                    before_bands = before.band_count(),
                    after_bands = after.band_count(),
                    "no red/NIR pair available; index-based detection disabled"
                );
                return Ok(Self::GrayscaleOnly);
            }
        };

        let green_for = |raster: &RasterImage| -> Result<usize, DetectionError> {
            if request.green < raster.band_count() {
                Ok(request.green)
            } else {
                raster.band(DEFAULT_GREEN_BAND).map(|_| DEFAULT_GREEN_BAND)
            }
        };
        let bands = SpectralBands {
            red,
            nir,
            green_before: green_for(before)?,
            green_after: green_for(after)?,
        };
        tracing::debug!(?bands, "spectral bands selected");
        Ok(Self::Spectral(bands))
    }

    /// The spectral bands, if index-based detection is possible.
    #[must_use]
    pub const fn spectral(&self) -> Option<&SpectralBands> {
        match self {
            Self::Spectral(bands) => Some(bands),
            Self::GrayscaleOnly => None,
        }
    }
}
