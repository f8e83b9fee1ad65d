//! aetherscan-io: Raster I/O collaborators for the change-detection
//! pipeline.
//!
//! Decodes image bytes (multi-sample GeoTIFFs included) into multi-band
//! rasters, reads embedded or world-file georeferencing, stacks per-band
//! files, resamples a raster onto a reference grid, and encodes masks
//! and renderings as PNG. Operates on in-memory byte
//! slices and strings; reading and writing files is left to the caller.

pub mod align;
pub mod geotiff;
pub mod raster;
pub mod stack;

pub use align::{ResampleFilter, align_to};
pub use geotiff::Georeferencing;
pub use raster::{DecodedRaster, decode_raster, encode_gray_png, encode_rgb_png, parse_world_file};
pub use stack::stack_bands;

use aetherscan_pipeline::DetectionError;

/// Errors that can occur while reading or writing rasters.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// Failed to encode an output image.
    #[error("failed to encode image: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// Failed to decode a TIFF.
    #[error("failed to decode TIFF: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// The TIFF decoded but its sample layout cannot be split into bands.
    #[error("unsupported TIFF layout: {0}")]
    UnsupportedLayout(String),

    /// Band files to be stacked declare different coordinate systems.
    #[error(
        "band {band} is in {found} but band 0 is in {expected}; reproject to a common CRS before stacking"
    )]
    CrsMismatch {
        /// Zero-based position of the offending band.
        band: usize,
        /// CRS of the first band.
        expected: String,
        /// CRS of the offending band.
        found: String,
    },

    /// A world file could not be parsed.
    #[error("invalid world file: {0}")]
    WorldFile(String),

    /// The decoded or resampled bands do not form a valid raster.
    #[error(transparent)]
    Raster(#[from] DetectionError),
}
