//! Raster decoding, world-file georeferencing and PNG encoding.
//!
//! Every channel of a decoded image becomes one floating-point band, so
//! a 4-sample GeoTIFF stacked as `B02,B03,B04,B08` yields four bands in
//! that order. Sample values keep their native scale (0..255 for 8-bit,
//! 0..65535 for 16-bit sources). TIFFs go through [`crate::geotiff`];
//! everything else through `image`.

use aetherscan_pipeline::types::{GrayImage, RgbImage};
use aetherscan_pipeline::{FloatImage, GeoTransform, RasterImage};
use image::{DynamicImage, ImageBuffer, ImageEncoder, Luma, Pixel};

use crate::IoError;
use crate::geotiff::{self, Georeferencing};

/// A decoded raster plus the georeferencing found in the file.
#[derive(Debug, Clone)]
pub struct DecodedRaster {
    /// The bands, placed with the embedded transform when there is one
    /// and with [`GeoTransform::IDENTITY`] otherwise.
    pub raster: RasterImage,
    /// Embedded GeoTIFF georeferencing.
    pub georeferencing: Option<Georeferencing>,
}

impl DecodedRaster {
    /// EPSG code of the embedded CRS, if any.
    #[must_use]
    pub fn epsg(&self) -> Option<u16> {
        self.georeferencing.and_then(|g| g.epsg)
    }
}

/// Decode image bytes into a multi-band raster.
///
/// TIFF input may carry its own georeferencing; PNG, JPEG and the other
/// formats never do, so callers place those with
/// [`RasterImage::with_transform`] (see [`parse_world_file`]).
///
/// # Errors
///
/// Returns [`IoError::EmptyInput`] if `bytes` is empty,
/// [`IoError::TiffDecode`] or [`IoError::UnsupportedLayout`] for
/// unreadable TIFFs, [`IoError::ImageDecode`] if any other format is
/// unrecognized or corrupt, and [`IoError::Raster`] if the decoded image
/// has no pixels.
pub fn decode_raster(bytes: &[u8]) -> Result<DecodedRaster, IoError> {
    if bytes.is_empty() {
        return Err(IoError::EmptyInput);
    }
    if geotiff::is_tiff(bytes) {
        let (bands, georeferencing) = geotiff::decode_tiff(bytes)?;
        let transform = georeferencing.map_or(GeoTransform::IDENTITY, |g| g.transform);
        return Ok(DecodedRaster {
            raster: RasterImage::new(bands, transform)?,
            georeferencing,
        });
    }

    let img = image::load_from_memory(bytes).map_err(IoError::ImageDecode)?;
    let color = img.color();
    let bands = split_dynamic(img);
    tracing::debug!(
        ?color,
        bands = bands.len(),
        width = bands.first().map(FloatImage::width),
        height = bands.first().map(FloatImage::height),
        "raster decoded"
    );
    Ok(DecodedRaster {
        raster: RasterImage::new(bands, GeoTransform::IDENTITY)?,
        georeferencing: None,
    })
}

fn split_dynamic(img: DynamicImage) -> Vec<FloatImage> {
    match img {
        DynamicImage::ImageLuma8(buf) => split_channels(&buf),
        DynamicImage::ImageLumaA8(buf) => split_channels(&buf),
        DynamicImage::ImageRgb8(buf) => split_channels(&buf),
        DynamicImage::ImageRgba8(buf) => split_channels(&buf),
        DynamicImage::ImageLuma16(buf) => split_channels(&buf),
        DynamicImage::ImageLumaA16(buf) => split_channels(&buf),
        DynamicImage::ImageRgb16(buf) => split_channels(&buf),
        DynamicImage::ImageRgba16(buf) => split_channels(&buf),
        DynamicImage::ImageRgb32F(buf) => split_channels(&buf),
        other => split_channels(&other.into_rgba32f()),
    }
}

/// One float band per channel of `buffer`.
fn split_channels<P>(buffer: &ImageBuffer<P, Vec<P::Subpixel>>) -> Vec<FloatImage>
where
    P: Pixel,
    P::Subpixel: Into<f32>,
{
    let (width, height) = buffer.dimensions();
    (0..usize::from(P::CHANNEL_COUNT))
        .map(|c| {
            FloatImage::from_fn(width, height, |x, y| {
                Luma([buffer.get_pixel(x, y).channels()[c].into()])
            })
        })
        .collect()
}

/// Parse an ESRI world file (`.tfw`, `.pgw`, `.jgw`, ...).
///
/// The six lines are `A, D, B, E, C, F`, where `(C, F)` is the center
/// of the upper-left pixel. The returned transform addresses pixel
/// corners, so the origin is shifted back by half a pixel.
///
/// # Errors
///
/// Returns [`IoError::WorldFile`] unless the text holds exactly six
/// finite numbers.
pub fn parse_world_file(text: &str) -> Result<GeoTransform, IoError> {
    let values = text
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| IoError::WorldFile(format!("not a finite number: {token:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let [a, d, b, e, c, f] = values[..] else {
        return Err(IoError::WorldFile(format!(
            "expected 6 values, found {}",
            values.len()
        )));
    };
    Ok(GeoTransform {
        pixel_width: a,
        row_rotation: b,
        origin_x: (-0.5f64).mul_add(a + b, c),
        col_rotation: d,
        pixel_height: e,
        origin_y: (-0.5f64).mul_add(d + e, f),
    })
}

/// Encode a single-channel image (mask, rendering) as PNG bytes.
///
/// # Errors
///
/// Returns [`IoError::ImageEncode`] if PNG encoding fails.
pub fn encode_gray_png(image: &GrayImage) -> Result<Vec<u8>, IoError> {
    encode_png(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::L8)
}

/// Encode an RGB image (composite, overlay) as PNG bytes.
///
/// # Errors
///
/// Returns [`IoError::ImageEncode`] if PNG encoding fails.
pub fn encode_rgb_png(image: &RgbImage) -> Result<Vec<u8>, IoError> {
    encode_png(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::Rgb8)
}

fn encode_png(
    raw: &[u8],
    width: u32,
    height: u32,
    color: image::ExtendedColorType,
) -> Result<Vec<u8>, IoError> {
    let mut png_bytes = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
    encoder
        .write_image(raw, width, height, color)
        .map_err(IoError::ImageEncode)?;
    Ok(png_bytes)
}
