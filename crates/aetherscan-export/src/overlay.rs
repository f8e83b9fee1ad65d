//! Visual review renderings: true-color composites, change overlays and
//! side-by-side panels.

use aetherscan_pipeline::grayscale::{
    HIGH_PERCENTILE, LOW_PERCENTILE, percentile_bounds, percentile_stretch, stretch_to_u8,
};
use aetherscan_pipeline::types::{GrayImage, RgbImage};
use aetherscan_pipeline::{ChangeMask, Dimensions, RasterImage};
use image::Rgb;

use crate::ExportError;

/// Weight of the red overlay added on top of changed pixels.
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.45;

/// Render a raster for display.
///
/// With at least three bands, the first three are taken as blue, green
/// and red (the `B02,B03,B04` order of a stacked scene) and stretched
/// jointly between their 2nd and 98th percentiles. Otherwise the first
/// band is stretched on its own and replicated to gray.
#[must_use = "returns the composite image"]
pub fn rgb_composite(raster: &RasterImage) -> RgbImage {
    let bands = raster.bands();
    let [blue, green, red, ..] = bands else {
        let gray = bands
            .first()
            .map_or_else(|| GrayImage::new(0, 0), percentile_stretch);
        return RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            let v = gray.get_pixel(x, y).0[0];
            Rgb([v, v, v])
        });
    };

    let samples = [blue, green, red]
        .into_iter()
        .flat_map(|band| band.pixels().map(|p| p.0[0]));
    let Some((lo, hi)) = percentile_bounds(samples, LOW_PERCENTILE, HIGH_PERCENTILE) else {
        return RgbImage::new(red.width(), red.height());
    };
    let (r, g, b) = (
        stretch_to_u8(red, lo, hi),
        stretch_to_u8(green, lo, hi),
        stretch_to_u8(blue, lo, hi),
    );
    RgbImage::from_fn(red.width(), red.height(), |x, y| {
        Rgb([
            r.get_pixel(x, y).0[0],
            g.get_pixel(x, y).0[0],
            b.get_pixel(x, y).0[0],
        ])
    })
}

/// Tint changed pixels red.
///
/// Where the mask is nonzero, `alpha * 255` is added to the red channel
/// (saturating); other pixels are copied unchanged.
///
/// # Errors
///
/// Returns [`ExportError::ShapeMismatch`] if the mask and image differ
/// in size.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn overlay_mask(rgb: &RgbImage, mask: &ChangeMask, alpha: f32) -> Result<RgbImage, ExportError> {
    let expected = Dimensions::of(rgb);
    let actual = Dimensions::of(mask);
    if expected != actual {
        return Err(ExportError::ShapeMismatch { expected, actual });
    }

    let tint = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    Ok(RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
        if mask.get_pixel(x, y).0[0] == 0 {
            Rgb([r, g, b])
        } else {
            Rgb([r.saturating_add(tint), g, b])
        }
    }))
}

/// Place panels side by side, left to right.
///
/// Every panel is resized to the size of the first one.
///
/// # Errors
///
/// Returns [`ExportError::NoPanels`] if `panels` is empty.
pub fn stack_horizontal(panels: &[RgbImage]) -> Result<RgbImage, ExportError> {
    let first = panels.first().ok_or(ExportError::NoPanels)?;
    let (width, height) = first.dimensions();
    let count = u32::try_from(panels.len()).unwrap_or(u32::MAX);

    let mut out = RgbImage::new(width.saturating_mul(count), height);
    for (i, panel) in (0u32..).zip(panels) {
        let resized;
        let panel = if panel.dimensions() == (width, height) {
            panel
        } else {
            tracing::debug!(
                panel = i,
                from = %Dimensions::of(panel),
                to = %Dimensions::of(first),
                "resizing panel"
            );
            resized = image::imageops::resize(
                panel,
                width,
                height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        };
        image::imageops::replace(&mut out, panel, i64::from(i * width), 0);
    }
    Ok(out)
}
