//! GeoJSON serializer for change polygons.
//!
//! Produces an RFC 7946 `FeatureCollection` with one `Polygon` feature
//! per connected changed region. Each feature carries the mask label it
//! was traced from (`value`) and its pixel count (`pixel_count`).

use aetherscan_pipeline::FeatureCollection;

use crate::ExportError;

/// Serialize a feature collection as compact GeoJSON.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_geojson(collection: &FeatureCollection) -> Result<String, ExportError> {
    Ok(serde_json::to_string(collection)?)
}
