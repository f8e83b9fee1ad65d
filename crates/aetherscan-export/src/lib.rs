//! aetherscan-export: Pure serializers and renderers (sans-IO)
//!
//! Converts detection results into output formats: GeoJSON for the
//! change polygons, RGB overlays and side-by-side panels for visual
//! review, and summary text plus a JSON report for the statistics.
//! Every function returns a `String` or an in-memory image.

pub mod geojson;
pub mod overlay;
pub mod report;

pub use geojson::to_geojson;
pub use overlay::{DEFAULT_OVERLAY_ALPHA, overlay_mask, rgb_composite, stack_horizontal};
pub use report::{ChangeSummary, summary_lines, to_report_json};

use aetherscan_pipeline::Dimensions;

/// Errors that can occur during export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// JSON serialization failed.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// An overlay mask does not match its base image.
    #[error("shape mismatch: image is {expected}, mask is {actual}")]
    ShapeMismatch {
        /// Dimensions of the base image.
        expected: Dimensions,
        /// Dimensions of the mask.
        actual: Dimensions,
    },

    /// Nothing to render.
    #[error("no panels to stack")]
    NoPanels,
}
