//! Human-readable summary lines and the machine-readable JSON report.

use aetherscan_pipeline::{
    ChangeReport, ChangeStats, DetectionConfig, Dimensions, GainLossStats,
};
use serde::Serialize;

use crate::ExportError;

/// Serializable digest of a [`ChangeReport`] and the configuration that
/// produced it. Masks and polygons are left out; only their counts are
/// kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSummary {
    /// Shared dimensions of both inputs.
    pub dimensions: Dimensions,
    /// Whether water suppression was applied.
    pub water_masked: bool,
    /// Index-delta results, absent in grayscale-only runs.
    pub ndvi: Option<VegetationSummary>,
    /// Structural-similarity results.
    pub ssim: StructuralSummary,
    /// Configuration of the run, for reproducibility.
    pub config: DetectionConfig,
}

/// Index-delta part of a [`ChangeSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VegetationSummary {
    /// Changed-pixel summary of the refined mask.
    pub stats: ChangeStats,
    /// Gain/loss decomposition of the index delta.
    pub gain_loss: GainLossStats,
    /// Number of exported polygons.
    pub polygons: usize,
}

/// Structural-similarity part of a [`ChangeSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StructuralSummary {
    /// Global SSIM score.
    pub score: f64,
    /// Changed-pixel summary of the refined mask.
    pub stats: ChangeStats,
    /// Number of exported polygons.
    pub polygons: usize,
}

impl ChangeSummary {
    /// Digest a report.
    #[must_use]
    pub fn new(report: &ChangeReport, config: &DetectionConfig) -> Self {
        Self {
            dimensions: report.dimensions,
            water_masked: report.water_masked,
            ndvi: report.vegetation.as_ref().map(|v| VegetationSummary {
                stats: v.stats,
                gain_loss: v.gain_loss,
                polygons: v.polygons.len(),
            }),
            ssim: StructuralSummary {
                score: report.structural.score,
                stats: report.structural.stats,
                polygons: report.structural.polygons.len(),
            },
            config: config.clone(),
        }
    }
}

/// Legend lines describing a report, one per fact.
///
/// ```text
/// NDVI change: 400/10000 px = 4.00% (water-masked)
/// NDVI gain: 4.00% | loss: 0.00% | net: +4.00%
/// SSIM change: 512/10000 px = 5.12%
/// SSIM score: 0.9731
/// ```
#[must_use]
pub fn summary_lines(report: &ChangeReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(4);
    if let Some(vegetation) = &report.vegetation {
        let s = vegetation.stats;
        let suffix = if report.water_masked {
            " (water-masked)"
        } else {
            ""
        };
        lines.push(format!(
            "NDVI change: {}/{} px = {:.2}%{suffix}",
            s.changed, s.total, s.percent
        ));
        let gl = vegetation.gain_loss;
        lines.push(format!(
            "NDVI gain: {:.2}% | loss: {:.2}% | net: {:+.2}%",
            gl.gain_pct, gl.loss_pct, gl.net_pct
        ));
    }
    let s = report.structural.stats;
    lines.push(format!(
        "SSIM change: {}/{} px = {:.2}%",
        s.changed, s.total, s.percent
    ));
    lines.push(format!("SSIM score: {:.4}", report.structural.score));
    lines
}

/// Serialize a summary as indented JSON.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_report_json(summary: &ChangeSummary) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(summary)?)
}
