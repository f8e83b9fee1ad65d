//! Reducers from masks and index pairs to change statistics.

use crate::refine::count_on;
use crate::types::{
    ChangeMask, ChangeStats, DetectionError, GainLossStats, IndexMap, ensure_same_dimensions,
};

/// Changed-pixel count and percentage of a mask.
#[must_use]
pub fn basic_stats(mask: &ChangeMask) -> ChangeStats {
    let changed = count_on(mask);
    let total = u64::from(mask.width()) * u64::from(mask.height());
    ChangeStats {
        changed,
        total,
        percent: percent_of(changed, total),
    }
}

/// Decompose `after - before` into gain and loss pixels.
///
/// When `water` is given, pixels where it exceeds `water_threshold` get
/// a delta of zero, so they count as neither gain nor loss. Pixels with
/// `|delta| <= delta_eps` are likewise neither.
///
/// # Errors
///
/// Returns [`DetectionError::ShapeMismatch`] if any of the inputs differ
/// in size.
pub fn gain_loss_stats(
    before: &IndexMap,
    after: &IndexMap,
    water: Option<&IndexMap>,
    water_threshold: f32,
    delta_eps: f32,
) -> Result<GainLossStats, DetectionError> {
    ensure_same_dimensions(before, after)?;
    if let Some(water) = water {
        ensure_same_dimensions(before, water)?;
    }

    let mut loss_px = 0u64;
    let mut gain_px = 0u64;
    for (x, y, b) in before.enumerate_pixels() {
        let is_water = water.is_some_and(|w| w.get_pixel(x, y).0[0] > water_threshold);
        let delta = if is_water {
            0.0
        } else {
            after.get_pixel(x, y).0[0] - b.0[0]
        };
        if delta < -delta_eps {
            loss_px += 1;
        } else if delta > delta_eps {
            gain_px += 1;
        }
    }

    let total_px = u64::from(before.width()) * u64::from(before.height());
    let loss_pct = percent_of(loss_px, total_px);
    let gain_pct = percent_of(gain_px, total_px);
    Ok(GainLossStats {
        loss_px,
        gain_px,
        total_px,
        loss_pct,
        gain_pct,
        net_pct: gain_pct - loss_pct,
    })
}

#[allow(clippy::cast_precision_loss)]
fn percent_of(count: u64, total: u64) -> f64 {
    100.0 * count as f64 / total.max(1) as f64
}
