use ndarray::prelude::*;

use crate::ensemble::EnsembleMember;
use crate::errors::{CoastSegError, Result};

/// Distance-from-boundary confidence: `p` where `p >= threshold`, `1 - p`
/// below it. Non-finite results are zeroed.
pub fn build_confidence(map: ArrayView2<f32>, threshold: f32) -> Array2<f32> {
    map.mapv(|p| {
        let mut confidence = 1.0 - p;
        if p < threshold {
            confidence = p;
        }
        let confidence = 1.0 - confidence;
        if confidence.is_finite() {
            confidence
        } else {
            0.0
        }
    })
}

/// Per-pixel standard deviation (population) across the resized member
/// predictions, ignoring their weights.
pub fn build_variance(members: &[EnsembleMember]) -> Result<Array2<f32>> {
    let views: Vec<_> = members.iter().map(|m| m.prediction.view()).collect();
    if views.is_empty() {
        return Err(CoastSegError::validation("ensemble", "has no members"));
    }
    let stacked = ndarray::stack(Axis(2), &views)?;
    let spread = stacked
        .std_axis(Axis(2), 0.0)
        .mapv(|v| if v.is_finite() { v } else { 0.0 });
    Ok(spread)
}

/// Mean of the confidence map, reported once per image.
pub fn overall_confidence(confidence: ArrayView2<f32>) -> f32 {
    confidence.mean().unwrap_or(0.0)
}
