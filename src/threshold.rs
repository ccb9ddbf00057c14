//! Decision threshold for the one-class probability map.

use ndarray::prelude::*;

/// Threshold used when the map has too little dynamic range for Otsu, and the
/// ceiling applied to Otsu's answer.
pub const DEFAULT_THRESHOLD: f32 = 0.75;
/// Minimum `max - min` spread before the histogram method is trusted.
pub const MIN_DYNAMIC_RANGE: f32 = 0.5;

const NUM_BINS: usize = 256;

/// Otsu's method on a 256-bin histogram spanning `[min, max]` of the finite
/// values. Returns the centre of the bin that maximises the between-class
/// variance, matching scikit-image's `threshold_otsu`.
///
/// Empty input yields `None`; a constant input yields that constant.
pub fn otsu_threshold<'a, I>(values: I) -> Option<f32>
where
    I: IntoIterator<Item = &'a f32>,
    I::IntoIter: Clone,
{
    let values = values.into_iter().copied().filter(|v| v.is_finite());
    let (min, max) = values
        .clone()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(f64::from(v)), hi.max(f64::from(v)))
        });
    if min > max {
        return None;
    }
    if min == max {
        return Some(min as f32);
    }

    let bin_width = (max - min) / NUM_BINS as f64;
    let mut histogram = [0f64; NUM_BINS];
    for v in values {
        let bin = ((f64::from(v) - min) / bin_width) as usize;
        histogram[bin.min(NUM_BINS - 1)] += 1.0;
    }
    let centres: Vec<f64> = (0..NUM_BINS)
        .map(|i| min + bin_width * (i as f64 + 0.5))
        .collect();

    // Class weights and means for "at or below bin i" and "above bin i".
    let mut weight_low = [0f64; NUM_BINS];
    let mut mass_low = [0f64; NUM_BINS];
    let (mut w, mut m) = (0.0, 0.0);
    for i in 0..NUM_BINS {
        w += histogram[i];
        m += histogram[i] * centres[i];
        weight_low[i] = w;
        mass_low[i] = m;
    }
    let (total_weight, total_mass) = (w, m);

    let mut best = (f64::NEG_INFINITY, 0usize);
    for i in 0..NUM_BINS - 1 {
        let w1 = weight_low[i];
        let w2 = total_weight - w1;
        if w1 == 0.0 || w2 == 0.0 {
            continue;
        }
        let mean1 = mass_low[i] / w1;
        let mean2 = (total_mass - mass_low[i]) / w2;
        let variance = w1 * w2 * (mean1 - mean2).powi(2);
        if variance > best.0 {
            best = (variance, i);
        }
    }

    Some(centres[best.1] as f32)
}

/// Pick the decision threshold for one probability map.
///
/// Maps with a spread above [`MIN_DYNAMIC_RANGE`] get Otsu's threshold capped
/// at [`DEFAULT_THRESHOLD`]; flatter maps use the default directly. The result
/// always lies in `(0, 0.75]`.
pub fn select_threshold(map: ArrayView2<f32>) -> f32 {
    let (min, max) = map
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if max - min > MIN_DYNAMIC_RANGE {
        match otsu_threshold(map.iter()) {
            Some(threshold) if threshold > 0.0 => {
                log::info!("Otsu threshold: {threshold:.6}");
                threshold.min(DEFAULT_THRESHOLD)
            }
            _ => {
                log::warn!("Otsu threshold unusable, falling back to {DEFAULT_THRESHOLD}");
                DEFAULT_THRESHOLD
            }
        }
    } else {
        log::info!("Default threshold: {DEFAULT_THRESHOLD:.6}");
        DEFAULT_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bimodal(low: f32, high: f32) -> Array2<f32> {
        Array2::from_shape_fn((64, 64), |(r, c)| {
            let jitter = ((r * 31 + c * 17) % 10) as f32 * 0.005;
            if c < 32 {
                low + jitter
            } else {
                high - jitter
            }
        })
    }

    #[test]
    fn test_otsu_splits_bimodal_values() {
        let map = bimodal(0.05, 0.95);
        let threshold = otsu_threshold(map.iter()).unwrap_or_default();
        assert!(threshold > 0.05 && threshold < 0.95, "{threshold}");
    }

    #[test]
    fn test_otsu_degenerate_inputs() {
        assert_eq!(otsu_threshold(&[] as &[f32]), None);
        assert_eq!(otsu_threshold(&[0.3f32; 10]), Some(0.3));
        assert_eq!(otsu_threshold(&[f32::NAN, 0.4]), Some(0.4));
    }

    #[test]
    fn test_wide_range_uses_otsu() {
        // range 0.9
        let map = bimodal(0.05, 0.95);
        let threshold = select_threshold(map.view());
        assert!(threshold != DEFAULT_THRESHOLD);
        assert!(threshold > 0.0 && threshold <= DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_otsu_result_is_capped() {
        // most mass near 1.0, a thin dark tail: Otsu lands high
        let map = Array2::from_shape_fn((50, 50), |(r, c)| {
            if r == 0 && c < 5 {
                0.0
            } else if (r + c) % 2 == 0 {
                0.9
            } else {
                1.0
            }
        });
        let raw = otsu_threshold(map.iter()).unwrap_or_default();
        assert!(raw > DEFAULT_THRESHOLD);
        assert_eq!(select_threshold(map.view()), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_narrow_range_uses_default() {
        let map = Array2::from_shape_fn((16, 16), |(r, _)| 0.3 + r as f32 * 0.01);
        assert_eq!(select_threshold(map.view()), DEFAULT_THRESHOLD);
        assert_eq!(select_threshold(Array2::zeros((8, 8)).view()), DEFAULT_THRESHOLD);
    }
}
