//! Single-pass segmentation for models with more than one class.

use image::{Rgb, RgbImage};
use ndarray::prelude::*;

use crate::errors::{CoastSegError, Result};
use crate::raster::resize_plane;
use crate::traits::PredictionOracle;

/// Class colors, cycled when there are more than ten classes.
pub const PALETTE: [[u8; 3]; 10] = [
    [0x33, 0x66, 0xCC],
    [0xDC, 0x39, 0x12],
    [0xFF, 0x99, 0x00],
    [0x10, 0x96, 0x18],
    [0x99, 0x00, 0x99],
    [0x00, 0x99, 0xC6],
    [0xDD, 0x44, 0x77],
    [0x66, 0xAA, 0x00],
    [0xB8, 0x2E, 0x2E],
    [0x31, 0x63, 0x95],
];

const MAX_CLASSES: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone)]
pub struct MulticlassPrediction {
    /// Per-pixel argmax class at native resolution
    pub labels: Array2<u8>,
    /// Winning class score, non-finite values zeroed
    pub confidence: Array2<f32>,
    pub color: RgbImage,
}

/// Square maximum filter of side `size`, edges clamped.
///
/// The window for output index `i` spans inputs `i - size/2 ..= i - size/2 + size - 1`,
/// the same placement `scipy.ndimage.maximum_filter` uses.
pub fn max_filter(plane: ArrayView2<f32>, size: usize) -> Array2<f32> {
    if size <= 1 {
        return plane.to_owned();
    }
    let across = filter_lanes(plane, Axis(1), size);
    filter_lanes(across.view(), Axis(0), size)
}

fn filter_lanes(plane: ArrayView2<f32>, axis: Axis, size: usize) -> Array2<f32> {
    let before = size / 2;
    let mut out = plane.to_owned();
    for (src, mut dst) in plane.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let len = src.len();
        for i in 0..len {
            let lo = i.saturating_sub(before);
            let hi = (i + size - before).min(len);
            dst[i] = src
                .slice(s![lo..hi])
                .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        }
    }
    out
}

/// Side of the max-filter window: native rows over twice the class count,
/// at least one.
pub fn filter_size(rows: u32, nclasses: usize) -> usize {
    (rows as usize / (2 * nclasses.max(1))).max(1)
}

/// Segment one standardized image with a `nclasses`-way model.
///
/// `raw` is the native band stack used to black out empty source pixels and
/// `native` is `(width, height)`. The oracle is reset after the forward pass.
pub fn predict_multiclass<O: PredictionOracle>(
    image: ArrayView3<f32>,
    raw: ArrayView3<u8>,
    oracle: &O,
    nclasses: usize,
    native: (u32, u32),
) -> Result<MulticlassPrediction> {
    if nclasses > MAX_CLASSES {
        return Err(CoastSegError::validation(
            "nclasses",
            format!("at most {MAX_CLASSES} classes fit an 8-bit label map, got {nclasses}"),
        ));
    }

    let prediction = oracle.predict(image);
    let reset = oracle.reset();
    let prediction = prediction?;
    reset?;

    let classes = prediction.dim().2;
    if classes != nclasses {
        return Err(CoastSegError::validation(
            "prediction",
            format!("expected {nclasses} output channels, got {classes}"),
        ));
    }

    let (width, height) = native;
    let size = filter_size(height, nclasses);
    let planes = prediction
        .axis_iter(Axis(2))
        .map(|plane| resize_plane(max_filter(plane, size).view(), height, width))
        .collect::<Result<Vec<_>>>()?;

    let shape = (height as usize, width as usize);
    let mut labels = Array2::<u8>::zeros(shape);
    let mut confidence = Array2::<f32>::zeros(shape);
    for ((r, c), label) in labels.indexed_iter_mut() {
        let (best, score) = planes
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |(best, score), (class, plane)| {
                let v = plane[[r, c]];
                if v > score {
                    (class, v)
                } else {
                    (best, score)
                }
            });
        // best < MAX_CLASSES
        *label = best as u8;
        confidence[[r, c]] = if score.is_finite() { score } else { 0.0 };
    }

    let color = colorize(labels.view(), raw);
    Ok(MulticlassPrediction {
        labels,
        confidence,
        color,
    })
}

/// Paint each label with its palette color; pixels whose first source band is
/// zero stay black.
pub fn colorize(labels: ArrayView2<u8>, raw: ArrayView3<u8>) -> RgbImage {
    let (rows, cols) = labels.dim();
    RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        let (r, c) = (y as usize, x as usize);
        if raw.get((r, c, 0)) == Some(&0) {
            Rgb([0, 0, 0])
        } else {
            Rgb(PALETTE[usize::from(labels[[r, c]]) % PALETTE.len()])
        }
    })
}
