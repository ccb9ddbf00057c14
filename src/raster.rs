//! Conversions between `ndarray` planes and `image` buffers, plus the
//! resampling every stage uses to move between network and native geometry.

use image::{imageops, imageops::FilterType, ImageBuffer, Luma};
use ndarray::prelude::*;
use nshare::AsNdarray2;

use crate::errors::{CoastSegError, Result};

/// Bilinear resize of one `(rows, cols)` plane. Same-size input is copied
/// untouched so no resampling error creeps in.
///
/// `imageops::resize` clamps `f32` samples to `[0, 1]`, so values are mapped
/// onto that interval for the resampling and back afterwards. Triangle
/// weights are non-negative and sum to one, which makes the round trip exact
/// up to rounding.
pub fn resize_plane(plane: ArrayView2<f32>, rows: u32, cols: u32) -> Result<Array2<f32>> {
    let (height, width) = plane.dim();
    if height == rows as usize && width == cols as usize {
        return Ok(plane.to_owned());
    }

    let (lo, hi) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let (offset, scale) = if lo >= 0.0 && hi <= 1.0 {
        (0.0, 1.0)
    } else if hi > lo {
        (lo, hi - lo)
    } else if lo.is_finite() {
        // constant plane outside the unit interval
        return Ok(Array2::from_elem((rows as usize, cols as usize), lo));
    } else {
        (0.0, 1.0)
    };

    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(
        width as u32,
        height as u32,
        plane.iter().map(|&v| (v - offset) / scale).collect(),
    )
    .ok_or_else(|| CoastSegError::ImageProcessing {
        path: "unknown".to_string(),
        operation: "plane to image buffer".to_string(),
        source: format!("buffer does not fit {width}x{height}").into(),
    })?;
    let resized = imageops::resize(&buffer, cols, rows, FilterType::Triangle);
    Ok(resized.as_ndarray2().mapv(|v| v * scale + offset))
}

/// Resize every band of a `(rows, cols, bands)` tensor.
pub fn resize_bands(tensor: ArrayView3<f32>, rows: u32, cols: u32) -> Result<Array3<f32>> {
    let planes = tensor
        .axis_iter(Axis(2))
        .map(|band| resize_plane(band, rows, cols))
        .collect::<Result<Vec<_>>>()?;
    stack_planes(&planes, rows as usize, cols as usize)
}

pub fn stack_planes(planes: &[Array2<f32>], rows: usize, cols: usize) -> Result<Array3<f32>> {
    if planes.is_empty() {
        return Ok(Array3::zeros((rows, cols, 0)));
    }
    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    Ok(ndarray::stack(Axis(2), &views)?)
}

/// Cyclic shift of the row-major pixel sequence by `offset` pixels; every
/// band of a pixel moves together. Positive offsets move pixels towards the
/// end of the sequence.
///
/// This is not numpy's axis-less `np.roll(image, k)`, which shifts `k`
/// flattened elements and so moves band values into neighbouring pixels'
/// other bands whenever `k` is not a multiple of the band count. Rolling
/// whole pixels keeps each pixel's bands together and makes `-offset` an
/// exact inverse.
pub fn roll_pixels<A: Clone>(tensor: ArrayView3<A>, offset: isize) -> Array3<A> {
    let (rows, cols, bands) = tensor.dim();
    let pixels = rows * cols;
    if pixels == 0 {
        return tensor.to_owned();
    }
    let shift = offset.rem_euclid(pixels as isize) as usize;
    let flat: Vec<A> = tensor.iter().cloned().collect();
    let mut rolled = flat.clone();
    let split = (pixels - shift) * bands;
    rolled[..shift * bands].clone_from_slice(&flat[split..]);
    rolled[shift * bands..].clone_from_slice(&flat[..split]);
    Array3::from_shape_vec((rows, cols, bands), rolled)
        .unwrap_or_else(|_| tensor.to_owned())
}

/// Two-dimensional counterpart of [`roll_pixels`].
pub fn roll_plane<A: Clone>(plane: ArrayView2<A>, offset: isize) -> Array2<A> {
    roll_pixels(plane.insert_axis(Axis(2)), offset).remove_axis(Axis(2))
}
