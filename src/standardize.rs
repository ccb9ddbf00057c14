use ndarray::prelude::*;
use num_traits::Float;

/// Per-image standardization shared by training and inference.
///
/// The standard deviation is floored at `1/sqrt(rows*cols)` so nearly flat
/// images do not blow up, then the result is stretched to `[0, 1]`. A
/// single-band tensor comes back replicated to three bands. If the image is
/// perfectly flat there is nothing to stretch and the output is all zeros.
pub fn standardize<A>(tensor: ArrayView3<A>) -> Array3<A>
where
    A: Float + num_traits::FromPrimitive,
{
    let (rows, cols, bands) = tensor.dim();
    if tensor.is_empty() {
        return Array3::zeros((rows, cols, bands.max(3)));
    }

    let pixels = A::from_usize(rows * cols).unwrap_or_else(A::one);
    let floor = A::one() / pixels.sqrt();
    let mean = tensor.mean().unwrap_or_else(A::zero);
    let std = tensor.std(A::zero()).max(floor);

    let normalized = tensor.mapv(|v| (v - mean) / std);
    let stretched = rescale_unit(normalized);

    if bands == 1 {
        let plane = stretched.index_axis(Axis(2), 0);
        ndarray::stack(Axis(2), &[plane, plane, plane])
            .unwrap_or_else(|_| Array3::zeros((rows, cols, 3)))
    } else {
        stretched
    }
}

fn rescale_unit<A: Float>(mut values: Array3<A>) -> Array3<A> {
    let (min, max) = values
        .iter()
        .fold((A::infinity(), A::neg_infinity()), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= A::zero() {
        values.fill(A::zero());
        return values;
    }
    values.mapv_inplace(|v| (v - min) / range);
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn min_max(values: &Array3<f32>) -> (f32, f32) {
        values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    #[test]
    fn test_output_spans_unit_interval() {
        let image =
            Array3::from_shape_fn((16, 24, 3), |(r, c, b)| ((r * 7 + c * 3 + b * 11) % 255) as f32);
        let out = standardize(image.view());
        assert_eq!(out.dim(), (16, 24, 3));
        let (lo, hi) = min_max(&out);
        assert!(lo.abs() < 1e-6);
        assert!((hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_band_is_replicated() {
        let image = Array3::from_shape_fn((10, 10, 1), |(r, c, _)| (r * c) as f32);
        let out = standardize(image.view());
        assert_eq!(out.dim(), (10, 10, 3));
        assert_eq!(out.slice(s![.., .., 0]), out.slice(s![.., .., 2]));
        let (lo, hi) = min_max(&out);
        assert!(lo.abs() < 1e-6 && (hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_flat_image_maps_to_zero() {
        let image = Array3::<f32>::from_elem((8, 8, 3), 42.0);
        let out = standardize(image.view());
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_low_variance_is_floored() {
        // std is far below the 1/sqrt(16) floor
        let mut image = Array3::<f64>::zeros((4, 4, 1));
        image[[0, 0, 0]] = 1e-3;
        let out = standardize(image.view());
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out[[0, 0, 0]] - 1.0).abs() < 1e-12);
    }
}
