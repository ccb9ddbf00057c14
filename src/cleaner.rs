//! Thresholding and connected-component cleanup of the one-class mask.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::prelude::*;

/// `1` where `p >= threshold`, `0` elsewhere (NaN included).
pub fn binarize(map: ArrayView2<f32>, threshold: f32) -> Array2<u8> {
    map.mapv(|p| u8::from(p >= threshold))
}

/// Fill 4-connected background regions smaller than `min_size` pixels.
pub fn remove_small_holes(mask: ArrayView2<u8>, min_size: usize) -> Array2<u8> {
    flip_small_components(mask, 0, min_size)
}

/// Erase 4-connected foreground regions smaller than `min_size` pixels.
pub fn remove_small_objects(mask: ArrayView2<u8>, min_size: usize) -> Array2<u8> {
    flip_small_components(mask, 1, min_size)
}

/// Smallest region, in pixels, allowed to survive cleanup: twice the native
/// row count.
pub const fn min_region_size(rows: u32) -> usize {
    2 * rows as usize
}

/// Binarize at `threshold`, fill small holes, drop small objects and crop to
/// `native = (width, height)`. Each pass is followed by a re-binarization so
/// the result only ever holds `0` and `1`.
pub fn clean(map: ArrayView2<f32>, threshold: f32, native: (u32, u32)) -> Array2<u8> {
    let (width, height) = native;
    let min_size = min_region_size(height);

    let mask = binarize(map, threshold);
    let mask = rebinarize(remove_small_holes(mask.view(), min_size));
    let mask = rebinarize(remove_small_objects(mask.view(), min_size));

    let (rows, cols) = mask.dim();
    mask.slice_move(s![
        ..(height as usize).min(rows),
        ..(width as usize).min(cols)
    ])
}

fn rebinarize(mut mask: Array2<u8>) -> Array2<u8> {
    mask.mapv_inplace(|v| u8::from(v > 0));
    mask
}

/// Component sizes of the pixels equal to `value`, labelled with imageproc.
/// Label 0 is everything else.
fn label_components(mask: ArrayView2<u8>, value: u8) -> (Array2<u32>, Vec<usize>) {
    let (rows, cols) = mask.dim();
    let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([if mask[[y as usize, x as usize]] == value { 255 } else { 0 }])
    });
    let labelled = connected_components(&image, Connectivity::Four, Luma([0u8]));

    let labels = Array2::from_shape_fn((rows, cols), |(y, x)| {
        labelled.get_pixel(x as u32, y as u32)[0]
    });
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut sizes = vec![0usize; max_label + 1];
    for &label in labels.iter() {
        sizes[label as usize] += 1;
    }
    (labels, sizes)
}

fn flip_small_components(mask: ArrayView2<u8>, value: u8, min_size: usize) -> Array2<u8> {
    let (labels, sizes) = label_components(mask, value);
    let mut out = mask.mapv(|v| u8::from(v > 0));
    for (cell, &label) in out.iter_mut().zip(labels.iter()) {
        if label != 0 && sizes[label as usize] < min_size {
            *cell = 1 - value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smallest_region(mask: &Array2<u8>, value: u8) -> Option<usize> {
        let (_, sizes) = label_components(mask.view(), value);
        sizes.into_iter().skip(1).min()
    }

    #[test]
    fn test_binarize_is_inclusive() {
        let map = array![[0.1, 0.5], [0.49, f32::NAN]];
        assert_eq!(binarize(map.view(), 0.5), array![[0, 1], [0, 0]]);
    }

    #[test]
    fn test_small_object_is_removed() {
        let mut mask = Array2::<u8>::zeros((16, 16));
        mask.slice_mut(s![2..5, 2..5]).fill(1);
        mask.slice_mut(s![8..16, 0..16]).fill(1);
        let cleaned = remove_small_objects(mask.view(), 32);
        assert_eq!(cleaned.slice(s![2..5, 2..5]).sum(), 0);
        assert_eq!(cleaned.slice(s![8..16, ..]).sum(), 128);
    }

    #[test]
    fn test_small_hole_is_filled() {
        let mut mask = Array2::<u8>::ones((16, 16));
        mask.slice_mut(s![6..8, 6..8]).fill(0);
        mask.slice_mut(s![0..4, ..]).fill(0);
        let cleaned = remove_small_holes(mask.view(), 32);
        assert_eq!(cleaned.slice(s![6..8, 6..8]).sum(), 4);
        assert_eq!(cleaned.slice(s![0..4, ..]).sum(), 0);
    }

    #[test]
    fn test_diagonal_neighbours_are_separate_regions() {
        let mask = array![[1u8, 0], [0, 1]];
        let cleaned = remove_small_objects(mask.view(), 2);
        assert_eq!(cleaned.sum(), 0);
    }

    #[test]
    fn test_clean_leaves_no_undersized_region() {
        let map = Array2::from_shape_fn((24, 16), |(r, c)| {
            let stripe = if c < 8 { 0.9 } else { 0.1 };
            let speckle = if (r * 7 + c * 3) % 11 == 0 { 0.8 } else { 0.0 };
            if stripe > 0.5 { stripe - speckle } else { stripe + speckle }
        });
        let cleaned = clean(map.view(), 0.5, (16, 24));
        assert_eq!(cleaned.dim(), (24, 16));
        assert!(cleaned.iter().all(|&v| v <= 1));
        let floor = min_region_size(24);
        assert!(smallest_region(&cleaned, 1).map_or(true, |s| s >= floor));
        assert!(smallest_region(&cleaned, 0).map_or(true, |s| s >= floor));
    }

    #[test]
    fn test_region_floor_follows_row_count() {
        // 20 rows x 100 columns: the floor is 40 pixels, not 200
        let mut map = Array2::<f32>::zeros((20, 100));
        map.slice_mut(s![5..10, 10..30]).fill(1.0);
        let cleaned = clean(map.view(), 0.5, (100, 20));
        assert_eq!(cleaned.dim(), (20, 100));
        assert_eq!(cleaned.iter().map(|&v| usize::from(v)).sum::<usize>(), 100);

        let mut speck = Array2::<f32>::zeros((20, 100));
        speck.slice_mut(s![5..10, 10..17]).fill(1.0);
        let cleaned = clean(speck.view(), 0.5, (100, 20));
        assert!(cleaned.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_all_zero_map_stays_empty() {
        let map = Array2::<f32>::zeros((256, 256));
        let cleaned = clean(map.view(), 0.75, (256, 256));
        assert!(cleaned.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_clean_crops_to_native() {
        let map = Array2::<f32>::ones((20, 30));
        let cleaned = clean(map.view(), 0.5, (25, 18));
        assert_eq!(cleaned.dim(), (18, 25));
        assert!(cleaned.iter().all(|&v| v == 1));
    }
}
