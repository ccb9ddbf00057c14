use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use ndarray::prelude::*;
use nshare::{AsNdarray2, AsNdarray3};

use crate::config::{InputSpec, TargetSize};
use crate::errors::{CoastSegError, Result};
use crate::raster::resize_bands;

/// A decoded source image ready for standardization.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Network-geometry tensor (resized and center-cropped when requested)
    pub tensor: Array3<f32>,
    /// Native column count
    pub width: u32,
    /// Native row count
    pub height: u32,
    /// Native-resolution band stack, companion and location bands included
    pub raw: Array3<u8>,
}

impl LoadedImage {
    pub const fn native(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

pub fn image_format(path: &Path) -> Result<ImageFormat> {
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => Ok(ImageFormat::Jpeg),
        Some("png") => Ok(ImageFormat::Png),
        _ => Err(CoastSegError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

pub fn load_image(
    path: &Path,
    companion: Option<&Path>,
    spec: &InputSpec,
    target: TargetSize,
    resize: bool,
) -> Result<LoadedImage> {
    let primary = decode_bands(path)?;
    let (rows, cols, _) = primary.dim();

    let mut layers = vec![primary];
    if spec.with_location {
        layers.push(location_band(rows, cols).insert_axis(Axis(2)));
    }
    if spec.needs_companion() {
        let companion = companion
            .filter(|p| p.is_file())
            .ok_or_else(|| CoastSegError::MissingInput {
                path: companion.map_or_else(|| path.to_path_buf(), Path::to_path_buf),
                role: "near-infrared companion".to_string(),
            })?;
        let nir = decode_bands(companion)?;
        if nir.dim().0 != rows || nir.dim().1 != cols {
            return Err(CoastSegError::validation(
                "companion",
                format!(
                    "{} is {}x{}, expected {}x{}",
                    companion.display(),
                    nir.dim().1,
                    nir.dim().0,
                    cols,
                    rows
                ),
            ));
        }
        layers.push(nir);
    }

    let views: Vec<_> = layers.iter().map(|layer| layer.view()).collect();
    let stacked = ndarray::concatenate(Axis(2), &views)?;
    let channels = spec.expected_channels().min(stacked.dim().2);
    let raw = stacked.slice_move(s![.., .., ..channels]);

    let tensor = raw.mapv(f32::from);
    let tensor = if resize {
        resize_and_crop(tensor.view(), target)?
    } else {
        tensor
    };

    Ok(LoadedImage {
        tensor,
        width: cols as u32,
        height: rows as u32,
        raw,
    })
}

/// Decode to `(rows, cols, bands)` with one band for grayscale sources and
/// three otherwise. Alpha is dropped and 16-bit data narrowed.
fn decode_bands(path: &Path) -> Result<Array3<u8>> {
    let format = image_format(path)?;
    let file = File::open(path).map_err(|e| CoastSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "image open".to_string(),
        source: e,
    })?;
    let image =
        image::load(BufReader::new(file), format).map_err(|e| CoastSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "image decode".to_string(),
            source: Box::new(e),
        })?;

    Ok(to_band_stack(&image))
}

fn to_band_stack(image: &DynamicImage) -> Array3<u8> {
    if image.color().has_color() {
        let rgb = image.to_rgb8();
        let bands = rgb
            .as_ndarray3()
            .permuted_axes([1, 2, 0])
            .as_standard_layout()
            .into_owned();
        bands
    } else {
        let gray = image.to_luma8();
        let bands = gray.as_ndarray2().insert_axis(Axis(2)).to_owned();
        bands
    }
}

/// Radial distance from the top-left corner, scaled to `0..=255`.
pub fn location_band(rows: usize, cols: usize) -> Array2<u8> {
    let max = (((rows.saturating_sub(1)).pow(2) + (cols.saturating_sub(1)).pow(2)) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        if max == 0.0 {
            return 0;
        }
        let distance = ((x * x + y * y) as f64).sqrt() / max;
        (255.0 * distance) as u8
    })
}

/// Scale so both axes cover the target, then take the centered window.
pub fn resize_and_crop(tensor: ArrayView3<f32>, target: TargetSize) -> Result<Array3<f32>> {
    let (rows, cols, _) = tensor.dim();
    if rows == 0 || cols == 0 {
        return Err(CoastSegError::validation("image", "has zero size"));
    }

    let scale = f64::max(
        f64::from(target.rows) / rows as f64,
        f64::from(target.cols) / cols as f64,
    );
    let new_rows = ((rows as f64 * scale).round() as u32).max(target.rows);
    let new_cols = ((cols as f64 * scale).round() as u32).max(target.cols);
    let (top, left) = crop_offsets(new_rows, new_cols, target);

    let resized = resize_bands(tensor, new_rows, new_cols)?;
    Ok(resized
        .slice_move(s![
            top..top + target.rows as usize,
            left..left + target.cols as usize,
            ..
        ]))
}

pub const fn crop_offsets(rows: u32, cols: u32, target: TargetSize) -> (usize, usize) {
    (
        (rows.saturating_sub(target.rows) / 2) as usize,
        (cols.saturating_sub(target.cols) / 2) as usize,
    )
}

/// Where the near-infrared companion of `primary` lives: inside `nir_dir`
/// when one is configured, otherwise next to it with the `aug_images`
/// directory swapped for `aug_nir`.
pub fn companion_path(primary: &Path, nir_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = nir_dir {
        return primary.file_name().map(|name| dir.join(name));
    }

    let mut replaced = false;
    let path: PathBuf = primary
        .components()
        .map(|component| {
            if component.as_os_str() == "aug_images" {
                replaced = true;
                OsStr::new("aug_nir")
            } else {
                component.as_os_str()
            }
        })
        .collect();
    replaced.then_some(path)
}
