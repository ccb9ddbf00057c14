//! On-disk artifacts of one segmented image.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use half::f16;
use image::{GrayImage, ImageError, ImageFormat, Luma, Rgba, RgbImage, RgbaImage};
use ndarray::prelude::*;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{CoastSegError, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;
/// Entry name `numpy.savez` gives a positional array.
pub const NPZ_ENTRY: &str = "arr_0.npy";

/// Output directory tree rooted at the sample directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.root.join("masks")
    }

    pub fn masked_dir(&self) -> PathBuf {
        self.root.join("masked")
    }

    pub fn conf_var_dir(&self) -> PathBuf {
        self.root.join("conf_var")
    }

    pub fn probs_dir(&self) -> PathBuf {
        self.root.join("probs")
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.masks_dir(),
            self.masked_dir(),
            self.conf_var_dir(),
            self.probs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| CoastSegError::FileSystem {
                path: dir.clone(),
                operation: "output directory creation".to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn mask_path(&self, stem: &str) -> PathBuf {
        self.masks_dir().join(format!("{stem}_predseg.png"))
    }

    pub fn overlay_path(&self, stem: &str) -> PathBuf {
        self.masked_dir().join(format!("{stem}_segoverlay.tif"))
    }

    pub fn color_path(&self, stem: &str) -> PathBuf {
        self.masked_dir().join(format!("{stem}_predseg_col.png"))
    }

    pub fn confidence_path(&self, stem: &str) -> PathBuf {
        self.conf_var_dir().join(format!("{stem}_conf.npz"))
    }

    pub fn variance_path(&self, stem: &str) -> PathBuf {
        self.conf_var_dir().join(format!("{stem}_var.npz"))
    }

    pub fn probability_npz_path(&self, stem: &str) -> PathBuf {
        self.probs_dir().join(format!("{stem}_prob.npz"))
    }

    pub fn probability_tif_path(&self, stem: &str) -> PathBuf {
        self.probs_dir().join(format!("{stem}_prob.tif"))
    }
}

fn image_error(path: &Path, operation: &str) -> impl FnOnce(ImageError) -> CoastSegError {
    let path = path.display().to_string();
    let operation = operation.to_string();
    move |e| CoastSegError::ImageProcessing {
        path,
        operation,
        source: Box::new(e),
    }
}

/// Single-band PNG of the mask. Binary masks are stretched to `0/255`,
/// label maps keep their class values.
pub fn save_mask(path: &Path, mask: ArrayView2<u8>, binary: bool) -> Result<()> {
    let (rows, cols) = mask.dim();
    let scale = if binary { 255 } else { 1 };
    let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([mask[[y as usize, x as usize]].saturating_mul(scale)])
    });
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(image_error(path, "mask write"))
}

pub fn save_color(path: &Path, color: &RgbImage) -> Result<()> {
    color
        .save_with_format(path, ImageFormat::Png)
        .map_err(image_error(path, "color mask write"))
}

/// TIFF of the source bands with `255 * band` appended as the last band.
///
/// Only an RGB source produces an encodable layout (RGBA); anything else, or
/// a failed write, is retried once with the first source band replicated to
/// RGB. A second failure is logged and the artifact skipped.
pub fn save_overlay(path: &Path, raw: ArrayView3<u8>, band: ArrayView2<f32>) -> Result<()> {
    let first = match overlay_image(raw, band) {
        Some(image) => image
            .save_with_format(path, ImageFormat::Tiff)
            .map_err(image_error(path, "overlay write")),
        None => Err(CoastSegError::validation(
            "overlay",
            format!("no TIFF layout for {} source bands", raw.dim().2),
        )),
    };
    let Err(first) = first else {
        return Ok(());
    };

    log::debug!("Retrying {} with a single source band: {first}", path.display());
    let fallback = fallback_overlay_image(raw, band)
        .save_with_format(path, ImageFormat::Tiff)
        .map_err(image_error(path, "overlay write"));
    if let Err(e) = fallback {
        log::warn!("Skipping overlay {}: {e}", path.display());
    }
    Ok(())
}

fn overlay_value(v: f32) -> u8 {
    if v.is_finite() {
        (255.0 * v.clamp(0.0, 1.0)) as u8
    } else {
        0
    }
}

fn overlay_image(raw: ArrayView3<u8>, band: ArrayView2<f32>) -> Option<RgbaImage> {
    let (rows, cols, bands) = raw.dim();
    if bands != 3 || band.dim() != (rows, cols) {
        return None;
    }
    Some(RgbaImage::from_fn(cols as u32, rows as u32, |x, y| {
        let (r, c) = (y as usize, x as usize);
        Rgba([
            raw[[r, c, 0]],
            raw[[r, c, 1]],
            raw[[r, c, 2]],
            overlay_value(band[[r, c]]),
        ])
    }))
}

fn fallback_overlay_image(raw: ArrayView3<u8>, band: ArrayView2<f32>) -> RgbaImage {
    let (rows, cols) = band.dim();
    RgbaImage::from_fn(cols as u32, rows as u32, |x, y| {
        let (r, c) = (y as usize, x as usize);
        let gray = raw.get((r, c, 0)).copied().unwrap_or(0);
        Rgba([gray, gray, gray, overlay_value(band[[r, c]])])
    })
}

/// `.npy` v1.0 header for a little-endian `float16` C-order array.
pub fn npy_header(shape: (usize, usize)) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f2', 'fortran_order': False, 'shape': ({}, {}), }}",
        shape.0, shape.1
    );
    // magic, version, header length, dict, newline
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let header_len = (dict.len() + padding + 1) as u16;

    let mut header = Vec::with_capacity(unpadded + padding);
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&header_len.to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header.resize(header.len() + padding, b' ');
    header.push(b'\n');
    header
}

/// Write `array` as a deflated `.npz` holding one `float16` array, the
/// layout `numpy.savez_compressed` produces.
pub fn save_npz_f16(path: &Path, array: ArrayView2<f32>) -> Result<()> {
    let fs_error = |e| CoastSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "npz write".to_string(),
        source: e,
    };
    let archive_error = |e| CoastSegError::Archive {
        path: path.to_path_buf(),
        source: e,
    };

    let mut payload = npy_header(array.dim());
    payload.reserve(array.len() * 2);
    for &v in array.iter() {
        payload.extend_from_slice(&f16::from_f32(v).to_le_bytes());
    }

    let file = File::create(path).map_err(fs_error)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(NPZ_ENTRY, options).map_err(archive_error)?;
    zip.write_all(&payload).map_err(fs_error)?;
    let mut writer = zip.finish().map_err(archive_error)?;
    writer.flush().map_err(fs_error)?;
    Ok(())
}
