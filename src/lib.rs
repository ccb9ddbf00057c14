pub mod cleaner;
pub mod confidence;
pub mod config;
pub mod ensemble;
pub mod errors;
pub mod loader;
pub mod model;
pub mod multiclass;
pub mod output;
pub mod raster;
pub mod standardize;
pub mod threshold;
pub mod traits;

pub mod mocks;

use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

pub use config::{Bands, Config, InputSpec, Settings, TargetSize};
pub use errors::{CoastSegError, Result};
pub use model::OnnxOracle;
pub use output::OutputLayout;
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

use crate::loader::{companion_path, load_image, LoadedImage};
use crate::standardize::standardize;

/// Tally of one directory run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    /// Files whose mask already existed
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Processed,
    Skipped,
}

/// Runs every image of the sample directory through the oracle, one file at
/// a time, and writes its artifacts next to the inputs.
pub struct Segmenter<O: PredictionOracle> {
    settings: Settings,
    oracle: O,
    layout: OutputLayout,
}

impl<O: PredictionOracle> Segmenter<O> {
    pub fn new(settings: Settings, oracle: O) -> Self {
        let layout = OutputLayout::new(&settings.sample_dir);
        Self {
            settings,
            oracle,
            layout,
        }
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub const fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Segment every image in the sample directory.
    ///
    /// A file that fails is logged and counted; the run carries on with the
    /// next one. Only problems with the directory itself are returned as
    /// errors.
    pub fn process_directory(&self) -> Result<RunSummary> {
        let files = collect_images(&self.settings.sample_dir)?;
        let mut summary = RunSummary::default();
        if files.is_empty() {
            log::warn!(
                "No .jpg or .png images found in {}",
                self.settings.sample_dir.display()
            );
            return Ok(summary);
        }
        self.layout.create_dirs()?;

        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .map_err(|e| CoastSegError::Configuration {
                    message: format!("progress bar template: {e}"),
                })?
                .progress_chars("#>-"),
        );

        for path in &files {
            if let Some(name) = path.file_name() {
                pb.set_message(name.to_string_lossy().into_owned());
            }
            match self.process_file(path) {
                Ok(FileOutcome::Processed) => summary.processed += 1,
                Ok(FileOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    log::error!("Failed to segment {}: {e}", path.display());
                    summary.failed += 1;
                }
            }
            pb.inc(1);
        }

        pb.finish_with_message("done");
        Ok(summary)
    }

    /// Segment one image unless its mask is already on disk.
    pub fn process_file(&self, path: &Path) -> Result<FileOutcome> {
        let stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .ok_or_else(|| {
                CoastSegError::validation("file name", format!("{path:?} has no usable stem"))
            })?;

        if self.layout.mask_path(stem).exists() {
            log::info!("{} exists ... skipping", self.layout.mask_path(stem).display());
            return Ok(FileOutcome::Skipped);
        }

        log::info!("Working on {}", path.display());
        if self.settings.is_binary() {
            self.segment_binary(path, stem)?;
        } else {
            self.segment_multiclass(path, stem)?;
        }
        Ok(FileOutcome::Processed)
    }

    fn load(&self, path: &Path) -> Result<LoadedImage> {
        let companion = if self.settings.input.needs_companion() {
            companion_path(path, self.settings.nir_dir.as_deref())
        } else {
            None
        };
        let loaded = load_image(
            path,
            companion.as_deref(),
            &self.settings.input,
            self.settings.target,
            true,
        )?;
        log::info!("Native size {}x{}", loaded.width, loaded.height);
        Ok(loaded)
    }

    /// One-class path: shift ensemble, adaptive threshold, confidence and
    /// variance maps, cleaned mask.
    pub fn segment_binary(&self, path: &Path, stem: &str) -> Result<()> {
        let loaded = self.load(path)?;
        let native = loaded.native();
        let image = standardize(loaded.tensor.view());

        let start = Instant::now();
        let ensemble = ensemble::predict_ensemble(
            image.view(),
            &self.oracle,
            native,
            self.settings.reverse_shift,
            self.settings.batch_size,
        )?;
        let probability = ensemble.combined.view();

        let threshold = threshold::select_threshold(probability);
        let conf = confidence::build_confidence(probability, threshold);
        let var = confidence::build_variance(&ensemble.members)?;
        log::info!(
            "Overall confidence: {:.6}",
            confidence::overall_confidence(conf.view())
        );

        let mask = cleaner::clean(probability, threshold, native);
        log::info!("Masking took {:.2?}", start.elapsed());

        let start = Instant::now();
        let layout = &self.layout;
        output::save_mask(&layout.mask_path(stem), mask.view(), true)?;
        output::save_overlay(
            &layout.overlay_path(stem),
            loaded.raw.view(),
            mask.mapv(f32::from).view(),
        )?;
        output::save_npz_f16(&layout.confidence_path(stem), conf.view())?;
        output::save_npz_f16(&layout.variance_path(stem), var.view())?;
        output::save_npz_f16(&layout.probability_npz_path(stem), probability)?;
        output::save_overlay(
            &layout.probability_tif_path(stem),
            loaded.raw.view(),
            probability,
        )?;
        log::info!("Writing files took {:.2?}", start.elapsed());
        Ok(())
    }

    /// Multi-class path: one forward pass, max-filtered argmax, colorized
    /// label map.
    pub fn segment_multiclass(&self, path: &Path, stem: &str) -> Result<()> {
        let loaded = self.load(path)?;
        let native = loaded.native();
        let image = standardize(loaded.tensor.view());

        let start = Instant::now();
        let prediction = multiclass::predict_multiclass(
            image.view(),
            loaded.raw.view(),
            &self.oracle,
            self.settings.nclasses,
            native,
        )?;
        log::info!("Masking took {:.2?}", start.elapsed());

        let start = Instant::now();
        let layout = &self.layout;
        output::save_mask(&layout.mask_path(stem), prediction.labels.view(), false)?;
        output::save_color(&layout.color_path(stem), &prediction.color)?;
        output::save_npz_f16(&layout.confidence_path(stem), prediction.confidence.view())?;
        log::info!("Writing files took {:.2?}", start.elapsed());
        Ok(())
    }
}

impl Segmenter<OnnxOracle> {
    /// Load the ONNX model named in `settings` and wrap it in a runner.
    pub fn with_onnx_model(settings: Settings) -> Result<Self> {
        let oracle = OnnxOracle::new(
            &settings.model_path,
            settings.device_id,
            settings.target,
            settings.input.network_channels(),
        )?;
        Ok(Self::new(settings, oracle))
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()))
}

/// Images directly inside `dir`, sorted: all JPEGs, or all PNGs when there
/// are no JPEGs.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| CoastSegError::FileSystem {
            path: dir.to_path_buf(),
            operation: "directory listing".to_string(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let jpegs: Vec<PathBuf> = files
        .iter()
        .filter(|p| has_extension(p, &["jpg", "jpeg"]))
        .cloned()
        .collect();
    if !jpegs.is_empty() {
        return Ok(jpegs);
    }
    Ok(files
        .into_iter()
        .filter(|p| has_extension(p, &["png"]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> Result<()> {
        std::fs::write(dir.join(name), b"")?;
        Ok(())
    }

    #[test]
    fn test_jpegs_win_over_pngs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        for name in ["b.jpg", "a.JPG", "c.png", "notes.txt"] {
            touch(temp_dir.path(), name)?;
        }
        std::fs::create_dir(temp_dir.path().join("masks"))?;
        touch(&temp_dir.path().join("masks"), "nested.jpg")?;

        let files = collect_images(temp_dir.path())?;
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(OsStr::to_str))
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.jpg"]);
        Ok(())
    }

    #[test]
    fn test_png_fallback() -> Result<()> {
        let temp_dir = TempDir::new()?;
        touch(temp_dir.path(), "z.png")?;
        touch(temp_dir.path(), "y.png")?;
        let files = collect_images(temp_dir.path())?;
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("y.png"));
        Ok(())
    }

    #[test]
    fn test_existing_mask_is_skipped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let target = TargetSize::new(32, 32)?;
        let settings = Settings::new(
            temp_dir.path().to_path_buf(),
            target,
            InputSpec::new(Bands::Three, false),
            1,
        )?;
        let source = temp_dir.path().join("scene.png");
        RgbImage::from_pixel(32, 32, Rgb([10, 20, 30])).save(&source)?;

        let segmenter = Segmenter::new(settings, MockOracle::constant(target, 1, 0.9));
        segmenter.layout().create_dirs()?;
        std::fs::write(segmenter.layout().mask_path("scene"), b"")?;

        assert_eq!(segmenter.process_file(&source)?, FileOutcome::Skipped);
        assert_eq!(segmenter.oracle.prediction_count(), 0);
        Ok(())
    }
}
