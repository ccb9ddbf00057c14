use std::fs;
use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array3, ArrayView3};
use parking_lot::Mutex;
use tempfile::TempDir;

use coast_seg_rs::mocks::MockOracle;
use coast_seg_rs::multiclass::PALETTE;
use coast_seg_rs::{
    Bands, InputSpec, PredictionOracle, RunSummary, Segmenter, Settings, TargetSize,
};

const TARGET: TargetSize = TargetSize { rows: 64, cols: 64 };

// Shoreline oracle: water on the left half of the network frame, land on the
// right, regardless of input.
struct ShorelineOracle;

impl PredictionOracle for ShorelineOracle {
    fn predict(&self, image: ArrayView3<f32>) -> coast_seg_rs::Result<Array3<f32>> {
        let (rows, cols, _) = image.dim();
        Ok(Array3::from_shape_fn((rows, cols, 1), |(_, c, _)| {
            if c < cols / 2 {
                0.9
            } else {
                0.1
            }
        }))
    }

    fn reset(&self) -> coast_seg_rs::Result<()> {
        Ok(())
    }

    fn target_size(&self) -> TargetSize {
        TARGET
    }
}

// Records (min, max, mean) of every tensor it is fed and predicts 0.5.
#[derive(Default)]
struct RecordingOracle {
    seen: Mutex<Vec<(f32, f32, f32)>>,
}

impl PredictionOracle for RecordingOracle {
    fn predict(&self, image: ArrayView3<f32>) -> coast_seg_rs::Result<Array3<f32>> {
        let (lo, hi) = image
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let mean = image.mean().unwrap_or(f32::NAN);
        self.seen.lock().push((lo, hi, mean));
        let (rows, cols, _) = image.dim();
        Ok(Array3::from_elem((rows, cols, 1), 0.5))
    }

    fn reset(&self) -> coast_seg_rs::Result<()> {
        Ok(())
    }

    fn target_size(&self) -> TargetSize {
        TARGET
    }
}

fn write_scene(path: &Path) {
    RgbImage::from_fn(80, 60, |x, y| Rgb([(x * 3) as u8, (y * 4) as u8, 120]))
        .save(path)
        .unwrap();
}

fn write_nir(path: &Path) {
    GrayImage::from_pixel(80, 60, Luma([90])).save(path).unwrap();
}

#[test]
fn test_missing_companion_skips_only_that_file() {
    let temp_dir = TempDir::new().unwrap();
    let samples = temp_dir.path().join("samples");
    let nir = temp_dir.path().join("nir");
    fs::create_dir_all(&samples).unwrap();
    fs::create_dir_all(&nir).unwrap();

    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        write_scene(&samples.join(name));
    }
    write_nir(&nir.join("a.jpg"));
    write_nir(&nir.join("c.jpg"));

    let settings = Settings::new(samples.clone(), TARGET, InputSpec::new(Bands::Four, false), 1)
        .unwrap()
        .with_nir_dir(nir);
    let segmenter = Segmenter::new(settings, ShorelineOracle);

    let summary = segmenter.process_directory().unwrap();
    assert_eq!(
        summary,
        RunSummary {
            processed: 2,
            skipped: 0,
            failed: 1
        }
    );

    let layout = segmenter.layout();
    for stem in ["a", "c"] {
        for path in [
            layout.mask_path(stem),
            layout.overlay_path(stem),
            layout.confidence_path(stem),
            layout.variance_path(stem),
            layout.probability_npz_path(stem),
            layout.probability_tif_path(stem),
        ] {
            assert!(path.is_file(), "{} was not written", path.display());
        }
    }
    assert!(!layout.mask_path("b").exists());

    let mask = image::open(layout.mask_path("a")).unwrap().to_luma8();
    assert_eq!(mask.dimensions(), (80, 60));
    assert_eq!(mask.get_pixel(5, 30).0, [255]);
    assert_eq!(mask.get_pixel(75, 30).0, [0]);
    assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));

    let overlay = image::open(layout.overlay_path("a")).unwrap().to_rgba8();
    assert_eq!(overlay.get_pixel(5, 30).0[3], 255);
    assert_eq!(overlay.get_pixel(75, 30).0[3], 0);
}

#[test]
fn test_network_input_is_standardized_from_full_source_range() {
    let temp_dir = TempDir::new().unwrap();
    let samples = temp_dir.path().to_path_buf();
    write_scene(&samples.join("scene.png"));

    let oracle = RecordingOracle::default();
    let settings =
        Settings::new(samples, TARGET, InputSpec::new(Bands::Three, false), 1).unwrap();
    let segmenter = Segmenter::new(settings, &oracle);
    assert_eq!(segmenter.process_directory().unwrap().processed, 1);

    let seen = oracle.seen.lock();
    assert_eq!(seen.len(), 21);
    for &(lo, hi, mean) in seen.iter() {
        assert!(lo.abs() < 1e-5, "min {lo}");
        assert!((hi - 1.0).abs() < 1e-5, "max {hi}");
        // a saturated resize would push nearly every value to the top
        assert!(mean > 0.2 && mean < 0.8, "mean {mean}");
    }
}

#[test]
fn test_rerun_skips_finished_files() {
    let temp_dir = TempDir::new().unwrap();
    let samples = temp_dir.path().to_path_buf();
    write_scene(&samples.join("scene.png"));

    let settings =
        Settings::new(samples, TARGET, InputSpec::new(Bands::Three, true), 1).unwrap();
    let segmenter = Segmenter::new(settings, ShorelineOracle);

    let first = segmenter.process_directory().unwrap();
    assert_eq!(first.processed, 1);
    let second = segmenter.process_directory().unwrap();
    assert_eq!(
        second,
        RunSummary {
            processed: 0,
            skipped: 1,
            failed: 0
        }
    );
}

#[test]
fn test_multiclass_directory_run() {
    let temp_dir = TempDir::new().unwrap();
    let samples = temp_dir.path().to_path_buf();
    write_scene(&samples.join("scene.png"));

    let oracle = MockOracle::new(TARGET, |image| {
        let (rows, cols, _) = image.dim();
        Array3::from_shape_fn((rows, cols, 3), |(_, _, k)| if k == 2 { 0.7 } else { 0.15 })
    });
    let settings =
        Settings::new(samples, TARGET, InputSpec::new(Bands::Three, false), 3).unwrap();
    let segmenter = Segmenter::new(settings, oracle);

    let summary = segmenter.process_directory().unwrap();
    assert_eq!(summary.processed, 1);

    let layout = segmenter.layout();
    let labels = image::open(layout.mask_path("scene")).unwrap().to_luma8();
    assert!(labels.pixels().all(|p| p.0 == [2]));

    let color = image::open(layout.color_path("scene")).unwrap().to_rgb8();
    assert_eq!(color.dimensions(), (80, 60));
    // source pixels with a zero first band stay black
    assert_eq!(color.get_pixel(0, 10).0, [0, 0, 0]);
    assert_eq!(color.get_pixel(40, 10).0, PALETTE[2]);

    assert!(layout.confidence_path("scene").is_file());
    assert!(!layout.variance_path("scene").exists());
    assert!(!layout.overlay_path("scene").exists());
}

#[test]
fn test_empty_directory_is_not_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings::new(
        temp_dir.path().to_path_buf(),
        TARGET,
        InputSpec::new(Bands::One, false),
        1,
    )
    .unwrap();
    let segmenter = Segmenter::new(settings, ShorelineOracle);
    assert_eq!(segmenter.process_directory().unwrap(), RunSummary::default());
    assert!(!segmenter.layout().masks_dir().exists());
}
