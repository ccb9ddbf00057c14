use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::{
    config::TargetSize,
    errors::{CoastSegError, Result},
    traits::PredictionOracle,
};

/// Residual U-Net exported to ONNX, fed NHWC tensors.
pub struct OnnxOracle {
    model_path: PathBuf,
    device_id: i32,
    target: TargetSize,
    channels: usize,
    session: Mutex<Session>,
}

impl OnnxOracle {
    /// Load the model and run one warm-up pass on a zero tensor of shape
    /// `(1, rows, cols, channels)`.
    pub fn new(
        model_path: &Path,
        device_id: i32,
        target: TargetSize,
        channels: usize,
    ) -> Result<Self> {
        let session = build_session(model_path, device_id, target, channels)?;
        Ok(Self {
            model_path: model_path.to_path_buf(),
            device_id,
            target,
            channels,
            session: Mutex::new(session),
        })
    }
}

fn build_session(
    model_path: &Path,
    device_id: i32,
    target: TargetSize,
    channels: usize,
) -> Result<Session> {
    let mut session = SessionBuilder::new()
        .map_err(|e| CoastSegError::model("session builder initialisation", e))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ])
        .map_err(|e| CoastSegError::model("execution provider setup", e))?
        .with_memory_pattern(true)
        .map_err(|e| CoastSegError::model("memory pattern setup", e))?
        .commit_from_file(model_path)
        .map_err(|e| {
            CoastSegError::model(format!("model load: {}", model_path.display()), e)
        })?;

    let warmup = Array4::<f32>::zeros((1, target.rows as usize, target.cols as usize, channels));
    let tensor = TensorRef::from_array_view(&warmup)
        .map_err(|e| CoastSegError::model("warm-up tensor creation", e))?;
    session
        .run(ort::inputs![tensor])
        .map_err(|e| CoastSegError::model("warm-up run", e))?;

    log::debug!("Loaded {} on device {device_id}", model_path.display());
    Ok(session)
}

impl OnnxOracle {
    fn check_input(&self, image: &ArrayView3<f32>) -> Result<()> {
        let (rows, cols, channels) = image.dim();
        if (rows as u32, cols as u32) != (self.target.rows, self.target.cols)
            || channels != self.channels
        {
            return Err(CoastSegError::validation(
                "model input",
                format!(
                    "expected {}x{}x{}, got {rows}x{cols}x{channels}",
                    self.target.rows, self.target.cols, self.channels
                ),
            ));
        }
        Ok(())
    }
}

impl PredictionOracle for OnnxOracle {
    fn predict(&self, image: ArrayView3<f32>) -> Result<Array3<f32>> {
        self.predict_batch(&[image])?
            .pop()
            .ok_or_else(|| CoastSegError::validation("model output", "is empty"))
    }

    /// Stack the images into one `(n, rows, cols, channels)` tensor and run a
    /// single forward pass.
    fn predict_batch(&self, images: &[ArrayView3<f32>]) -> Result<Vec<Array3<f32>>> {
        if images.is_empty() {
            return Ok(vec![]);
        }
        for image in images {
            self.check_input(image)?;
        }

        let batch = ndarray::stack(Axis(0), images)?;
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(&batch)?])?;
        let predictions = outputs[0]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?;
        if predictions.dim().0 != images.len() {
            return Err(CoastSegError::validation(
                "model output",
                format!(
                    "batch of {} images produced {} predictions",
                    images.len(),
                    predictions.dim().0
                ),
            ));
        }
        let predictions = predictions
            .axis_iter(Axis(0))
            .map(|prediction| prediction.to_owned())
            .collect();
        Ok(predictions)
    }

    /// Rebuild the session so arena memory grown by a run of forward passes is
    /// released.
    fn reset(&self) -> Result<()> {
        let fresh = build_session(&self.model_path, self.device_id, self.target, self.channels)?;
        *self.session.lock() = fresh;
        Ok(())
    }

    fn target_size(&self) -> TargetSize {
        self.target
    }
}
