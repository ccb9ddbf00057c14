use crate::config::TargetSize;
use crate::errors::Result;
use ndarray::prelude::*;

/// Trained segmentation network as seen by the inference pipeline.
///
/// Input is a standardized `(rows, cols, channels)` tensor at the network's
/// fixed geometry; output is a `(rows, cols, classes)` probability tensor
/// (sigmoid for one class, softmax otherwise). Backends may hold session state
/// that grows across calls, which `reset` releases.
pub trait PredictionOracle: Send + Sync {
    /// Single forward pass.
    fn predict(&self, image: ArrayView3<f32>) -> Result<Array3<f32>>;

    /// Forward pass over several images at once, results in input order.
    /// Backends without native batching run them one by one.
    fn predict_batch(&self, images: &[ArrayView3<f32>]) -> Result<Vec<Array3<f32>>> {
        images.iter().map(|image| self.predict(image.view())).collect()
    }

    /// Drop accumulated runtime state. Called once per processed image.
    fn reset(&self) -> Result<()>;

    /// Network input geometry.
    fn target_size(&self) -> TargetSize;
}

impl<O: PredictionOracle + ?Sized> PredictionOracle for &O {
    fn predict(&self, image: ArrayView3<f32>) -> Result<Array3<f32>> {
        (**self).predict(image)
    }

    fn predict_batch(&self, images: &[ArrayView3<f32>]) -> Result<Vec<Array3<f32>>> {
        (**self).predict_batch(images)
    }

    fn reset(&self) -> Result<()> {
        (**self).reset()
    }

    fn target_size(&self) -> TargetSize {
        (**self).target_size()
    }
}
