use crate::config::TargetSize;
use crate::errors::Result;
use crate::traits::PredictionOracle;
use ndarray::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

type PredictFn = dyn Fn(ArrayView3<f32>) -> Array3<f32> + Send + Sync;

/// Test oracle backed by a closure; counts forward passes, batches and resets.
pub struct MockOracle {
    target: TargetSize,
    predict_fn: Box<PredictFn>,
    predictions: AtomicUsize,
    batches: AtomicUsize,
    resets: AtomicUsize,
}

impl MockOracle {
    pub fn new<F>(target: TargetSize, predict_fn: F) -> Self
    where
        F: Fn(ArrayView3<f32>) -> Array3<f32> + Send + Sync + 'static,
    {
        Self {
            target,
            predict_fn: Box::new(predict_fn),
            predictions: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    /// Every pixel of every class gets `value`.
    pub fn constant(target: TargetSize, classes: usize, value: f32) -> Self {
        Self::new(target, move |image| {
            let (rows, cols, _) = image.dim();
            Array3::from_elem((rows, cols, classes), value)
        })
    }

    /// One-class oracle echoing the first input band, so shifted inputs give
    /// shifted predictions.
    pub fn echo_first_band(target: TargetSize) -> Self {
        Self::new(target, |image| {
            image.slice(s![.., .., 0..1]).to_owned()
        })
    }

    pub fn prediction_count(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl PredictionOracle for MockOracle {
    fn predict(&self, image: ArrayView3<f32>) -> Result<Array3<f32>> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        Ok((self.predict_fn)(image))
    }

    fn predict_batch(&self, images: &[ArrayView3<f32>]) -> Result<Vec<Array3<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        images.iter().map(|image| self.predict(image.view())).collect()
    }

    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn target_size(&self) -> TargetSize {
        self.target
    }
}
