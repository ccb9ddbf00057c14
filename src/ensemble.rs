//! Test-time augmentation for the one-class path.
//!
//! The standardized image is pushed through the oracle unshifted and at ten
//! cyclic pixel offsets in each direction. Every prediction is resized to the
//! native geometry and the stack is averaged with weights that decay as
//! `2/sqrt(offset)`, so the unshifted pass dominates.

use ndarray::prelude::*;
use rayon::prelude::*;

use crate::errors::{CoastSegError, Result};
use crate::raster::{resize_plane, roll_pixels, roll_plane};
use crate::traits::PredictionOracle;

const FIRST_OFFSET: f64 = 100.0;
const OFFSET_STEPS: usize = 10;

/// The ten positive pixel offsets, evenly spaced from 100 to the target row
/// count and truncated to integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftSchedule {
    offsets: Vec<isize>,
}

impl ShiftSchedule {
    pub fn new(target_rows: u32) -> Self {
        let last = f64::from(target_rows);
        let step = (last - FIRST_OFFSET) / (OFFSET_STEPS - 1) as f64;
        let offsets = (0..OFFSET_STEPS)
            .map(|i| {
                if i == OFFSET_STEPS - 1 {
                    last as isize
                } else {
                    (FIRST_OFFSET + step * i as f64) as isize
                }
            })
            .collect();
        Self { offsets }
    }

    pub fn offsets(&self) -> &[isize] {
        &self.offsets
    }

    /// Identity first, then every offset forward, then every offset backward.
    pub fn members(&self) -> impl Iterator<Item = (isize, f32)> + '_ {
        std::iter::once((0, 1.0))
            .chain(self.offsets.iter().map(|&k| (k, shift_weight(k))))
            .chain(self.offsets.iter().map(|&k| (-k, shift_weight(k))))
    }

    pub fn member_count(&self) -> usize {
        1 + 2 * self.offsets.len()
    }
}

/// Trust placed in a prediction made on an input shifted by `offset` pixels.
pub fn shift_weight(offset: isize) -> f32 {
    if offset == 0 {
        return 1.0;
    }
    2.0 / (offset.unsigned_abs() as f32).sqrt()
}

#[derive(Debug, Clone)]
pub struct EnsembleMember {
    pub offset: isize,
    pub weight: f32,
    /// Native-resolution probability map
    pub prediction: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct Ensemble {
    pub combined: Array2<f32>,
    pub members: Vec<EnsembleMember>,
}

/// Run the full shift ensemble for one standardized image.
///
/// `native` is `(width, height)` of the source image. Shifted inputs are sent
/// to the oracle `batch_size` at a time. When `reverse_shift` is set each
/// shifted prediction is rolled back by its offset before resizing;
/// otherwise members are combined in their shifted frame. The oracle is reset
/// once all forward passes are done, even when one of them failed.
pub fn predict_ensemble<O: PredictionOracle>(
    image: ArrayView3<f32>,
    oracle: &O,
    native: (u32, u32),
    reverse_shift: bool,
    batch_size: usize,
) -> Result<Ensemble> {
    let schedule = ShiftSchedule::new(oracle.target_size().rows);

    let raw = run_members(image, oracle, &schedule, reverse_shift, batch_size);
    let reset = oracle.reset();
    let raw = raw?;
    reset?;

    let (width, height) = native;
    let members = raw
        .into_par_iter()
        .map(|(offset, weight, prediction)| {
            let mut prediction = resize_plane(prediction.view(), height, width)?;
            prediction.mapv_inplace(|p| if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 });
            Ok(EnsembleMember {
                offset,
                weight,
                prediction,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let combined = combine(&members)?;
    Ok(Ensemble { combined, members })
}

type RawMember = (isize, f32, Array2<f32>);

fn run_members<O: PredictionOracle>(
    image: ArrayView3<f32>,
    oracle: &O,
    schedule: &ShiftSchedule,
    reverse_shift: bool,
    batch_size: usize,
) -> Result<Vec<RawMember>> {
    let members: Vec<(isize, f32)> = schedule.members().collect();
    let mut raw = Vec::with_capacity(members.len());
    for chunk in members.chunks(batch_size.max(1)) {
        let inputs: Vec<Array3<f32>> = chunk
            .iter()
            .map(|&(offset, _)| roll_pixels(image, offset))
            .collect();
        let views: Vec<_> = inputs.iter().map(|input| input.view()).collect();
        let predictions = oracle.predict_batch(&views)?;
        if predictions.len() != chunk.len() {
            return Err(CoastSegError::validation(
                "prediction",
                format!("expected {} outputs, got {}", chunk.len(), predictions.len()),
            ));
        }

        for (&(offset, weight), prediction) in chunk.iter().zip(predictions) {
            let prediction = squeeze_binary(prediction)?;
            let prediction = if reverse_shift && offset != 0 {
                roll_plane(prediction.view(), -offset)
            } else {
                prediction
            };
            raw.push((offset, weight, prediction));
        }
    }
    Ok(raw)
}

fn squeeze_binary(prediction: Array3<f32>) -> Result<Array2<f32>> {
    match prediction.dim().2 {
        1 => Ok(prediction.index_axis_move(Axis(2), 0)),
        classes => Err(CoastSegError::validation(
            "prediction",
            format!("one-class ensemble expects a single output channel, got {classes}"),
        )),
    }
}

/// Per-pixel weighted mean of the member predictions.
pub fn combine(members: &[EnsembleMember]) -> Result<Array2<f32>> {
    let first = members
        .first()
        .ok_or_else(|| CoastSegError::validation("ensemble", "has no members"))?;
    if members.iter().any(|m| m.prediction.dim() != first.prediction.dim()) {
        return Err(CoastSegError::validation(
            "ensemble",
            "member predictions differ in shape",
        ));
    }

    let total: f32 = members.iter().map(|m| m.weight).sum();
    if total <= 0.0 {
        return Err(CoastSegError::validation("ensemble", "weights sum to zero"));
    }

    let mut sum = Array2::<f32>::zeros(first.prediction.dim());
    for member in members {
        sum.scaled_add(member.weight, &member.prediction);
    }
    sum.mapv_inplace(|v| v / total);
    Ok(sum)
}
