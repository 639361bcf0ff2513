use anyhow::{bail, ensure, Context, Result};
use ndarray::Array2;

use super::types::{ConfidenceMap, OracleRequest, SegmentationOracle};
use crate::config::Quality;
use crate::pipeline::CancelToken;

/// Input of one ensemble run, borrowed from the worker's request
#[derive(Debug, Clone, Copy)]
pub struct EnsembleInput<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
}

/// Why an ensemble run produced no map
#[derive(Debug)]
pub enum EnsembleError {
    Cancelled,
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for EnsembleError {
    fn from(err: anyhow::Error) -> Self {
        EnsembleError::Failed(err)
    }
}

/// Run the oracle once per ensemble slot and average the results.
///
/// Iteration `i` uses score threshold `base - 0.02 * i`. Any oracle failure
/// aborts the whole run; no partial map is returned.
pub fn segment(
    oracle: &mut dyn SegmentationOracle,
    input: EnsembleInput<'_>,
    cancel: &CancelToken,
) -> Result<ConfidenceMap, EnsembleError> {
    let _span = tracing::debug_span!("ensemble", quality = ?input.quality).entered();

    let runs = input.quality.params().ensemble_size;
    let mut samples = Vec::with_capacity(runs);

    for iteration in 0..runs {
        if cancel.is_cancelled() {
            tracing::debug!("Ensemble cancelled before run {}", iteration);
            return Err(EnsembleError::Cancelled);
        }

        let request = OracleRequest {
            pixels: input.pixels,
            width: input.width,
            height: input.height,
            quality: input.quality,
            score_threshold: input.quality.score_threshold(iteration),
        };

        let map = oracle
            .infer(&request)
            .with_context(|| format!("{} failed on ensemble run {}", oracle.name(), iteration))?;

        if map.dimensions() != (input.width, input.height) {
            return Err(EnsembleError::Failed(anyhow::anyhow!(
                "{} returned a {}x{} map for a {}x{} image",
                oracle.name(),
                map.width(),
                map.height(),
                input.width,
                input.height
            )));
        }

        tracing::debug!(
            "Ensemble run {}/{} done (score threshold {:.2})",
            iteration + 1,
            runs,
            request.score_threshold
        );
        samples.push(map);
    }

    average(samples).map_err(EnsembleError::Failed)
}

/// Per-pixel mean of equally sized maps
pub fn average(samples: Vec<ConfidenceMap>) -> Result<ConfidenceMap> {
    let count = samples.len();
    let mut samples = samples.into_iter();
    let Some(first) = samples.next() else {
        bail!("cannot average an empty ensemble");
    };

    let mut sum: Array2<f32> = first.into_values();
    for sample in samples {
        ensure!(
            sample.values().dim() == sum.dim(),
            "ensemble samples differ in size"
        );
        sum += sample.values();
    }

    if count > 1 {
        let scale = 1.0 / count as f32;
        sum.mapv_inplace(|v| (v * scale).clamp(0.0, 1.0));
    }
    Ok(ConfidenceMap::from_array(sum))
}
