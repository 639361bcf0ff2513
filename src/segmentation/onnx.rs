use std::path::Path;

use anyhow::{ensure, Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::preprocess::Preprocessor;
use super::types::{ConfidenceMap, OracleRequest, SegmentationOracle};

/// Segmentation oracle backed by an ONNX matting or salient-object model
/// with one image input (NCHW, [0,1]) and a single-channel mask as its
/// first output.
pub struct OnnxOracle {
    session: Session,
    preprocessor: Preprocessor,
    input_size: u32,
}

impl OnnxOracle {
    /// Default model input edge (BiRefNet / IS-Net style square inputs)
    pub const DEFAULT_INPUT_SIZE: u32 = 1024;

    /// Load a model from an ONNX file
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading ONNX model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("ONNX model loaded ({}x{} input)", input_size, input_size);

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(input_size, input_size),
            input_size,
        })
    }
}

impl SegmentationOracle for OnnxOracle {
    fn infer(&mut self, request: &OracleRequest<'_>) -> Result<ConfidenceMap> {
        let _span = tracing::debug_span!("onnx_infer").entered();

        let input = self
            .preprocessor
            .preprocess(request.pixels, request.width, request.height)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])
            .context("Failed to run inference")?;

        let mask = outputs[0]
            .try_extract_array::<f32>()
            .context("Model output is not an f32 tensor")?;

        // Expect [.., H, W]
        let shape = mask.shape().to_vec();
        ensure!(shape.len() >= 2, "unexpected mask shape {:?}", shape);
        let mask_height = shape[shape.len() - 2];
        let mask_width = shape[shape.len() - 1];
        let plane = mask_width * mask_height;

        let raw: Vec<f32> = mask.iter().take(plane).copied().collect();
        ensure!(raw.len() == plane, "mask holds fewer than {} values", plane);
        drop(outputs);

        let probability = Preprocessor::is_probability_space(&raw);
        let threshold = request.score_threshold.max(0.01);
        let values = raw
            .into_iter()
            .map(|v| (Preprocessor::to_probability(v, probability) / threshold).min(1.0))
            .collect();

        let map = ConfidenceMap::from_vec(mask_width as u32, mask_height as u32, values)?;
        tracing::debug!(
            "Model mask {}x{} (input {}), resizing to {}x{}",
            mask_width,
            mask_height,
            self.input_size,
            request.width,
            request.height
        );
        Ok(map.resized(request.width, request.height))
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
