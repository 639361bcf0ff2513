mod border_key;
pub mod ensemble;
#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
mod preprocess;
pub mod types;
pub mod worker;

pub use border_key::BorderKeyOracle;
#[cfg(feature = "onnx")]
pub use onnx::OnnxOracle;
#[cfg(feature = "onnx")]
pub use preprocess::Preprocessor;
pub use types::{ConfidenceMap, OracleRequest, SegmentationOracle};
pub use worker::{SegmentRequest, SegmentResponse, SegmentationWorker};

use anyhow::Result;

/// Create the default oracle: an ONNX model when a path is given, else the
/// border colour key
pub fn create_default_oracle(model_path: Option<&str>) -> Result<Box<dyn SegmentationOracle>> {
    match model_path {
        #[cfg(feature = "onnx")]
        Some(path) => Ok(Box::new(OnnxOracle::new(path, OnnxOracle::DEFAULT_INPUT_SIZE)?)),
        #[cfg(not(feature = "onnx"))]
        Some(path) => anyhow::bail!(
            "cannot load model {}: built without the `onnx` feature",
            path
        ),
        None => Ok(Box::new(BorderKeyOracle::default())),
    }
}
