//! Foreground extraction and recompositing.
//!
//! An [`Orchestrator`] takes an encoded photo, asks a [`SegmentationOracle`]
//! (running on its own worker thread) for per-pixel foreground confidence,
//! refines that into an alpha matte, paints a new background behind it and
//! encodes the result.

pub mod compositor;
pub mod config;
pub mod error;
pub mod matte;
pub mod output;
pub mod pipeline;
pub mod segmentation;
pub mod selection;
pub mod source;

pub use compositor::CompositeResult;
pub use config::{Background, OutputFormat, OutputKind, Overlay, PipelineConfig, Quality};
pub use error::{ErrorCategory, PipelineError, Result};
pub use pipeline::{CancelToken, Checkpoint, Orchestrator, PipelineState, ProgressObserver};
pub use segmentation::{ConfidenceMap, OracleRequest, SegmentationOracle, SegmentationWorker};
pub use selection::{Point, SelectionPolygon};
pub use source::{ImageId, SourceImage};
