//! Per-image pipeline state machine and its host-facing API.

mod batch;
mod cancel;
mod context;
mod orchestrator;
mod progress;
mod state;

pub use batch::BatchReport;
pub use cancel::CancelToken;
pub use context::PipelineContext;
pub use orchestrator::{ErrorNotice, Orchestrator};
pub use progress::{Checkpoint, ProgressObserver};
pub use state::PipelineState;
