use image::RgbaImage;

use super::CancelToken;
use crate::compositor::CompositeResult;
use crate::config::{PipelineConfig, Quality};
use crate::selection::SelectionPolygon;
use crate::source::SourceImage;

/// The segmentation job currently in flight
#[derive(Debug, Clone)]
pub(crate) struct ActiveJob {
    pub generation: u64,
    pub cancel: CancelToken,
}

/// Everything the pipeline knows about the current image.
///
/// Owned by exactly one orchestrator; buffers never leave it except as
/// clones handed to the host.
#[derive(Debug, Default)]
pub struct PipelineContext {
    pub(crate) source: Option<SourceImage>,
    /// Working buffer of the last dispatched run
    pub(crate) working: Option<RgbaImage>,
    /// Post-refinement matte, the cache recompositing starts from
    pub(crate) matte: Option<RgbaImage>,
    /// Quality and selection the matte was refined with
    pub(crate) matte_inputs: Option<(Quality, SelectionPolygon)>,
    pub(crate) result: Option<CompositeResult>,
    pub(crate) config: PipelineConfig,
    pub(crate) selection: SelectionPolygon,
    pub(crate) job: Option<ActiveJob>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Cancel the job in flight, if any
    pub(crate) fn cancel_job(&mut self) {
        if let Some(job) = self.job.take() {
            tracing::debug!("Cancelling segmentation job {}", job.generation);
            job.cancel.cancel();
        }
    }

    /// Drop all per-image data, keeping the configuration
    pub(crate) fn clear_image(&mut self) {
        self.cancel_job();
        self.source = None;
        self.working = None;
        self.matte = None;
        self.matte_inputs = None;
        self.result = None;
        self.selection = SelectionPolygon::new();
    }

    /// Whether the cached matte was built with the current quality and
    /// selection
    pub(crate) fn matte_is_current(&self) -> bool {
        match &self.matte_inputs {
            Some((quality, selection)) => {
                self.matte.is_some()
                    && *quality == self.config.quality
                    && *selection == self.selection
            }
            None => false,
        }
    }

    /// Current selection in working-buffer coordinates, `None` if unrestricted
    pub(crate) fn working_selection(&self) -> Option<SelectionPolygon> {
        if self.selection.is_empty() {
            return None;
        }
        let source = self.source.as_ref()?;
        let working = self.working.as_ref()?;
        let (sw, sh) = source.dimensions();
        let (ww, wh) = working.dimensions();
        Some(
            self.selection
                .scaled(ww as f32 / sw as f32, wh as f32 / sh as f32),
        )
    }
}
