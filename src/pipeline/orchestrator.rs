use image::RgbaImage;

use super::context::{ActiveJob, PipelineContext};
use super::progress::{Checkpoint, ProgressObserver};
use super::state::PipelineState;
use super::CancelToken;
use crate::compositor::{self, CompositeResult};
use crate::config::{Background, OutputFormat, Overlay, PipelineConfig, Quality};
use crate::error::{ErrorCategory, PipelineError, Result};
use crate::matte;
use crate::segmentation::{ConfidenceMap, SegmentRequest, SegmentResponse, SegmentationWorker};
use crate::selection::SelectionPolygon;
use crate::source::{ImageId, SourceImage};

/// Last failure, kept until the host dismisses it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub category: ErrorCategory,
    pub message: String,
}

/// Sequences decode, segmentation, refinement, compositing and encoding for
/// one image at a time.
///
/// Segmentation runs on the worker thread; everything else runs on the
/// calling thread inside [`Orchestrator::poll`] or [`Orchestrator::wait`].
pub struct Orchestrator {
    worker: SegmentationWorker,
    state: PipelineState,
    pub(super) context: PipelineContext,
    next_generation: u64,
    observer: Option<Box<dyn ProgressObserver>>,
    last_error: Option<ErrorNotice>,
}

impl Orchestrator {
    pub fn new(worker: SegmentationWorker) -> Self {
        Self::with_config(worker, PipelineConfig::default())
    }

    pub fn with_config(worker: SegmentationWorker, config: PipelineConfig) -> Self {
        Self {
            worker,
            state: PipelineState::Idle,
            context: PipelineContext::new(config),
            next_generation: 1,
            observer: None,
            last_error: None,
        }
    }

    pub fn set_observer<O: ProgressObserver + 'static>(&mut self, observer: O) {
        self.observer = Some(Box::new(observer));
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.context.config
    }

    pub fn source(&self) -> Option<&SourceImage> {
        self.context.source.as_ref()
    }

    pub fn image_id(&self) -> Option<ImageId> {
        self.context.source.as_ref().map(SourceImage::id)
    }

    /// Generation of the segmentation job in flight
    pub fn generation(&self) -> Option<u64> {
        self.context.job.as_ref().map(|job| job.generation)
    }

    pub fn selection(&self) -> &SelectionPolygon {
        &self.context.selection
    }

    /// Cached post-refinement matte
    pub fn matte(&self) -> Option<&RgbaImage> {
        self.context.matte.as_ref()
    }

    pub fn result(&self) -> Option<&CompositeResult> {
        self.context.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&ErrorNotice> {
        self.last_error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    /// Decode `bytes` and start segmenting it.
    ///
    /// The previous image, its matte and its result are only replaced once
    /// decoding succeeds; an unreadable upload leaves them in place.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<ImageId> {
        let _span = tracing::info_span!("load_image", bytes = bytes.len()).entered();
        self.transition(PipelineState::Loading);
        let decoded = SourceImage::decode(bytes);
        self.start(decoded)
    }

    /// Same as [`Orchestrator::load_image`] for already decoded pixels
    pub fn load_rgba(&mut self, pixels: RgbaImage) -> Result<ImageId> {
        let _span = tracing::info_span!("load_rgba").entered();
        self.transition(PipelineState::Loading);
        let decoded = SourceImage::from_rgba(pixels);
        self.start(decoded)
    }

    fn start(&mut self, decoded: Result<SourceImage>) -> Result<ImageId> {
        let source = decoded.map_err(|err| self.fail(err))?;
        self.context.clear_image();
        let id = source.id();
        let (width, height) = source.dimensions();
        tracing::info!("Loaded image {} ({}x{})", id, width, height);

        self.context.source = Some(source);
        self.notify(Checkpoint::Decoded);
        self.dispatch()?;
        Ok(id)
    }

    /// Start a new segmentation run for the current image, superseding any
    /// run in flight
    fn dispatch(&mut self) -> Result<()> {
        self.context.cancel_job();

        let quality = self.context.config.quality;
        let (image_id, working) = match self.context.source.as_ref() {
            Some(source) => (source.id(), source.working_buffer(quality)),
            None => return Err(PipelineError::NoImage),
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let cancel = CancelToken::new();
        let (width, height) = working.dimensions();
        let request = SegmentRequest {
            image_id,
            generation,
            pixels: working.as_raw().clone(),
            width,
            height,
            quality,
            cancel: cancel.clone(),
        };
        self.context.working = Some(working);

        if !self.worker.submit(request) {
            return Err(self.fail(PipelineError::WorkerGone));
        }

        tracing::info!(
            "Segmenting {} at {}x{} ({:?}, generation {})",
            image_id,
            width,
            height,
            quality,
            generation
        );
        self.context.job = Some(ActiveJob { generation, cancel });
        self.transition(PipelineState::Segmenting);
        Ok(())
    }

    /// Apply every response that has already arrived without blocking
    pub fn poll(&mut self) -> Result<PipelineState> {
        loop {
            let response = match self.worker.try_recv() {
                Ok(Some(response)) => response,
                Ok(None) => break,
                Err(err) if self.state.is_busy() => return Err(self.fail(err)),
                Err(_) => break,
            };
            self.handle_response(response)?;
        }
        Ok(self.state)
    }

    /// Block until the run in flight has finished
    pub fn wait(&mut self) -> Result<PipelineState> {
        while self.state.is_busy() {
            let response = self.worker.recv().map_err(|err| self.fail(err))?;
            self.handle_response(response)?;
        }
        Ok(self.state)
    }

    /// Apply one worker response.
    ///
    /// Returns `Ok(false)` for a response that belongs to a superseded run or
    /// another image; those are dropped without touching any state.
    pub fn handle_response(&mut self, response: SegmentResponse) -> Result<bool> {
        let image_id = self.image_id();
        let job = match self.context.job.take() {
            Some(job)
                if job.generation == response.generation()
                    && image_id == Some(response.image_id()) =>
            {
                job
            }
            other => {
                tracing::debug!(
                    "Discarding stale response for generation {} (current {:?})",
                    response.generation(),
                    other.as_ref().map(|job| job.generation)
                );
                self.context.job = other;
                return Ok(false);
            }
        };

        match response {
            SegmentResponse::Confidence { map, .. } => self.finish_run(&map, &job.cancel)?,
            SegmentResponse::Failed { error, .. } => {
                return Err(self.fail(PipelineError::Oracle(error)));
            }
            SegmentResponse::Cancelled { .. } => {
                return Err(self.fail(PipelineError::Cancelled));
            }
        }
        Ok(true)
    }

    fn finish_run(&mut self, map: &ConfidenceMap, cancel: &CancelToken) -> Result<()> {
        self.transition(PipelineState::Refining);
        self.notify(Checkpoint::Segmented);

        let mut buffer = match self.context.working.clone() {
            Some(buffer) => buffer,
            None => return Err(self.fail(PipelineError::NoImage)),
        };
        if let Err(err) = matte::apply_confidence(&mut buffer, map, self.context.config.quality) {
            return Err(self.fail(err));
        }

        let selection = self.context.working_selection();
        let stats = matte::refine(
            &mut buffer,
            self.context.config.quality,
            selection.as_ref(),
            cancel,
        )
        .map_err(|err| self.fail(err))?;
        tracing::debug!(?stats, "Matte refined");

        self.context.matte = Some(buffer);
        self.context.matte_inputs = Some((
            self.context.config.quality,
            self.context.selection.clone(),
        ));
        self.notify(Checkpoint::Refined);
        self.recomposite()
    }

    /// Composite and encode from the cached matte
    fn recomposite(&mut self) -> Result<()> {
        if self.context.matte.is_none() {
            return Ok(());
        }
        self.transition(PipelineState::Compositing);

        let image = match self.context.matte.as_ref() {
            Some(matte) => compositor::composite(matte, &self.context.config),
            None => return Ok(()),
        };
        self.notify(Checkpoint::Composited);

        let result = CompositeResult::encode(image, self.context.config.output_format)
            .map_err(|err| self.fail(err))?;
        tracing::info!(
            "Composite ready: {}x{}, {} bytes of {:?}",
            result.image.width(),
            result.image.height(),
            result.encoded.len(),
            result.format
        );

        self.context.result = Some(result);
        self.notify(Checkpoint::Encoded);
        self.transition(PipelineState::Ready);
        Ok(())
    }

    /// Recomposite after a background, overlay or format change; while
    /// segmenting the new setting applies when the run finishes.
    ///
    /// In the error state the cached matte is reused only if it was built
    /// with the current quality and selection, otherwise the image is
    /// segmented again.
    fn refresh_composite(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Ready => self.recomposite(),
            PipelineState::Error if self.context.matte_is_current() => self.recomposite(),
            PipelineState::Error if self.context.source.is_some() => {
                tracing::debug!("Cached matte is out of date, segmenting again");
                self.dispatch()
            }
            _ => Ok(()),
        }
    }

    pub fn set_background(&mut self, background: Background) -> Result<()> {
        tracing::debug!("Background set to {:?}", BackgroundKind::of(&background));
        self.context.config.background = background;
        self.refresh_composite()
    }

    /// Decode and apply a custom background image. A decode failure leaves
    /// the pipeline state and cached matte untouched.
    pub fn set_custom_background(&mut self, bytes: &[u8]) -> Result<()> {
        match Background::custom_from_bytes(bytes) {
            Ok(background) => self.set_background(background),
            Err(err) => {
                tracing::warn!("Rejected custom background: {}", err.user_message());
                self.record(&err);
                Err(err)
            }
        }
    }

    pub fn set_overlay(&mut self, overlay: Overlay) -> Result<()> {
        tracing::debug!("Overlay set to {:?}", overlay);
        self.context.config.overlay = overlay;
        self.refresh_composite()
    }

    pub fn set_output_format(&mut self, format: OutputFormat) -> Result<()> {
        tracing::debug!("Output format set to {:?}", format);
        self.context.config.output_format = format;
        self.refresh_composite()
    }

    /// Apply a selection (source pixel coordinates). An empty polygon removes
    /// the restriction. Re-segments the current image.
    pub fn set_selection(&mut self, mut selection: SelectionPolygon) -> Result<()> {
        selection.close();
        tracing::debug!("Selection set ({} points)", selection.points().len());
        self.context.selection = selection;
        self.resegment()
    }

    pub fn set_quality(&mut self, quality: Quality) -> Result<()> {
        if quality == self.context.config.quality {
            return Ok(());
        }
        tracing::debug!("Quality set to {:?}", quality);
        self.context.config.quality = quality;
        self.resegment()
    }

    fn resegment(&mut self) -> Result<()> {
        if self.context.source.is_some() {
            self.dispatch()
        } else {
            Ok(())
        }
    }

    /// Drop the current image and everything derived from it
    pub fn reset(&mut self) {
        tracing::info!("Pipeline reset");
        self.context.clear_image();
        self.last_error = None;
        self.transition(PipelineState::Idle);
    }

    fn record(&mut self, err: &PipelineError) {
        self.last_error = Some(ErrorNotice {
            category: err.category(),
            message: err.user_message(),
        });
    }

    /// Enter the error state, keeping the previous result, and hand the
    /// error back to the caller
    fn fail(&mut self, err: PipelineError) -> PipelineError {
        tracing::error!("Pipeline failed while {}: {}", self.state, err.user_message());
        self.record(&err);
        self.context.cancel_job();
        self.transition(PipelineState::Error);
        err
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        if self.state != next {
            tracing::debug!("State {} -> {}", self.state, next);
        }
        self.state = next;
    }

    fn notify(&mut self, checkpoint: Checkpoint) {
        tracing::debug!("Progress {}% ({:?})", checkpoint.percent(), checkpoint);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_progress(checkpoint);
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.context.cancel_job();
    }
}

/// Background description for logs without dumping pixel data
#[derive(Debug)]
enum BackgroundKind {
    Transparent,
    Solid([u8; 3]),
    Custom(u32, u32),
}

impl BackgroundKind {
    fn of(background: &Background) -> Self {
        match background {
            Background::Transparent => Self::Transparent,
            Background::Solid(color) => Self::Solid(*color),
            Background::Custom(image) => Self::Custom(image.width(), image.height()),
        }
    }
}
