//! Isolated segmentation worker.
//!
//! The oracle lives on a dedicated thread and is only reachable through
//! [`SegmentRequest`] / [`SegmentResponse`] messages. Pixel data is moved into
//! the request and the confidence map is moved out of the response; nothing
//! mutable is shared apart from the job's [`CancelToken`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use super::ensemble::{self, EnsembleError, EnsembleInput};
use super::types::{ConfidenceMap, SegmentationOracle};
use crate::config::Quality;
use crate::error::PipelineError;
use crate::pipeline::CancelToken;
use crate::source::ImageId;

/// One segmentation job
#[derive(Debug)]
pub struct SegmentRequest {
    pub image_id: ImageId,
    pub generation: u64,
    /// Row-major RGBA bytes of the working buffer
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub enum SegmentResponse {
    Confidence {
        image_id: ImageId,
        generation: u64,
        map: ConfidenceMap,
    },
    Failed {
        image_id: ImageId,
        generation: u64,
        error: String,
    },
    Cancelled {
        image_id: ImageId,
        generation: u64,
    },
}

impl SegmentResponse {
    pub fn image_id(&self) -> ImageId {
        match self {
            Self::Confidence { image_id, .. }
            | Self::Failed { image_id, .. }
            | Self::Cancelled { image_id, .. } => *image_id,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::Confidence { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Cancelled { generation, .. } => *generation,
        }
    }
}

enum WorkerMessage {
    Segment(SegmentRequest),
    Shutdown,
}

/// Handle to the worker thread. Dropping it stops the thread.
pub struct SegmentationWorker {
    requests: Sender<WorkerMessage>,
    responses: Receiver<SegmentResponse>,
    handle: Option<JoinHandle<()>>,
}

impl SegmentationWorker {
    /// Spawn the worker. The oracle is built on the worker thread; if
    /// `factory` fails, every request is answered with that failure.
    pub fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn SegmentationOracle>> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<WorkerMessage>();
        let (response_tx, response_rx) = mpsc::channel::<SegmentResponse>();

        let handle = thread::Builder::new()
            .name("segmentation-worker".into())
            .spawn(move || run_worker(factory, request_rx, response_tx))?;

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            handle: Some(handle),
        })
    }

    /// Convenience for an oracle that is already constructed
    pub fn with_oracle(oracle: Box<dyn SegmentationOracle>) -> Result<Self> {
        Self::spawn(move || Ok(oracle))
    }

    /// Queue a job. Returns `false` if the worker thread is gone.
    pub fn submit(&self, request: SegmentRequest) -> bool {
        self.requests.send(WorkerMessage::Segment(request)).is_ok()
    }

    /// Non-blocking poll
    pub fn try_recv(&self) -> Result<Option<SegmentResponse>, PipelineError> {
        match self.responses.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PipelineError::WorkerGone),
        }
    }

    /// Block until a response arrives
    pub fn recv(&self) -> Result<SegmentResponse, PipelineError> {
        self.responses.recv().map_err(|_| PipelineError::WorkerGone)
    }

    /// Block for at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<SegmentResponse>, PipelineError> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::WorkerGone),
        }
    }
}

impl Drop for SegmentationWorker {
    fn drop(&mut self) {
        let _ = self.requests.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Segmentation worker panicked");
            }
        }
    }
}

fn run_worker<F>(factory: F, requests: Receiver<WorkerMessage>, responses: Sender<SegmentResponse>)
where
    F: FnOnce() -> Result<Box<dyn SegmentationOracle>>,
{
    let mut oracle = match factory() {
        Ok(oracle) => {
            tracing::info!("Segmentation oracle '{}' ready", oracle.name());
            Ok(oracle)
        }
        Err(err) => {
            tracing::error!("Failed to initialize segmentation oracle: {:#}", err);
            Err(format!("oracle failed to initialize: {:#}", err))
        }
    };

    while let Ok(message) = requests.recv() {
        let request = match message {
            WorkerMessage::Segment(request) => request,
            WorkerMessage::Shutdown => break,
        };

        let SegmentRequest {
            image_id,
            generation,
            pixels,
            width,
            height,
            quality,
            cancel,
        } = request;

        let response = match oracle.as_mut() {
            Err(init_error) => SegmentResponse::Failed {
                image_id,
                generation,
                error: init_error.clone(),
            },
            Ok(oracle) => {
                let input = EnsembleInput {
                    pixels: &pixels,
                    width,
                    height,
                    quality,
                };
                match ensemble::segment(&mut **oracle, input, &cancel) {
                    Ok(map) => SegmentResponse::Confidence {
                        image_id,
                        generation,
                        map,
                    },
                    Err(EnsembleError::Cancelled) => SegmentResponse::Cancelled {
                        image_id,
                        generation,
                    },
                    Err(EnsembleError::Failed(err)) => {
                        tracing::warn!("Segmentation job {} failed: {:#}", generation, err);
                        SegmentResponse::Failed {
                            image_id,
                            generation,
                            error: format!("{:#}", err),
                        }
                    }
                }
            }
        };

        if responses.send(response).is_err() {
            break;
        }
    }

    tracing::debug!("Segmentation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::types::OracleRequest;

    fn request(generation: u64, cancel: CancelToken) -> SegmentRequest {
        SegmentRequest {
            image_id: ImageId::new(),
            generation,
            pixels: vec![0; 2 * 2 * 4],
            width: 2,
            height: 2,
            quality: Quality::Low,
            cancel,
        }
    }

    fn constant_oracle(value: f32) -> Box<dyn SegmentationOracle> {
        Box::new(move |req: &OracleRequest<'_>| -> Result<ConfidenceMap> {
            Ok(ConfidenceMap::filled(req.width, req.height, value))
        })
    }

    #[test]
    fn answers_with_generation_tag() {
        let worker = SegmentationWorker::with_oracle(constant_oracle(0.5)).unwrap();
        assert!(worker.submit(request(7, CancelToken::new())));

        match worker.recv().unwrap() {
            SegmentResponse::Confidence { generation, map, .. } => {
                assert_eq!(generation, 7);
                assert_eq!(map.len(), 4);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn init_failure_is_reported_per_request() {
        let worker = SegmentationWorker::spawn(|| anyhow::bail!("no model file")).unwrap();
        worker.submit(request(1, CancelToken::new()));
        worker.submit(request(2, CancelToken::new()));

        for expected in [1, 2] {
            match worker.recv().unwrap() {
                SegmentResponse::Failed {
                    generation, error, ..
                } => {
                    assert_eq!(generation, expected);
                    assert!(error.contains("no model file"));
                }
                other => panic!("unexpected response {other:?}"),
            }
        }
    }

    #[test]
    fn cancelled_jobs_report_cancelled() {
        let worker = SegmentationWorker::with_oracle(constant_oracle(1.0)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        worker.submit(request(3, token));
        assert!(matches!(
            worker.recv().unwrap(),
            SegmentResponse::Cancelled { generation: 3, .. }
        ));
    }

    #[test]
    fn try_recv_is_empty_without_jobs() {
        let worker = SegmentationWorker::with_oracle(constant_oracle(1.0)).unwrap();
        assert!(matches!(worker.try_recv(), Ok(None)));
        assert!(matches!(
            worker.recv_timeout(Duration::from_millis(10)),
            Ok(None)
        ));
    }
}
