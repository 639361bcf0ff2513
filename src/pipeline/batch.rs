use super::orchestrator::Orchestrator;
use crate::compositor::CompositeResult;
use crate::error::{PipelineError, Result};
use crate::output::OutputSink;

/// Outcome of [`Orchestrator::export_batch`]
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Names the sink stored results under
    pub written: Vec<String>,
    pub failed: Vec<(String, PipelineError)>,
}

impl Orchestrator {
    /// Run each `(name, encoded image)` through the whole pipeline, strictly
    /// one after another. A failing item does not stop the batch.
    pub fn process_batch<I>(&mut self, inputs: I) -> Vec<(String, Result<CompositeResult>)>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let _span = tracing::info_span!("batch").entered();

        let outcomes: Vec<_> = inputs
            .into_iter()
            .map(|(name, bytes)| {
                let outcome = self.process_one(&bytes);
                match &outcome {
                    Ok(result) => tracing::info!(
                        "{}: done ({}x{})",
                        name,
                        result.image.width(),
                        result.image.height()
                    ),
                    Err(err) => tracing::warn!("{}: {}", name, err.user_message()),
                }
                (name, outcome)
            })
            .collect();

        let failures = outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count();
        tracing::info!(
            "Batch finished: {} succeeded, {} failed",
            outcomes.len() - failures,
            failures
        );
        outcomes
    }

    /// [`Orchestrator::process_batch`] followed by writing every success to
    /// `sink`. Only a failure to finish the sink aborts.
    pub fn export_batch<I>(&mut self, inputs: I, sink: &mut dyn OutputSink) -> Result<BatchReport>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut report = BatchReport::default();
        for (name, outcome) in self.process_batch(inputs) {
            let written = outcome.and_then(|result| sink.write_result(&name, &result));
            match written {
                Ok(stored_as) => report.written.push(stored_as),
                Err(err) => report.failed.push((name, err)),
            }
        }
        sink.finish()?;
        Ok(report)
    }

    fn process_one(&mut self, bytes: &[u8]) -> Result<CompositeResult> {
        self.load_image(bytes)?;
        self.wait()?;
        self.context.result.clone().ok_or(PipelineError::NoImage)
    }
}
