/// Progress points reported while an image moves through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Checkpoint {
    Decoded,
    Segmented,
    Refined,
    Composited,
    Encoded,
}

impl Checkpoint {
    pub fn percent(self) -> u8 {
        match self {
            Checkpoint::Decoded => 15,
            Checkpoint::Segmented => 70,
            Checkpoint::Refined => 85,
            Checkpoint::Composited => 95,
            Checkpoint::Encoded => 100,
        }
    }
}

/// Receives progress notifications from the orchestrator
pub trait ProgressObserver {
    fn on_progress(&mut self, checkpoint: Checkpoint);
}

impl<F> ProgressObserver for F
where
    F: FnMut(Checkpoint),
{
    fn on_progress(&mut self, checkpoint: Checkpoint) {
        self(checkpoint)
    }
}
