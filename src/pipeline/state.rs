use std::fmt;

/// Stage the orchestrator is in for the current image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Loading,
    Segmenting,
    Refining,
    Compositing,
    Ready,
    Error,
}

impl PipelineState {
    /// Whether the orchestrator may move from `self` to `next`
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;

        if self == next || matches!(next, Idle | Loading) {
            return true;
        }
        matches!(
            (self, next),
            (Loading, Segmenting | Error)
                | (Segmenting, Refining | Error)
                | (Refining, Compositing | Error)
                | (Compositing, Ready | Error)
                | (Ready, Compositing | Segmenting | Error)
                | (Error, Segmenting | Compositing)
        )
    }

    /// True while a segmentation job is outstanding
    pub fn is_busy(self) -> bool {
        self == PipelineState::Segmenting
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Loading => "loading",
            PipelineState::Segmenting => "segmenting",
            PipelineState::Refining => "refining",
            PipelineState::Compositing => "compositing",
            PipelineState::Ready => "ready",
            PipelineState::Error => "error",
        };
        f.write_str(name)
    }
}
