use std::fmt;

/// Lifecycle of a body tracking pipeline.
///
/// ```text
/// Idle --start--> Running --failure--> Failed
///   |                |                   |
///   +----dispose-----+------dispose------+--> Disposed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Failed,
    /// Terminal.
    Disposed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Running) | (Running, Failed) | (Idle | Running | Failed, Disposed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Disposed
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Failed => "failed",
            PipelineState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}
