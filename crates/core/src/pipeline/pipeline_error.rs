use thiserror::Error;

use super::pipeline_state::PipelineState;

/// Failures surfaced by the body tracking pipeline.
///
/// End of stream is never an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("source failed after {attempts} consecutive attempts: {message}")]
    TransientIo { attempts: u32, message: String },
    #[error("source failed: {0}")]
    Source(String),
    #[error("body tracking failed: {0}")]
    Inference(String),
    #[error("pipeline has been disposed")]
    Disposed,
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = PipelineError::TransientIo {
            attempts: 3,
            message: "usb reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "source failed after 3 consecutive attempts: usb reset"
        );
        let err = PipelineError::InvalidState {
            operation: "start",
            state: PipelineState::Running,
        };
        assert_eq!(err.to_string(), "cannot start while running");
    }
}
