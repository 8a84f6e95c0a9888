use crate::tracking::domain::tracker_configuration::ProcessingMode;

/// Execution providers for a processing mode.
///
/// `Cpu` registers none, so ONNX Runtime uses its default CPU provider. `Gpu`
/// picks the platform accelerator; ONNX Runtime falls back to CPU when it is
/// unavailable.
pub fn execution_providers_for(
    mode: ProcessingMode,
) -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    match mode {
        ProcessingMode::Cpu => Vec::new(),
        ProcessingMode::Gpu => preferred_execution_providers(),
    }
}

fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}
