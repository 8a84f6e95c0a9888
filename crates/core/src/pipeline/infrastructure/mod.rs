pub mod acquisition_loop;
pub mod tracking_loop;

use super::hand_off::HandOff;
use super::pipeline_error::PipelineError;
use super::result_sink::ResultSink;

/// Records `error` as the pipeline failure and reports it, unless an earlier
/// failure was already reported.
fn escalate(hand_off: &HandOff, sink: &dyn ResultSink, error: PipelineError) {
    if hand_off.fail(error.clone()) {
        log::error!("Pipeline failed: {error}");
        sink.on_failed(&error);
    } else {
        log::debug!("Suppressed failure after the first: {error}");
    }
}
