pub mod body_tracking_pipeline;
pub mod fps_counter;
pub mod hand_off;
pub mod infrastructure;
pub mod pipeline_error;
pub mod pipeline_logger;
pub mod pipeline_state;
pub mod result_sink;
pub mod skeleton_export;
