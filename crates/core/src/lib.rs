pub mod pipeline;
pub mod recording;
pub mod shared;
pub mod source;
pub mod tracking;
