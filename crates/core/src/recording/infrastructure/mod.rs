pub mod color_conversion;
pub mod container;
pub mod recording_error;
pub mod recording_reader;
pub mod recording_writer;
