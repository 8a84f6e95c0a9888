pub mod playback_source;
