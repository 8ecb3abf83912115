pub mod playback;
pub mod recording;
