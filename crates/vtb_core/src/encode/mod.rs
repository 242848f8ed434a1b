//! Video encoding of rendered frame sequences.

mod ffmpeg;

pub use ffmpeg::{EncodeError, EncodeStatus, FrameEncoder, FRAME_PATTERN};
