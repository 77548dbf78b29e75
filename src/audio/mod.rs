//! Audio subsystem: capture, ring buffer, upload encoding, decode, playback.

pub mod capture;
pub mod decode;
pub mod format;
pub mod playback;
pub mod ring_buffer;

/// Sample rate recordings are resampled to before upload.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
