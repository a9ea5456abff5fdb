//! audio - Capture, playback scheduling, and the platform device seam.
//!
//! Uses ALSA for audio I/O. Capture produces fixed-size PCM16 frames at the
//! input rate; playback schedules decoded float buffers sample-accurately at
//! the output rate and supports barge-in interruption.

pub mod alsa_device;
mod capture;
mod device;
mod playback;

pub use alsa_device::AlsaDevice;
pub use capture::{AudioFrame, CaptureEvent, CaptureSource, quantize};
pub use device::{AudioDevice, CaptureStream, PlaybackStream};
pub use playback::{Playback, PlaybackBuffer, PlaybackCommand, PlaybackScheduler};
