//! Platform audio capability seam.
//!
//! A device backend hands out capture and playback streams at a fixed sample
//! rate; everything above this trait works with mono float samples in
//! [-1.0, 1.0] and knows nothing about the platform audio API underneath.

use anyhow::Result;

/// A platform audio backend that can open capture and playback streams.
pub trait AudioDevice: Send + Sync {
    /// Open the input device for mono float capture at exactly `sample_rate`.
    /// `period_size` is the preferred number of samples per read.
    fn open_capture(&self, sample_rate: u32, period_size: usize) -> Result<Box<dyn CaptureStream>>;

    /// Open the output device for mono float playback at exactly `sample_rate`.
    /// `period_size` is the preferred number of samples per write.
    fn open_playback(&self, sample_rate: u32, period_size: usize)
    -> Result<Box<dyn PlaybackStream>>;
}

/// One open capture stream. Dropping it releases the device.
pub trait CaptureStream: Send {
    /// Block until samples are available and fill the front of `buf`.
    /// Returns the number of samples read; 0 means a transient fault was
    /// recovered in-stream and the caller should simply read again.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize>;
}

/// One open playback stream. Dropping it releases the device.
pub trait PlaybackStream: Send {
    /// Write every sample in `buf`, blocking while the device drains.
    fn write(&mut self, buf: &[f32]) -> Result<()>;
}
