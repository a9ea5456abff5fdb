//! ALSA PCM device wrappers implementing the platform audio seam.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

use super::device::{AudioDevice, CaptureStream, PlaybackStream};

const WRITE_RECOVERY_LIMIT: u32 = 3;

/// The ALSA backend. Device names are ALSA PCM names
/// (e.g. "default", "plughw:0,0").
pub struct AlsaDevice {
    capture_device: String,
    playback_device: String,
}

impl AlsaDevice {
    pub fn new(capture_device: &str, playback_device: &str) -> Self {
        Self {
            capture_device: capture_device.to_string(),
            playback_device: playback_device.to_string(),
        }
    }
}

impl AudioDevice for AlsaDevice {
    fn open_capture(&self, sample_rate: u32, period_size: usize) -> Result<Box<dyn CaptureStream>> {
        let pcm = open_pcm(
            &self.capture_device,
            Direction::Capture,
            sample_rate,
            period_size,
            "Capture",
        )?;
        Ok(Box::new(AlsaCaptureStream { pcm }))
    }

    fn open_playback(
        &self,
        sample_rate: u32,
        period_size: usize,
    ) -> Result<Box<dyn PlaybackStream>> {
        let pcm = open_pcm(
            &self.playback_device,
            Direction::Playback,
            sample_rate,
            period_size,
            "Playback",
        )?;
        Ok(Box::new(AlsaPlaybackStream { pcm }))
    }
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    period_size: usize,
    dir_name: &str,
) -> Result<PCM> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters: mono float at exactly the requested rate.
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::FloatLE)?;
        hwp.set_channels(1)?;
        hwp.set_rate(sample_rate, ValueOr::Nearest)?;
        hwp.set_period_size_near(period_size as alsa::pcm::Frames, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters. The scheduling math upstream
    // assumes the exact rate, so a device that cannot do it is unusable
    // ("default"/"plug" devices convert and always can).
    let (actual_rate, actual_period) = {
        let hwp = pcm.hw_params_current()?;
        (hwp.get_rate()?, hwp.get_period_size()? as usize)
    };
    if actual_rate != sample_rate {
        bail!(
            "PCM device '{}' negotiated {}Hz, need exactly {}Hz",
            device,
            actual_rate,
            sample_rate
        );
    }

    log::info!(
        "ALSA {}: device={}, rate={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_period,
    );

    Ok(pcm)
}

struct AlsaCaptureStream {
    pcm: PCM,
}

impl CaptureStream for AlsaCaptureStream {
    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        // The IO handle borrows the PCM, so it is re-created per call; it is
        // a thin wrapper and this is how the alsa crate expects short-lived
        // typed access.
        let io = self.pcm.io_f32()?;
        match io.readi(buf) {
            Ok(frames) => Ok(frames),
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                self.pcm
                    .prepare()
                    .context("Failed to recover PCM capture")?;
                Ok(0)
            }
        }
    }
}

struct AlsaPlaybackStream {
    pcm: PCM,
}

impl PlaybackStream for AlsaPlaybackStream {
    fn write(&mut self, buf: &[f32]) -> Result<()> {
        let io = self.pcm.io_f32()?;
        let mut written = 0;
        let mut retries = 0u32;
        // Retry loop handles short writes and XRUN recovery without losing
        // samples; persistent failure drops the remainder to break the loop.
        while written < buf.len() {
            match io.writei(&buf[written..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retries += 1;
                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM playback")?;
                    if retries >= WRITE_RECOVERY_LIMIT {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten samples.",
                            retries,
                            buf.len() - written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
