//! Microphone capture: a dedicated OS thread turns the device's float stream
//! into fixed-size PCM16 frames.
//!
//! Runs on std::thread (NOT a tokio task) so real-time device reads never
//! contend with the async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use super::device::{AudioDevice, CaptureStream};
use crate::error::SessionError;

/// Consecutive unrecovered read failures before the device is declared lost.
const READ_FAILURE_LIMIT: u32 = 3;

/// One fixed-duration chunk of mono PCM16 microphone audio at the capture
/// rate. Produced by the capture thread, consumed exactly once by the
/// transport; never retained after hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

/// What the capture thread reports upstream.
#[derive(Debug)]
pub enum CaptureEvent {
    /// One full capture window.
    Frame(AudioFrame),
    /// The device failed past recovery; the session must tear down.
    Lost(String),
}

/// Owns the capture thread and the open input device.
///
/// `stop` is idempotent and also runs on drop, so the device handle cannot
/// outlive the session that opened it.
pub struct CaptureSource {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// Open the input device and start delivering `CaptureEvent::Frame`s of
    /// exactly `frame_size` samples on `tx`.
    ///
    /// Fails with `DeviceUnavailable` when the device cannot be opened at
    /// the requested rate.
    pub fn start(
        device: &dyn AudioDevice,
        sample_rate: u32,
        frame_size: usize,
        tx: mpsc::Sender<CaptureEvent>,
    ) -> Result<Self, SessionError> {
        let stream = device
            .open_capture(sample_rate, frame_size)
            .map_err(|e| SessionError::DeviceUnavailable(format!("{e:#}")))?;

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("capture".into())
                .spawn(move || capture_thread(stream, frame_size, tx, &running))
                .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?
        };

        log::info!(
            "Capture started: rate={}Hz, frame={} samples",
            sample_rate,
            frame_size,
        );

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Signal the thread to stop and wait for it to release the device.
    /// Safe to call repeatedly, or on a source that already stopped itself.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    mut stream: Box<dyn CaptureStream>,
    frame_size: usize,
    tx: mpsc::Sender<CaptureEvent>,
    running: &AtomicBool,
) {
    let mut read_buf = vec![0f32; frame_size];
    // Device reads may be shorter than one window; samples accumulate here
    // until a full frame exists. A trailing partial window at stop time is
    // discarded: a frame is either complete or never sent.
    let mut accum: Vec<i16> = Vec::with_capacity(frame_size * 2);
    let mut failures = 0u32;

    while running.load(Ordering::Relaxed) {
        match stream.read(&mut read_buf) {
            Ok(0) => continue, // transient fault recovered in-stream
            Ok(n) => {
                failures = 0;
                accum.extend(read_buf[..n].iter().map(|&s| quantize(s)));

                while accum.len() >= frame_size {
                    let frame = AudioFrame {
                        samples: accum.drain(..frame_size).collect(),
                    };
                    match tx.try_send(CaptureEvent::Frame(frame)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Consumer is lagging; dropping beats blocking a
                            // real-time thread.
                            log::warn!("Capture consumer lagging, dropping frame");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            log::info!("Capture receiver dropped, stopping capture thread");
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                log::warn!("Capture read failed ({}): {:#}", failures, e);
                if failures >= READ_FAILURE_LIMIT {
                    let _ = tx.try_send(CaptureEvent::Lost(format!("{e:#}")));
                    return;
                }
            }
        }
    }

    log::info!("Capture stopped");
}

/// Quantize one device float sample to signed 16-bit PCM.
///
/// Out-of-range input clamps, never wraps. Negative samples scale by 32768
/// and non-negative by 32767, so both endpoints of [-1.0, 1.0] map onto the
/// i16 range exactly.
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};

    #[test]
    fn quantize_is_symmetric_and_clamps() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(0.5), 16383);
        assert_eq!(quantize(-0.5), -16384);
        // Out of range clamps, no wrap-around.
        assert_eq!(quantize(1.5), 32767);
        assert_eq!(quantize(-1.5), -32768);
    }

    #[test]
    fn quantize_round_trip_error_is_bounded() {
        // Samples on the 1/32768 grid round-trip within one LSB.
        for k in [-32768i32, -12345, -1, 0, 1, 4096, 32767] {
            let s = k as f32 / 32768.0;
            let q = quantize(s);
            let back = q as f32 / 32768.0;
            assert!(
                (s - back).abs() <= 1.0 / 32768.0,
                "sample {s} decoded to {back}"
            );
        }
    }

    /// Scripted stream: plays back a fixed list of reads, then fails forever.
    struct ScriptedStream {
        reads: Vec<Vec<f32>>,
        next: usize,
    }

    impl CaptureStream for ScriptedStream {
        fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
            if self.next >= self.reads.len() {
                return Err(anyhow!("device unplugged"));
            }
            let chunk = &self.reads[self.next];
            self.next += 1;
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[test]
    fn frames_are_fixed_size_across_uneven_reads() {
        // 2.5 frames of data delivered in uneven reads of 3.
        let frame_size = 8;
        let reads = vec![vec![0.25f32; 5], vec![0.25f32; 8], vec![0.25f32; 7]];
        let stream = Box::new(ScriptedStream { reads, next: 0 });

        let (tx, mut rx) = mpsc::channel(16);
        let running = AtomicBool::new(true);
        capture_thread(stream, frame_size, tx, &running);

        let mut frames = 0;
        let mut lost = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                CaptureEvent::Frame(f) => {
                    assert_eq!(f.samples.len(), frame_size);
                    assert!(f.samples.iter().all(|&s| s == quantize(0.25)));
                    frames += 1;
                }
                CaptureEvent::Lost(_) => lost = true,
            }
        }
        // 20 samples in, 2 full frames out, the trailing 4 discarded; the
        // scripted failure then reports the device as lost.
        assert_eq!(frames, 2);
        assert!(lost);
    }

    #[test]
    fn persistent_read_failure_reports_device_lost() {
        let stream = Box::new(ScriptedStream {
            reads: vec![],
            next: 0,
        });
        let (tx, mut rx) = mpsc::channel(4);
        let running = AtomicBool::new(true);
        capture_thread(stream, 4, tx, &running);
        assert!(matches!(rx.try_recv(), Ok(CaptureEvent::Lost(_))));
        assert!(rx.try_recv().is_err(), "Lost must be reported exactly once");
    }
}
