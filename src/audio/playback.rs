//! Gapless playback scheduling with barge-in interruption.
//!
//! Incoming PCM16 payloads decode into float buffers that are scheduled
//! sample-accurately against the render clock: each buffer starts where the
//! previous one ends (no audible gap) unless arrivals lag behind playback,
//! in which case the cursor snaps forward to "now" instead of stacking a
//! backlog. An interrupt discards everything scheduled and resets the
//! cursor, which is how a detected user utterance cuts off an in-progress
//! reply.
//!
//! All scheduler state is owned by one render thread; other components talk
//! to it exclusively through a command channel, so the single-writer rule
//! for the cursor holds by construction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::device::{AudioDevice, PlaybackStream};
use crate::error::SessionError;

/// Commands accepted by the render thread. One FIFO channel carries both,
/// so an interrupt takes effect exactly between the chunks it arrived
/// between on the wire.
#[derive(Debug)]
pub enum PlaybackCommand {
    /// Schedule one PCM16 payload for gapless playback.
    Enqueue(Bytes),
    /// Discard everything scheduled and reset the cursor to now.
    Interrupt,
}

/// A decoded, ready-to-render block of mono float samples at the playback
/// rate. Lives from decode until its scheduled window has fully rendered.
#[derive(Debug)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
}

impl PlaybackBuffer {
    /// Decode a little-endian PCM16 payload.
    ///
    /// Division by 32768 mirrors the capture-side quantization, so a
    /// round-tripped integer pattern is lossy only at the LSB, never by a
    /// scale-factor mismatch. An odd byte count cannot be PCM16 and is
    /// rejected; the caller drops that chunk only.
    pub fn decode(payload: &[u8]) -> Result<Self, SessionError> {
        if payload.len() % 2 != 0 {
            return Err(SessionError::Decode(format!(
                "odd PCM16 payload length {}",
                payload.len()
            )));
        }
        let samples = payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

struct Scheduled {
    start: u64,
    samples: Vec<f32>,
}

impl Scheduled {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sample-accurate scheduler. All positions are sample counts on the render
/// clock (samples written to the device since the thread started).
///
/// The cursor — the next free start position — is monotonically
/// non-decreasing between interrupts and is only ever written here.
pub struct PlaybackScheduler {
    cursor: u64,
    scheduled: VecDeque<Scheduled>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self {
            cursor: 0,
            scheduled: VecDeque::new(),
        }
    }

    /// Decode `payload` and schedule it back-to-back with whatever is
    /// already queued, never earlier than `now`. Returns the start position.
    pub fn enqueue(&mut self, payload: &[u8], now: u64) -> Result<u64, SessionError> {
        let buffer = PlaybackBuffer::decode(payload)?;
        Ok(self.schedule(buffer, now))
    }

    /// Schedule an already-decoded buffer. See [`enqueue`](Self::enqueue).
    pub fn schedule(&mut self, buffer: PlaybackBuffer, now: u64) -> u64 {
        let start = self.cursor.max(now);
        self.cursor = start + buffer.samples.len() as u64;
        self.scheduled.push_back(Scheduled {
            start,
            samples: buffer.samples,
        });
        start
    }

    /// Halt and discard every scheduled buffer and reset the cursor to
    /// `now`. No-op (beyond the cursor reset) when nothing is scheduled.
    pub fn interrupt(&mut self, now: u64) {
        if !self.scheduled.is_empty() {
            log::info!(
                "Playback interrupted, discarding {} scheduled buffers",
                self.scheduled.len()
            );
        }
        self.scheduled.clear();
        self.cursor = now;
    }

    /// Samples still scheduled at or after `now`.
    pub fn pending(&self, now: u64) -> u64 {
        if self.scheduled.is_empty() {
            0
        } else {
            self.cursor.saturating_sub(now)
        }
    }

    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Fill `out` with the samples scheduled for the window starting at
    /// `head`, silence elsewhere. Buffers whose window has fully elapsed
    /// are released.
    ///
    /// Scheduled buffers never overlap (the cursor guarantees it), so this
    /// copies rather than mixes.
    pub fn render(&mut self, head: u64, out: &mut [f32]) {
        out.fill(0.0);
        let end = head + out.len() as u64;

        self.scheduled.retain(|b| b.end() > head);

        for b in &self.scheduled {
            if b.start >= end {
                // The deque is ordered by start; nothing later overlaps.
                break;
            }
            let from = b.start.max(head);
            let to = b.end().min(end);
            let src = (from - b.start) as usize;
            let dst = (from - head) as usize;
            let len = (to - from) as usize;
            out[dst..dst + len].copy_from_slice(&b.samples[src..src + len]);
        }
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the render thread and the open output device.
///
/// `enqueue` and `interrupt` are non-blocking; any downstream failure is
/// logged from the render thread, never raised to the caller.
pub struct Playback {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Playback {
    /// Open the output device and start the render thread.
    pub fn start(
        device: &dyn AudioDevice,
        sample_rate: u32,
        period_size: usize,
    ) -> Result<Self, SessionError> {
        let stream = device
            .open_playback(sample_rate, period_size)
            .map_err(|e| SessionError::DeviceUnavailable(format!("{e:#}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("playback".into())
                .spawn(move || render_thread(stream, period_size, rx, &running))
                .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?
        };

        log::info!(
            "Playback started: rate={}Hz, period={} samples",
            sample_rate,
            period_size,
        );

        Ok(Self {
            tx,
            running,
            handle: Some(handle),
        })
    }

    /// Queue one PCM16 chunk for gapless playback.
    pub fn enqueue(&self, payload: Bytes) {
        if self.tx.send(PlaybackCommand::Enqueue(payload)).is_err() {
            log::warn!("Playback thread gone, dropping audio chunk");
        }
    }

    /// Cut off everything scheduled or playing.
    pub fn interrupt(&self) {
        if self.tx.send(PlaybackCommand::Interrupt).is_err() {
            log::warn!("Playback thread gone, interrupt ignored");
        }
    }

    /// Signal the thread to stop and wait for it to release the device.
    /// Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_thread(
    mut stream: Box<dyn PlaybackStream>,
    period_size: usize,
    mut rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    running: &AtomicBool,
) {
    let mut scheduler = PlaybackScheduler::new();
    let mut block = vec![0f32; period_size];
    // Render head: the clock position of the next sample to be written.
    // Writing silence while idle keeps it advancing, so `max(cursor, now)`
    // stays meaningful across arrival gaps.
    let mut head: u64 = 0;

    while running.load(Ordering::Relaxed) {
        loop {
            match rx.try_recv() {
                Ok(PlaybackCommand::Enqueue(payload)) => {
                    match scheduler.enqueue(&payload, head) {
                        Ok(start) => log::debug!(
                            "Scheduled {}-byte chunk at sample {}",
                            payload.len(),
                            start
                        ),
                        Err(e) => log::warn!("Dropping undecodable audio chunk: {}", e),
                    }
                }
                Ok(PlaybackCommand::Interrupt) => scheduler.interrupt(head),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("Playback channel closed");
                    return;
                }
            }
        }

        scheduler.render(head, &mut block);
        if let Err(e) = stream.write(&block) {
            log::error!("Playback write failed: {:#}", e);
            return;
        }
        head += period_size as u64;
    }

    log::info!("Playback stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_pcm16;

    fn payload(samples: &[i16]) -> Vec<u8> {
        encode_pcm16(samples)
    }

    #[test]
    fn decode_divides_by_32768() {
        let buf = PlaybackBuffer::decode(&payload(&[-32768, 32767, 0, 16384])).unwrap();
        assert_eq!(buf.samples, vec![-1.0, 32767.0 / 32768.0, 0.0, 0.5]);
    }

    #[test]
    fn decode_rejects_odd_payload() {
        let err = PlaybackBuffer::decode(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
    }

    #[test]
    fn bursty_arrivals_schedule_back_to_back() {
        let mut s = PlaybackScheduler::new();
        // Three chunks of 2400 samples arriving faster than real time.
        let p = payload(&vec![100i16; 2400]);
        let start_a = s.enqueue(&p, 0).unwrap();
        let start_b = s.enqueue(&p, 500).unwrap();
        let start_c = s.enqueue(&p, 900).unwrap();

        assert_eq!(start_a, 0);
        assert_eq!(start_b, start_a + 2400);
        assert_eq!(start_c, start_b + 2400);
        assert_eq!(s.pending(0), 7200);
    }

    #[test]
    fn lagging_arrival_resets_to_now_instead_of_backlog() {
        let mut s = PlaybackScheduler::new();
        let p = payload(&vec![1i16; 100]);
        s.enqueue(&p, 0).unwrap();
        // Playback has moved past the first buffer's end; the next chunk
        // starts at "now", accepting a brief silence over growing a backlog.
        let start = s.enqueue(&p, 250).unwrap();
        assert_eq!(start, 250);
        assert_eq!(s.pending(250), 100);
    }

    #[test]
    fn interrupt_discards_everything_and_resets_cursor() {
        let mut s = PlaybackScheduler::new();
        let p = payload(&vec![5i16; 1000]);
        s.enqueue(&p, 0).unwrap();
        s.enqueue(&p, 0).unwrap();

        s.interrupt(300);
        assert_eq!(s.pending(300), 0);
        assert!(s.is_idle());

        // Nothing from before the interrupt is audible afterwards.
        let mut block = vec![1.0f32; 256];
        s.render(300, &mut block);
        assert!(block.iter().all(|&x| x == 0.0));

        // A chunk for the new turn starts no earlier than the interrupt
        // point.
        let start = s.enqueue(&p, 300).unwrap();
        assert_eq!(start, 300);
    }

    #[test]
    fn interrupt_on_idle_scheduler_is_a_noop() {
        let mut s = PlaybackScheduler::new();
        s.interrupt(42);
        assert_eq!(s.pending(42), 0);
        assert_eq!(s.enqueue(&payload(&[1]), 42).unwrap(), 42);
    }

    #[test]
    fn render_aligns_buffers_to_their_start() {
        let mut s = PlaybackScheduler::new();
        // 4 samples scheduled at position 6 within an 8-sample block world.
        let buffer = PlaybackBuffer::decode(&payload(&[16384, 16384, 16384, 16384])).unwrap();
        s.schedule(buffer, 6);

        let mut block = vec![0f32; 8];
        s.render(0, &mut block);
        assert_eq!(&block[..6], &[0.0; 6]);
        assert_eq!(&block[6..], &[0.5, 0.5]);

        // Second block picks up exactly where the first stopped.
        s.render(8, &mut block);
        assert_eq!(&block[..2], &[0.5, 0.5]);
        assert_eq!(&block[2..], &[0.0; 6]);

        // Fully elapsed buffers are released.
        s.render(16, &mut block);
        assert!(s.is_idle());
    }

    #[test]
    fn render_zero_fills_between_lagged_chunks() {
        let mut s = PlaybackScheduler::new();
        s.enqueue(&payload(&[8192, 8192]), 0).unwrap();
        // Arrival lags: next chunk lands at 6 after a 4-sample gap.
        s.enqueue(&payload(&[8192, 8192]), 6).unwrap();

        let mut block = vec![0f32; 8];
        s.render(0, &mut block);
        assert_eq!(block, vec![0.25, 0.25, 0.0, 0.0, 0.0, 0.0, 0.25, 0.25]);
    }
}
