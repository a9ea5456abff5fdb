// Playback scheduling behavior: gapless rendering of bursty chunk arrivals
// and barge-in interruption, plus the render thread driving a mock device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use voicelink::audio::{AudioDevice, CaptureStream, Playback, PlaybackScheduler, PlaybackStream};
use voicelink::protocol::encode_pcm16;

const RATE: u64 = 24_000;
/// 100 ms of samples at the playback rate.
const CHUNK: u64 = RATE / 10;

fn chunk_payload(value: i16) -> Vec<u8> {
    encode_pcm16(&vec![value; CHUNK as usize])
}

#[test]
fn three_chunks_render_as_300ms_of_continuous_sound() {
    let mut scheduler = PlaybackScheduler::new();
    let mut rendered: Vec<f32> = Vec::new();
    let mut block = vec![0f32; 480];
    let mut head: u64 = 0;

    // Three 100 ms chunks arriving every ~83 ms (faster than real time),
    // interleaved with rendering.
    let mut starts = Vec::new();
    for arrival in [0u64, 2000, 4000] {
        while head < arrival {
            scheduler.render(head, &mut block);
            rendered.extend_from_slice(&block);
            head += block.len() as u64;
        }
        starts.push(scheduler.enqueue(&chunk_payload(1000), head).unwrap());
    }
    while head < 3 * CHUNK {
        scheduler.render(head, &mut block);
        rendered.extend_from_slice(&block);
        head += block.len() as u64;
    }

    // Back-to-back starts: each buffer begins exactly where the previous
    // one ends.
    assert_eq!(starts, vec![0, CHUNK, 2 * CHUNK]);

    // Exactly 300 ms of sound with no silence gap anywhere inside it.
    let expected = 1000f32 / 32768.0;
    assert_eq!(rendered.len() as u64, 3 * CHUNK);
    assert!(rendered.iter().all(|&s| s == expected));

    // And nothing scheduled past the end.
    scheduler.render(head, &mut block);
    assert!(block.iter().all(|&s| s == 0.0));
    assert!(scheduler.is_idle());
}

#[test]
fn interrupt_mid_chunk_drops_remainder_and_resets_cursor() {
    let mut scheduler = PlaybackScheduler::new();
    for arrival in [0u64, 2000, 4000] {
        scheduler.enqueue(&chunk_payload(1000), arrival).unwrap();
    }

    // Playback is mid-way through the third chunk when the user barges in.
    let now = 2 * CHUNK + 1200;
    assert!(scheduler.pending(now) > 0);
    scheduler.interrupt(now);

    // Remaining scheduled duration drops to zero and the cursor resets to
    // the simulated "now".
    assert_eq!(scheduler.pending(now), 0);
    let mut block = vec![0f32; 480];
    scheduler.render(now, &mut block);
    assert!(block.iter().all(|&s| s == 0.0));

    // The next turn's audio starts no earlier than the interrupt point.
    let start = scheduler.enqueue(&chunk_payload(500), now).unwrap();
    assert_eq!(start, now);
}

// ======================== render thread over a mock device ========================

#[derive(Default)]
struct MockDevice {
    written: Arc<Mutex<Vec<f32>>>,
    playback_opens: Arc<AtomicUsize>,
}

impl AudioDevice for MockDevice {
    fn open_capture(&self, _rate: u32, _period: usize) -> Result<Box<dyn CaptureStream>> {
        Err(anyhow!("no capture device in this test"))
    }

    fn open_playback(&self, _rate: u32, _period: usize) -> Result<Box<dyn PlaybackStream>> {
        self.playback_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPlaybackStream {
            written: self.written.clone(),
        }))
    }
}

struct MockPlaybackStream {
    written: Arc<Mutex<Vec<f32>>>,
}

impl PlaybackStream for MockPlaybackStream {
    fn write(&mut self, buf: &[f32]) -> Result<()> {
        self.written.lock().unwrap().extend_from_slice(buf);
        // Pace the render loop the way a real device would.
        std::thread::sleep(Duration::from_millis(1));
        Ok(())
    }
}

#[test]
fn render_thread_plays_an_enqueued_chunk_verbatim() {
    let device = MockDevice::default();
    let written = device.written.clone();

    let mut playback = Playback::start(&device, 24_000, 256).unwrap();

    let samples: Vec<i16> = (1..=512).collect();
    playback.enqueue(Bytes::from(encode_pcm16(&samples)));

    // Wait for the render thread to push the chunk through the device.
    let deadline = Instant::now() + Duration::from_secs(2);
    let heard = loop {
        {
            let w = written.lock().unwrap();
            if let Some(first) = w.iter().position(|&s| s != 0.0) {
                if w.len() >= first + samples.len() {
                    break w[first..first + samples.len()].to_vec();
                }
            }
        }
        assert!(Instant::now() < deadline, "chunk never rendered");
        std::thread::sleep(Duration::from_millis(5));
    };

    let expected: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    assert_eq!(heard, expected);

    // Idempotent shutdown.
    playback.stop();
    playback.stop();
    assert_eq!(device.playback_opens.load(Ordering::SeqCst), 1);
}
