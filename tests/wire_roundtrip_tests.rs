// End-to-end framing fidelity: a captured float buffer, quantized and
// wrapped into its wire envelope, decodes back within one quantization step
// per sample.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use voicelink::audio::quantize;
use voicelink::protocol::realtime_input;
use voicelink::{AudioFrame, PlaybackBuffer};

#[test]
fn captured_buffer_round_trips_within_one_quantization_step() {
    // Sweep the full amplitude range, endpoints included.
    let mut input: Vec<f32> = (-32i32..=31)
        .map(|k| (k * 1024) as f32 / 32768.0)
        .collect();
    input.push(32767.0 / 32768.0);
    input.push(1.0);
    input.push(-1.0);

    let frame = AudioFrame {
        samples: input.iter().map(|&s| quantize(s)).collect(),
    };

    // Exactly one wire message per frame.
    let message = serde_json::to_value(realtime_input(&frame)).unwrap();
    let chunks = message["realtime_input"]["media_chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["mime_type"], "audio/pcm");

    // Decode the payload the way the playback side decodes server audio.
    let payload = BASE64.decode(chunks[0]["data"].as_str().unwrap()).unwrap();
    let decoded = PlaybackBuffer::decode(&payload).unwrap();

    assert_eq!(decoded.samples.len(), input.len());
    for (&original, &back) in input.iter().zip(decoded.samples.iter()) {
        assert!(
            (original - back).abs() <= 1.0 / 32768.0,
            "sample {original} round-tripped to {back}"
        );
    }
}

#[test]
fn out_of_range_capture_input_clamps() {
    let frame = AudioFrame {
        samples: [2.0f32, -2.0, f32::INFINITY, f32::NEG_INFINITY]
            .iter()
            .map(|&s| quantize(s))
            .collect(),
    };
    assert_eq!(frame.samples, vec![32767, -32768, 32767, -32768]);
}
