//! Wire protocol for the conversational-audio endpoint.
//!
//! The session speaks JSON envelopes over a persistent websocket. Binary
//! audio travels base64-encoded inside the envelopes: PCM16 at 16 kHz going
//! up, PCM16 at 24 kHz coming down. Client messages serialize only, server
//! messages deserialize only.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;
use crate::error::SessionError;

/// Mime tag attached to every outgoing capture frame.
pub const AUDIO_INPUT_MIME: &str = "audio/pcm";

/// Incoming parts are accepted when their mime starts with this prefix
/// (the server tags them `audio/pcm;rate=24000`).
pub const AUDIO_OUTPUT_MIME_PREFIX: &str = "audio/pcm";

// ======================== Client → Server ========================

/// Handshake message, sent exactly once immediately after connection open.
#[derive(Serialize)]
pub struct SetupMessage<'a> {
    pub setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup<'a> {
    pub model: &'a str,
    pub generation_config: GenerationConfig,
    pub speech_config: SpeechConfig<'a>,
    pub system_instruction: SystemInstruction<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: [&'static str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig<'a> {
    pub voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig<'a> {
    pub prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig<'a> {
    pub voice_name: &'a str,
}

#[derive(Serialize)]
pub struct SystemInstruction<'a> {
    pub parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
pub struct TextPart<'a> {
    pub text: &'a str,
}

/// One captured audio frame on its way to the server.
///
/// Note the envelope key style: the realtime input path uses snake_case
/// while the setup path uses camelCase. Both are fixed by the endpoint.
#[derive(Serialize)]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize)]
pub struct RealtimeInput {
    pub media_chunks: [MediaChunk; 1],
}

#[derive(Serialize)]
pub struct MediaChunk {
    pub mime_type: &'static str,
    pub data: String,
}

/// Build the session setup message for the configured model and voice.
pub fn setup_message<'a>(model: &'a str, voice: &'a str, system_prompt: &'a str) -> SetupMessage<'a> {
    SetupMessage {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
            },
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                },
            },
            system_instruction: SystemInstruction {
                parts: [TextPart {
                    text: system_prompt,
                }],
            },
        },
    }
}

/// Wrap one capture frame into a realtime input envelope.
/// Exactly one frame per message.
pub fn realtime_input(frame: &AudioFrame) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: AUDIO_INPUT_MIME,
                data: BASE64.encode(encode_pcm16(&frame.samples)),
            }],
        },
    }
}

/// Serialize i16 samples to little-endian PCM16 wire bytes.
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

// ======================== Server → Client ========================

#[derive(Debug, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "serverContent")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One incoming server message, reduced to the events it implies,
/// in the order they must be handled.
#[derive(Debug, PartialEq)]
pub enum ServerEvent {
    /// The user barged in; everything scheduled for playback is stale.
    Interrupted,
    /// One decoded (but still PCM16-encoded) audio payload.
    AudioChunk(Bytes),
    /// End of the current server turn. Advisory.
    TurnComplete,
}

/// Parse a raw server message into its ordered events.
///
/// An `interrupted` flag is emitted before any audio chunk carried by the
/// same message, so a listener can flush stale playback before audio for
/// the new turn arrives. Messages that carry none of the recognized fields
/// (acks and the like) produce an empty event list; malformed JSON or an
/// undecodable payload is a protocol error and drops the whole message.
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>, SessionError> {
    let msg: ServerMessage = serde_json::from_str(text)
        .map_err(|e| SessionError::Protocol(format!("unparseable server message: {e}")))?;

    let mut events = Vec::new();
    let Some(content) = msg.server_content else {
        return Ok(events);
    };

    if content.interrupted == Some(true) {
        events.push(ServerEvent::Interrupted);
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            if !inline.mime_type.starts_with(AUDIO_OUTPUT_MIME_PREFIX) {
                log::debug!("Skipping non-audio part: {}", inline.mime_type);
                continue;
            }
            let payload = BASE64
                .decode(inline.data.as_bytes())
                .map_err(|e| SessionError::Protocol(format!("bad base64 audio payload: {e}")))?;
            events.push(ServerEvent::AudioChunk(Bytes::from(payload)));
        }
    }

    if content.turn_complete == Some(true) {
        events.push(ServerEvent::TurnComplete);
    }

    Ok(events)
}
