//! voicelink - Real-time voice conversation streaming client.
//!
//! Captures microphone audio at 16 kHz, streams it over a persistent
//! websocket to a conversational-audio backend, and schedules the streamed
//! 24 kHz reply for gapless, interruptible playback. Single session per
//! process; the only surface an application needs is [`LiveSession`].

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AlsaDevice, AudioDevice, AudioFrame, CaptureEvent, CaptureSource, CaptureStream, Playback,
    PlaybackBuffer, PlaybackScheduler, PlaybackStream,
};
pub use config::Config;
pub use error::SessionError;
pub use session::{LiveSession, SessionCallbacks};
pub use transport::{SessionState, SessionTransport, TransportCommand, TransportEvent};
