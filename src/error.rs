use thiserror::Error;

/// Failure taxonomy for a live voice session.
///
/// Nothing here is retried automatically: fatal variants surface exactly once
/// through the session callbacks, and only a fresh session start recovers.
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// No usable audio device, or access to it was denied.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transport-level failure before or during the open session.
    /// A lost capture device mid-session is reported the same way.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Malformed or undecodable server message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A server audio payload that cannot be decoded to PCM samples.
    #[error("audio payload decode failed: {0}")]
    Decode(String),
}
