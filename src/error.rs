//! Error taxonomy for the voice pipeline.
//!
//! - [`DeviceError`]: audio device missing or unusable. Fatal to the start
//!   attempt that raised it, never retried.
//! - [`TransportError`]: connection failed or dropped. Terminates the session.
//! - [`ProtocolError`]: malformed incoming message. Reported, then skipped.
//! - [`ApplicationError`]: error event reported by the remote side.

/// Failures of the audio device layer.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device could not be opened (missing, busy, permission denied).
    #[error("audio device '{device}' unavailable: {reason}")]
    Unavailable { device: String, reason: String },

    /// The device opened but refused the requested PCM format.
    #[error("audio device '{device}' does not support {format}")]
    UnsupportedFormat { device: String, format: String },

    /// An I/O error on an already running device that could not be recovered.
    #[error("audio device I/O error: {0}")]
    Io(String),

    /// The engine thread could not be spawned or died during start-up.
    #[error("audio thread failed: {0}")]
    Thread(String),
}

/// Error returned by [`CaptureEngine::start`](crate::audio::CaptureEngine::start).
pub type CaptureError = DeviceError;

/// Failures of the session transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("connection dropped: {0}")]
    Dropped(String),

    /// `start()` was called on a session that is not idle.
    #[error("session cannot be started from state {0}")]
    NotReusable(crate::state_machine::SessionState),
}

/// A message from the remote endpoint that could not be interpreted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("undecodable audio payload: {0}")]
    BadAudio(String),
}

/// An `error` event reported by the remote endpoint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("remote error ({kind}): {message}")]
pub struct ApplicationError {
    pub kind: String,
    pub code: Option<String>,
    pub message: String,
}

/// Non-fatal errors surfaced through the session event channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Application(#[from] ApplicationError),
}

/// Why "begin listening" did not get as far as capturing.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
