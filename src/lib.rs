//! Client-side duplex realtime voice engine.
//!
//! Microphone frames go out over a WebSocket session as PCM16 chunks while
//! synthesized speech coming back is queued to the speaker. Remote voice
//! activity interrupts playback immediately.

pub mod audio;
pub mod audio_bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod gui_bridge;
pub mod net_link;
pub mod protocol;
pub mod state_machine;
pub mod status_poller;

pub use audio_bridge::{CaptureController, PlaybackController};
pub use config::{AudioConfig, Config, SessionConfig};
pub use controller::SessionController;
pub use net_link::{AudioSender, RealtimeSession, SessionEvent};
pub use state_machine::SessionState;
