//! audio - PCM16 capture and playback engines
//!
//! Each direction runs on its own OS thread and talks to the rest of the
//! system only through frame callbacks, the playback queue, and the
//! [`GainGate`] / [`FlushSignal`] handles.

pub mod alsa_device;
mod capture;
pub mod device;
mod frame;
mod gain;
pub mod mock;
mod playback;

pub use alsa_device::{AlsaInput, AlsaOutput};
pub use capture::{CaptureEngine, FrameCallback};
pub use device::{FailureCallback, InputBackend, InputStream, OutputBackend, OutputStream};
pub use frame::{AudioFrame, SAMPLE_RATE, WireChunk, samples_per_frame};
pub use gain::{FlushSignal, GainGate};
pub use playback::PlaybackEngine;
