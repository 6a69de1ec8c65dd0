//! Controllers that sit between the session core and the audio engines.
//!
//! Both own a [`GainGate`] that outlives any engine they start, so mute is
//! settable at any time and survives restarts and resets.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::{
    AudioFrame, CaptureEngine, FailureCallback, FlushSignal, GainGate, InputBackend,
    OutputBackend, PlaybackEngine, SAMPLE_RATE, WireChunk,
};
use crate::error::{CaptureError, DeviceError, ProtocolError};

/// Microphone side: capture engine + mute gate.
///
/// While muted, frames are suppressed before they reach the sink, so
/// nothing from a muted microphone is ever encoded or sent.
pub struct CaptureController {
    device: Arc<dyn InputBackend>,
    engine: CaptureEngine,
    gate: GainGate,
    suppressed: Arc<AtomicU64>,
}

impl CaptureController {
    pub fn new(device: Arc<dyn InputBackend>, frame_duration_ms: u32) -> Self {
        Self {
            device,
            engine: CaptureEngine::new(frame_duration_ms),
            gate: GainGate::default(),
            suppressed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start capturing into `sink`. A previous capture context, if any, is
    /// closed before the device is reopened.
    pub fn start<F>(&mut self, mut sink: F) -> Result<(), CaptureError>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        if self.engine.is_running() {
            log::warn!("Capture already running, restarting");
            self.engine.stop();
        }

        let gate = self.gate.clone();
        let suppressed = self.suppressed.clone();
        self.engine.start(
            self.device.clone(),
            Box::new(move |frame| {
                if gate.is_muted() {
                    suppressed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                sink(frame);
            }),
        )
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    /// Called from the capture thread if the microphone dies mid-run.
    pub fn on_failure(&mut self, callback: FailureCallback) {
        self.engine.on_failure(callback);
    }

    pub fn set_muted(&self, muted: bool) {
        self.gate.set_muted(muted);
        log::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
    }

    /// Returns the new muted state.
    pub fn toggle_mute(&self) -> bool {
        let muted = self.gate.toggle();
        log::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.gate.is_muted()
    }

    pub fn is_capturing(&self) -> bool {
        self.engine.is_running()
    }

    /// Frames swallowed by the mute gate since construction.
    pub fn suppressed_frames(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

/// Speaker side: playback engine + mute gate + flush epoch.
pub struct PlaybackController {
    device: Arc<dyn OutputBackend>,
    period_size: usize,
    gate: GainGate,
    flush: FlushSignal,
    engine: Option<PlaybackEngine>,
    on_failure: Option<FailureCallback>,
}

impl PlaybackController {
    pub fn new(device: Arc<dyn OutputBackend>, period_size: usize) -> Self {
        Self {
            device,
            period_size,
            gate: GainGate::default(),
            flush: FlushSignal::new(),
            engine: None,
            on_failure: None,
        }
    }

    /// Applies to every output context built by later [`reset`](Self::reset)s.
    pub fn on_failure(&mut self, callback: FailureCallback) {
        self.on_failure = Some(callback);
    }

    /// The flush epoch this controller's engines obey. Hand it to the
    /// session so a remote speech-start cuts playback off directly.
    pub fn flush_signal(&self) -> FlushSignal {
        self.flush.clone()
    }

    /// Tear down the output context and build a fresh one. Mute state carries
    /// over; queued audio does not.
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        if let Some(mut old) = self.engine.take() {
            old.shutdown();
        }
        let mut engine = PlaybackEngine::new(
            self.device.clone(),
            self.period_size,
            self.gate.clone(),
            self.flush.clone(),
        );
        if let Some(callback) = &self.on_failure {
            engine.on_failure(callback.clone());
        }
        engine.init(SAMPLE_RATE)?;
        self.engine = Some(engine);
        log::info!(
            "Playback reset (speaker {})",
            if self.gate.is_muted() { "muted" } else { "unmuted" }
        );
        Ok(())
    }

    /// Decode `chunk` and queue it for playback.
    pub fn play(&self, chunk: &WireChunk) -> Result<(), ProtocolError> {
        let frame = chunk.decode()?;
        if let Some(engine) = &self.engine {
            engine.enqueue(frame);
        }
        Ok(())
    }

    /// Like [`play`](Self::play) for a chunk received under flush epoch
    /// `epoch`; dropped if playback was flushed since.
    pub fn play_tagged(&self, chunk: &WireChunk, epoch: u64) -> Result<(), ProtocolError> {
        if self.flush.is_stale(epoch) {
            log::debug!("Dropping audio delta from interrupted epoch {}", epoch);
            return Ok(());
        }
        let frame = chunk.decode()?;
        if let Some(engine) = &self.engine {
            engine.enqueue_tagged(frame, epoch);
        }
        Ok(())
    }

    /// Flush everything queued and halt the frame being rendered. The output
    /// context stays allocated for new audio.
    pub fn stop(&self) {
        match &self.engine {
            Some(engine) => engine.flush(),
            None => {
                self.flush.trigger();
            }
        }
    }

    /// Barge-in: drop audio from before epoch `epoch` without invalidating
    /// audio that already arrived under it.
    pub fn flush_to(&self, epoch: u64) {
        match &self.engine {
            Some(engine) => engine.flush_to(epoch),
            None => {
                self.flush.advance_to(epoch);
            }
        }
    }

    /// Release the output device entirely.
    pub fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.gate.set_muted(muted);
        log::info!("Speaker {}", if muted { "muted" } else { "unmuted" });
    }

    /// Returns the new muted state.
    pub fn toggle_mute(&self) -> bool {
        let muted = self.gate.toggle();
        log::info!("Speaker {}", if muted { "muted" } else { "unmuted" });
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.gate.is_muted()
    }

    pub fn is_active(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_initialized())
    }

    pub fn queued_frames(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.queued_frames())
    }
}
