//! Microphone capture on a dedicated OS thread.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::thread::{self, JoinHandle};

use super::device::{FailureCallback, InputBackend};
use super::frame::{AudioFrame, SAMPLE_RATE, samples_per_frame};
use crate::error::{CaptureError, DeviceError};

/// Receives every frame the engine produces, on the capture thread.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// Reads the input device at [`SAMPLE_RATE`] and emits fixed-size frames.
pub struct CaptureEngine {
    frame_samples: usize,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    on_failure: Option<FailureCallback>,
}

impl CaptureEngine {
    pub fn new(frame_duration_ms: u32) -> Self {
        Self {
            frame_samples: samples_per_frame(frame_duration_ms).max(1),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            on_failure: None,
        }
    }

    /// Report a device that fails after `start` succeeded. `is_running` is
    /// already false when `callback` runs.
    pub fn on_failure(&mut self, callback: FailureCallback) {
        self.on_failure = Some(callback);
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Open `device` and start delivering frames to `on_frame`.
    ///
    /// Returns once the device is open, or with the error that prevented it.
    /// After an error the engine is stopped and may be started again.
    pub fn start(
        &mut self,
        device: Arc<dyn InputBackend>,
        on_frame: FrameCallback,
    ) -> Result<(), CaptureError> {
        self.stop();

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = sync_channel(1);
        let frame_samples = self.frame_samples;

        let handle = {
            let running = running.clone();
            let on_failure = self.on_failure.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    let result =
                        capture_thread(device.as_ref(), frame_samples, on_frame, &running, ready_tx);
                    if let Err(e) = result {
                        // a failure racing stop() is not reported
                        if running.swap(false, Ordering::SeqCst) {
                            log::error!("Capture thread error: {}", e);
                            if let Some(report) = &on_failure {
                                report(e);
                            }
                        }
                    }
                })
                .map_err(|e| DeviceError::Thread(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = running;
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::Thread(
                    "capture thread exited during start-up".to_string(),
                ))
            }
        }
    }

    /// Stop capturing and release the device. No-op when not started.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            log::error!("Capture thread panicked");
        }
        log::info!("Capture engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    device: &dyn InputBackend,
    frame_samples: usize,
    mut on_frame: FrameCallback,
    running: &AtomicBool,
    ready: SyncSender<Result<(), DeviceError>>,
) -> Result<(), DeviceError> {
    let mut stream = match device.open(SAMPLE_RATE) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };
    let period = stream.period_size().max(1);
    let _ = ready.send(Ok(()));

    // At most one partial frame is held here
    let mut accum: Vec<i16> = Vec::with_capacity(frame_samples + period);
    let mut read_buf = vec![0i16; period];

    log::info!(
        "Recording started: device={}, rate={}, period={}, frame_samples={}",
        device.name(),
        SAMPLE_RATE,
        period,
        frame_samples,
    );

    while running.load(Ordering::Relaxed) {
        let n = stream.read(&mut read_buf)?;
        accum.extend_from_slice(&read_buf[..n]);

        while accum.len() >= frame_samples {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let rest = accum.split_off(frame_samples);
            let frame = AudioFrame::new(std::mem::replace(&mut accum, rest));
            on_frame(frame);
        }
    }

    log::info!("Recording stopped");
    Ok(())
}
