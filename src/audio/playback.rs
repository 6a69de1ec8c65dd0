//! Speaker playback on a dedicated OS thread.
//!
//! Frames are rendered strictly in enqueue order, one at a time, in
//! period-sized slices. Between slices the thread checks the shared
//! [`FlushSignal`]: once the epoch a frame was queued under is gone, the rest
//! of that frame is abandoned and the device buffer is discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::device::{FailureCallback, OutputBackend, OutputStream};
use super::frame::AudioFrame;
use super::gain::{FlushSignal, GainGate};
use crate::error::DeviceError;

/// Longest time the idle render thread goes without looking at the flush epoch.
const IDLE_WAIT: Duration = Duration::from_millis(10);

struct Queued {
    frame: AudioFrame,
    epoch: u64,
}

struct Shared {
    queue: Mutex<VecDeque<Queued>>,
    wake: Condvar,
    running: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Owns the output device and the queue of frames waiting to be heard.
pub struct PlaybackEngine {
    device: Arc<dyn OutputBackend>,
    period_size: usize,
    gate: GainGate,
    flush: FlushSignal,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    on_failure: Option<FailureCallback>,
}

impl PlaybackEngine {
    /// `gate` and `flush` are shared with the owner; the engine only reads
    /// the gate and both reads and advances the flush epoch.
    pub fn new(
        device: Arc<dyn OutputBackend>,
        period_size: usize,
        gate: GainGate,
        flush: FlushSignal,
    ) -> Self {
        Self {
            device,
            period_size,
            gate,
            flush,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                wake: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            handle: None,
            on_failure: None,
        }
    }

    /// Report a device that fails after `init` succeeded. The engine is no
    /// longer initialised by the time `callback` runs.
    pub fn on_failure(&mut self, callback: FailureCallback) {
        self.on_failure = Some(callback);
    }

    /// Allocate the output context at `sample_rate`.
    ///
    /// Calling this on an initialised engine tears the old context down
    /// first; nothing queued before survives.
    pub fn init(&mut self, sample_rate: u32) -> Result<(), DeviceError> {
        self.shutdown();

        self.shared.running.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = sync_channel(1);

        let handle = {
            let device = self.device.clone();
            let shared = self.shared.clone();
            let gate = self.gate.clone();
            let flush = self.flush.clone();
            let period_size = self.period_size;
            let on_failure = self.on_failure.clone();
            thread::Builder::new()
                .name("audio-playback".into())
                .spawn(move || {
                    let ctx = RenderContext {
                        shared: &shared,
                        gate: &gate,
                        flush: &flush,
                    };
                    let result =
                        playback_thread(device.as_ref(), sample_rate, period_size, ctx, ready_tx);
                    let was_running = shared.running.swap(false, Ordering::SeqCst);
                    if let Err(e) = result {
                        log::error!("Playback thread error: {}", e);
                        // a failure racing shutdown() is not reported
                        if was_running {
                            if let Some(report) = &on_failure {
                                report(e);
                            }
                        }
                    }
                })
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    DeviceError::Thread(e.to_string())
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.shared.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.shared.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(DeviceError::Thread(
                    "playback thread exited during start-up".to_string(),
                ))
            }
        }
    }

    /// Queue `frame` behind everything already pending.
    pub fn enqueue(&self, frame: AudioFrame) {
        let mut queue = self.shared.queue();
        let epoch = self.flush.current();
        self.push(&mut queue, frame, epoch);
    }

    /// Queue `frame` that was accepted under flush epoch `epoch`. Frames from
    /// an epoch that has since been flushed are dropped.
    pub fn enqueue_tagged(&self, frame: AudioFrame, epoch: u64) {
        let mut queue = self.shared.queue();
        if self.flush.is_stale(epoch) {
            log::trace!("Dropping frame from flushed epoch {}", epoch);
            return;
        }
        self.push(&mut queue, frame, epoch);
    }

    fn push(&self, queue: &mut VecDeque<Queued>, frame: AudioFrame, epoch: u64) {
        if !self.is_initialized() {
            log::trace!("No output context, dropping {} samples", frame.len());
            return;
        }
        queue.push_back(Queued { frame, epoch });
        self.shared.wake.notify_one();
    }

    /// Discard everything pending and cut off the frame being rendered.
    ///
    /// Any frame enqueued before this returns is either discarded here or was
    /// enqueued after the flush took effect.
    pub fn flush(&self) {
        let mut queue = self.shared.queue();
        let epoch = self.flush.trigger();
        let dropped = queue.len();
        queue.clear();
        self.shared.wake.notify_all();
        log::debug!("Playback flushed: epoch={}, dropped={}", epoch, dropped);
    }

    /// Flush everything queued before epoch `epoch` and raise the shared
    /// epoch to it, but never past it: audio already accepted under `epoch`
    /// keeps its place.
    pub fn flush_to(&self, epoch: u64) {
        let mut queue = self.shared.queue();
        self.flush.advance_to(epoch);
        let before = queue.len();
        queue.retain(|q| q.epoch >= epoch);
        self.shared.wake.notify_all();
        log::debug!(
            "Playback flushed to epoch {}: dropped={}",
            epoch,
            before - queue.len()
        );
    }

    /// Flush and release the output device. No-op when not initialised.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let mut queue = self.shared.queue();
            self.shared.running.store(false, Ordering::SeqCst);
            queue.clear();
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            log::error!("Playback thread panicked");
        }
        log::info!("Playback engine shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some() && self.shared.running.load(Ordering::SeqCst)
    }

    pub fn queued_frames(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn queued_duration(&self) -> Duration {
        self.shared.queue().iter().map(|q| q.frame.duration()).sum()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct RenderContext<'a> {
    shared: &'a Shared,
    gate: &'a GainGate,
    flush: &'a FlushSignal,
}

enum Next {
    Frame(Queued),
    Flushed,
    Shutdown,
}

enum Rendered {
    Complete,
    Interrupted,
}

fn playback_thread(
    device: &dyn OutputBackend,
    sample_rate: u32,
    period_size: usize,
    ctx: RenderContext<'_>,
    ready: SyncSender<Result<(), DeviceError>>,
) -> Result<(), DeviceError> {
    let mut stream = match device.open(sample_rate, period_size) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };
    let period = stream.period_size().max(1);
    let _ = ready.send(Ok(()));

    log::info!(
        "Playback started: device={}, rate={}, period={}",
        device.name(),
        sample_rate,
        period,
    );

    let mut seen_epoch = ctx.flush.current();
    let mut scratch: Vec<i16> = Vec::with_capacity(period);

    loop {
        match next_frame(&ctx, &mut seen_epoch) {
            Next::Shutdown => break,
            Next::Flushed => stream.discard()?,
            Next::Frame(item) => {
                if let Rendered::Interrupted =
                    render_frame(stream.as_mut(), &item, period, &mut scratch, &ctx)?
                {
                    stream.discard()?;
                    seen_epoch = ctx.flush.current();
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

fn next_frame(ctx: &RenderContext<'_>, seen_epoch: &mut u64) -> Next {
    let mut queue = ctx.shared.queue();
    loop {
        if !ctx.shared.running.load(Ordering::SeqCst) {
            return Next::Shutdown;
        }
        let current = ctx.flush.current();
        if current != *seen_epoch {
            *seen_epoch = current;
            queue.retain(|q| q.epoch >= current);
            return Next::Flushed;
        }
        match queue.pop_front() {
            Some(item) if item.epoch >= current => return Next::Frame(item),
            Some(_) => continue,
            None => {}
        }
        queue = match ctx.shared.wake.wait_timeout(queue, IDLE_WAIT) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
}

fn render_frame(
    stream: &mut dyn OutputStream,
    item: &Queued,
    period: usize,
    scratch: &mut Vec<i16>,
    ctx: &RenderContext<'_>,
) -> Result<Rendered, DeviceError> {
    for slice in item.frame.samples().chunks(period) {
        if !ctx.shared.running.load(Ordering::SeqCst) || ctx.flush.is_stale(item.epoch) {
            return Ok(Rendered::Interrupted);
        }
        scratch.clear();
        scratch.extend_from_slice(slice);
        ctx.gate.apply(scratch);

        let mut written = 0;
        while written < scratch.len() {
            let n = stream.write(&scratch[written..])?;
            if n == 0 {
                break;
            }
            written += n;
        }
    }
    Ok(Rendered::Complete)
}
