//! Cross-thread gates between the control domain and the audio threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A 0/1 gain multiplier applied per frame on one audio direction.
///
/// The controller owns the gate and hands clones to its engine thread, so
/// muting takes effect on the next frame whether or not the engine runs.
#[derive(Debug, Clone, Default)]
pub struct GainGate {
    muted: Arc<AtomicBool>,
}

impl GainGate {
    pub fn new(muted: bool) -> Self {
        Self {
            muted: Arc::new(AtomicBool::new(muted)),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Flip the gate and return the new muted state.
    pub fn toggle(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn gain(&self) -> i16 {
        if self.is_muted() { 0 } else { 1 }
    }

    /// Scale `samples` in place by the current gain.
    pub fn apply(&self, samples: &mut [i16]) {
        if self.is_muted() {
            samples.fill(0);
        }
    }
}

/// Monotonic flush epoch shared by the playback thread and whoever may
/// need to cut playback off (the controller, the session receive loop).
///
/// Every trigger advances the epoch. Audio tagged with an older epoch is
/// stale and must not reach the speaker.
#[derive(Debug, Clone, Default)]
pub struct FlushSignal {
    epoch: Arc<AtomicU64>,
}

impl FlushSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Advance the epoch and return the new value.
    pub fn trigger(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raise the epoch to at least `epoch` without going past it. Returns
    /// whether it moved.
    pub fn advance_to(&self, epoch: u64) -> bool {
        self.epoch.fetch_max(epoch, Ordering::SeqCst) < epoch
    }

    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch < self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_twice_restores_gain() {
        let gate = GainGate::new(false);
        assert_eq!(gate.gain(), 1);
        assert!(gate.toggle());
        assert_eq!(gate.gain(), 0);
        assert!(!gate.toggle());
        assert_eq!(gate.gain(), 1);
    }

    #[test]
    fn muted_gate_zeroes_samples() {
        let gate = GainGate::new(true);
        let mut samples = [100, -200, 300];
        gate.apply(&mut samples);
        assert_eq!(samples, [0, 0, 0]);

        gate.set_muted(false);
        let mut samples = [100, -200, 300];
        gate.apply(&mut samples);
        assert_eq!(samples, [100, -200, 300]);
    }

    #[test]
    fn clones_share_state() {
        let gate = GainGate::default();
        let other = gate.clone();
        other.set_muted(true);
        assert!(gate.is_muted());
    }

    #[test]
    fn flush_epoch_marks_older_audio_stale() {
        let signal = FlushSignal::new();
        let before = signal.current();
        assert!(!signal.is_stale(before));
        assert_eq!(signal.trigger(), before + 1);
        assert!(signal.is_stale(before));
        assert!(!signal.is_stale(signal.current()));
    }

    #[test]
    fn advance_to_never_moves_backwards_or_past() {
        let flush = FlushSignal::new();
        assert_eq!(flush.trigger(), 1);
        assert!(!flush.advance_to(1));
        assert_eq!(flush.current(), 1);
        assert!(flush.advance_to(3));
        assert_eq!(flush.current(), 3);
        assert!(!flush.advance_to(2));
        assert_eq!(flush.current(), 3);
        assert!(!flush.is_stale(3));
    }
}
