//! Hardware-free audio backends.
//!
//! Used by the test suite and by `--dry-run`: [`MockInput`] plays back
//! samples pushed into it at a simulated device pace, and [`MockOutput`]
//! records everything it is asked to render.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::device::{InputBackend, InputStream, OutputBackend, OutputStream};
use crate::error::DeviceError;

const DEFAULT_PERIOD: usize = 240;
const DEFAULT_PACE: Duration = Duration::from_millis(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Open/close bookkeeping shared by a mock backend and its streams.
#[derive(Debug, Default)]
pub struct DeviceStats {
    opened: AtomicUsize,
    active: AtomicUsize,
}

impl DeviceStats {
    /// Number of successful `open` calls so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of handles currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn acquire(self: &Arc<Self>) -> StatsGuard {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        StatsGuard(self.clone())
    }
}

struct StatsGuard(Arc<DeviceStats>);

impl Drop for StatsGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Unavailable,
    UnsupportedFormat,
}

impl Failure {
    fn to_error(&self, name: &str) -> DeviceError {
        match self {
            Failure::Unavailable => DeviceError::Unavailable {
                device: name.to_string(),
                reason: "mock device unplugged".to_string(),
            },
            Failure::UnsupportedFormat => DeviceError::UnsupportedFormat {
                device: name.to_string(),
                format: "mono PCM16".to_string(),
            },
        }
    }
}

/// Count down one I/O call; fail once the budget is spent.
fn unplug(remaining: &mut Option<usize>) -> Result<(), DeviceError> {
    match remaining {
        Some(0) => Err(DeviceError::Io("mock device unplugged".to_string())),
        Some(n) => {
            *n -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

/// Scripted microphone.
#[derive(Debug, Clone)]
pub struct MockInput {
    name: String,
    pending: Arc<Mutex<VecDeque<i16>>>,
    period: usize,
    pace: Duration,
    failure: Option<Failure>,
    fail_after: Option<usize>,
    stats: Arc<DeviceStats>,
}

impl MockInput {
    pub fn new() -> Self {
        Self {
            name: "mock-input".to_string(),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            period: DEFAULT_PERIOD,
            pace: DEFAULT_PACE,
            failure: None,
            fail_after: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    /// A device whose `open` always fails as unplugged.
    pub fn unavailable() -> Self {
        Self {
            failure: Some(Failure::Unavailable),
            ..Self::new()
        }
    }

    /// A device whose `open` always rejects the format.
    pub fn unsupported_format() -> Self {
        Self {
            failure: Some(Failure::UnsupportedFormat),
            ..Self::new()
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period.max(1);
        self
    }

    /// Delay applied to every read, standing in for device pacing.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Opens fine, then every read after the first `reads` fails as if the
    /// device was unplugged.
    pub fn fail_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    /// Make `samples` available to the next reads.
    pub fn push_samples(&self, samples: &[i16]) {
        lock(&self.pending).extend(samples.iter().copied());
    }

    /// Samples pushed but not yet read.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        self.stats.clone()
    }
}

impl Default for MockInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBackend for MockInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, _sample_rate: u32) -> Result<Box<dyn InputStream>, DeviceError> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error(&self.name));
        }
        Ok(Box::new(MockInputStream {
            pending: self.pending.clone(),
            period: self.period,
            pace: self.pace,
            remaining: self.fail_after,
            _guard: self.stats.acquire(),
        }))
    }
}

struct MockInputStream {
    pending: Arc<Mutex<VecDeque<i16>>>,
    period: usize,
    pace: Duration,
    remaining: Option<usize>,
    _guard: StatsGuard,
}

impl InputStream for MockInputStream {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, DeviceError> {
        thread::sleep(self.pace);
        unplug(&mut self.remaining)?;
        let mut pending = lock(&self.pending);
        let n = buf.len().min(self.period).min(pending.len());
        for (slot, sample) in buf.iter_mut().zip(pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }

    fn period_size(&self) -> usize {
        self.period
    }
}

/// Recording speaker.
#[derive(Debug, Clone)]
pub struct MockOutput {
    name: String,
    rendered: Arc<Mutex<Vec<i16>>>,
    discards: Arc<AtomicUsize>,
    period: usize,
    pace: Duration,
    failure: Option<Failure>,
    fail_after: Option<usize>,
    stats: Arc<DeviceStats>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self {
            name: "mock-output".to_string(),
            rendered: Arc::new(Mutex::new(Vec::new())),
            discards: Arc::new(AtomicUsize::new(0)),
            period: DEFAULT_PERIOD,
            pace: DEFAULT_PACE,
            failure: None,
            fail_after: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            failure: Some(Failure::Unavailable),
            ..Self::new()
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period.max(1);
        self
    }

    /// Delay applied to every period written.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Opens fine, then every write after the first `writes` fails.
    pub fn fail_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    /// Every sample that reached the "speaker", in order.
    pub fn rendered(&self) -> Vec<i16> {
        lock(&self.rendered).clone()
    }

    pub fn clear_rendered(&self) {
        lock(&self.rendered).clear();
    }

    /// How many times the device buffer was discarded.
    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        self.stats.clone()
    }
}

impl Default for MockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for MockOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        _sample_rate: u32,
        period_size: usize,
    ) -> Result<Box<dyn OutputStream>, DeviceError> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error(&self.name));
        }
        let period = if period_size > 0 {
            period_size.min(self.period)
        } else {
            self.period
        };
        Ok(Box::new(MockOutputStream {
            rendered: self.rendered.clone(),
            discards: self.discards.clone(),
            period,
            pace: self.pace,
            remaining: self.fail_after,
            _guard: self.stats.acquire(),
        }))
    }
}

struct MockOutputStream {
    rendered: Arc<Mutex<Vec<i16>>>,
    discards: Arc<AtomicUsize>,
    period: usize,
    pace: Duration,
    remaining: Option<usize>,
    _guard: StatsGuard,
}

impl OutputStream for MockOutputStream {
    fn write(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        unplug(&mut self.remaining)?;
        let n = samples.len().min(self.period);
        lock(&self.rendered).extend_from_slice(&samples[..n]);
        thread::sleep(self.pace);
        Ok(n)
    }

    fn discard(&mut self) -> Result<(), DeviceError> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn period_size(&self) -> usize {
        self.period
    }
}
