//! Abstract audio device capability consumed by the engines.
//!
//! A backend is shareable configuration ("which device"); a stream is the
//! opened handle. Streams are opened *on* the engine thread that uses them
//! and never leave it, so they need not be `Send`.

use std::sync::Arc;

use crate::error::DeviceError;

/// Called once, on the audio thread, when a running stream dies on its own.
pub type FailureCallback = Arc<dyn Fn(DeviceError) + Send + Sync + 'static>;

/// Something that can open an input device at a given rate.
pub trait InputBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open the device for mono PCM16 capture at `sample_rate`.
    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>, DeviceError>;
}

/// An opened capture device.
pub trait InputStream {
    /// Block until samples are available and read up to `buf.len()` of them.
    /// Returns the number of samples read; `0` means nothing arrived this
    /// period and the caller should simply read again.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, DeviceError>;

    /// Natural read granularity of the device, in samples.
    fn period_size(&self) -> usize;
}

/// Something that can open an output device at a given rate.
pub trait OutputBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open the device for mono PCM16 playback at `sample_rate`.
    /// `period_size` is a hint; 0 lets the device decide.
    fn open(&self, sample_rate: u32, period_size: usize)
    -> Result<Box<dyn OutputStream>, DeviceError>;
}

/// An opened playback device.
pub trait OutputStream {
    /// Write samples, blocking at device pacing. Returns how many were taken.
    fn write(&mut self, samples: &[i16]) -> Result<usize, DeviceError>;

    /// Throw away everything buffered in the device and be ready for new audio.
    fn discard(&mut self) -> Result<(), DeviceError>;

    fn period_size(&self) -> usize;
}
