//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::device::{InputBackend, InputStream, OutputBackend, OutputStream};
use crate::error::DeviceError;

/// Consecutive failed recoveries after which a stream gives up.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Capture from a named ALSA device ("default", "plughw:0,0", ...).
#[derive(Debug, Clone)]
pub struct AlsaInput {
    device: String,
}

impl AlsaInput {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

/// Playback to a named ALSA device.
#[derive(Debug, Clone)]
pub struct AlsaOutput {
    device: String,
}

impl AlsaOutput {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl InputBackend for AlsaInput {
    fn name(&self) -> &str {
        &self.device
    }

    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>, DeviceError> {
        let (pcm, params) = open_pcm(&self.device, Direction::Capture, sample_rate, None)?;
        Ok(Box::new(AlsaStream {
            device: self.device.clone(),
            pcm,
            params,
        }))
    }
}

impl OutputBackend for AlsaOutput {
    fn name(&self) -> &str {
        &self.device
    }

    fn open(
        &self,
        sample_rate: u32,
        period_size: usize,
    ) -> Result<Box<dyn OutputStream>, DeviceError> {
        let period = (period_size > 0).then_some(period_size);
        let (pcm, params) = open_pcm(&self.device, Direction::Playback, sample_rate, period)?;
        Ok(Box::new(AlsaStream {
            device: self.device.clone(),
            pcm,
            params,
        }))
    }
}

/// An opened mono S16LE PCM handle.
struct AlsaStream {
    device: String,
    pcm: PCM,
    params: AlsaParams,
}

impl AlsaStream {
    // 触发 ALSA 硬件恢复状态机
    fn recover(&self, err: alsa::Error, retries: &mut u32) -> Result<(), DeviceError> {
        *retries += 1;
        log::warn!("ALSA XRUN or error on '{}': {}, recovering...", self.device, err);
        if *retries > MAX_RECOVERY_RETRIES {
            return Err(DeviceError::Io(format!(
                "'{}' did not recover after {} attempts: {}",
                self.device, MAX_RECOVERY_RETRIES, err
            )));
        }
        self.pcm
            .prepare()
            .map_err(|e| DeviceError::Io(format!("failed to recover '{}': {}", self.device, e)))
    }
}

impl InputStream for AlsaStream {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, DeviceError> {
        let mut retries = 0;
        loop {
            let io = self.pcm.io_i16().map_err(|e| DeviceError::Io(e.to_string()))?;
            match io.readi(buf) {
                Ok(n) => return Ok(n),
                Err(e) => self.recover(e, &mut retries)?,
            }
        }
    }

    fn period_size(&self) -> usize {
        self.params.period_size
    }
}

impl OutputStream for AlsaStream {
    fn write(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        let mut retries = 0;
        loop {
            let io = self.pcm.io_i16().map_err(|e| DeviceError::Io(e.to_string()))?;
            match io.writei(samples) {
                Ok(n) => return Ok(n),
                Err(e) => self.recover(e, &mut retries)?,
            }
        }
    }

    fn discard(&mut self) -> Result<(), DeviceError> {
        // drop() stops immediately and discards pending frames
        self.pcm
            .drop()
            .and_then(|_| self.pcm.prepare())
            .map_err(|e| DeviceError::Io(format!("failed to discard '{}': {}", self.device, e)))
    }

    fn period_size(&self) -> usize {
        self.params.period_size
    }
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), DeviceError> {
    let dir_name = match direction {
        Direction::Capture => "Capture",
        Direction::Playback => "Playback",
    };

    let pcm = PCM::new(device, direction, false).map_err(|e| DeviceError::Unavailable {
        device: device.to_string(),
        reason: e.to_string(),
    })?;

    let unsupported = |what: &str, e: alsa::Error| DeviceError::UnsupportedFormat {
        device: device.to_string(),
        format: format!("{} ({})", what, e),
    };

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(|e| unsupported("hw params", e))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| unsupported("interleaved access", e))?;
        hwp.set_format(Format::S16LE)
            .map_err(|e| unsupported("S16LE samples", e))?;
        hwp.set_channels(1).map_err(|e| unsupported("mono", e))?;
        hwp.set_rate(sample_rate, ValueOr::Nearest)
            .map_err(|e| unsupported(&format!("{} Hz", sample_rate), e))?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(|e| unsupported("period size", e))?;
        }
        pcm.hw_params(&hwp).map_err(|e| unsupported("hw params", e))?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm
            .hw_params_current()
            .map_err(|e| unsupported("hw params", e))?;
        let rate = hwp.get_rate().map_err(|e| unsupported("rate", e))?;
        let ps = hwp
            .get_period_size()
            .map_err(|e| unsupported("period size", e))? as usize;
        AlsaParams {
            sample_rate: rate,
            period_size: ps,
        }
    };

    if params.sample_rate != sample_rate {
        return Err(DeviceError::UnsupportedFormat {
            device: device.to_string(),
            format: format!(
                "{} Hz (hardware negotiated {} Hz)",
                sample_rate, params.sample_rate
            ),
        });
    }

    log::info!(
        "ALSA {}: device={}, rate={}, channels=1, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.period_size,
    );

    Ok((pcm, params))
}
