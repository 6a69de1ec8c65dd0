use std::time::Duration;

use serde::Serialize;

use crate::audio::SAMPLE_RATE;
use crate::protocol::{InputTranscription, SessionParams};

/// Runtime overrides read from the process environment.
pub const ENV_WS_URL: &str = "REALTIME_WS_URL";
pub const ENV_API_KEY: &str = "REALTIME_API_KEY";
pub const ENV_STATUS_URL: &str = "REALTIME_STATUS_URL";

/// Longest capture frame accepted from configuration.
pub const MAX_FRAME_DURATION_MS: u32 = 1000;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub playback_period_size: usize,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,

    // 网络配置（可在运行时覆盖）
    pub ws_url: String,
    pub ws_token: String,
    pub status_url: String,
    pub status_interval_ms: u64,

    // 会话配置
    pub voice: &'static str,
    pub instructions: &'static str,
    pub input_transcription: bool,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        let config = Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            frame_duration_ms: env!("AUDIO_FRAME_DURATION_MS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_FRAME_DURATION_MS")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,

            gui_local_port: env!("GUI_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,

            ws_url: env!("WS_URL").to_string(),
            ws_token: env!("WS_TOKEN").to_string(),
            status_url: env!("STATUS_URL").to_string(),
            status_interval_ms: env!("STATUS_INTERVAL_MS")
                .parse()
                .map_err(|_| "Failed to parse STATUS_INTERVAL_MS")?,

            voice: env!("SESSION_VOICE"),
            instructions: env!("SESSION_INSTRUCTIONS"),
            input_transcription: env!("SESSION_INPUT_TRANSCRIPTION")
                .parse()
                .map_err(|_| "Failed to parse SESSION_INPUT_TRANSCRIPTION")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.sample_rate != SAMPLE_RATE {
            return Err("AUDIO_SAMPLE_RATE must be 24000 (PCM16 wire format)");
        }
        if self.frame_duration_ms == 0 || self.frame_duration_ms > MAX_FRAME_DURATION_MS {
            return Err("AUDIO_FRAME_DURATION_MS must be between 1 and 1000");
        }
        Ok(())
    }

    /// Apply overrides from `lookup` (normally `std::env::var`).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_WS_URL) {
            self.ws_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.ws_token = key;
        }
        if let Some(url) = lookup(ENV_STATUS_URL) {
            self.status_url = url;
        }
        self
    }

    pub fn from_env() -> Result<Self, &'static str> {
        Ok(Self::new()?.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            frame_duration_ms: self.frame_duration_ms,
            playback_period_size: self.playback_period_size,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut params = SessionParams::server_vad();
        params.voice = non_empty(self.voice);
        params.instructions = non_empty(self.instructions);
        if self.input_transcription {
            params.input_audio_transcription = Some(InputTranscription {
                model: "whisper-1".to_string(),
            });
        }
        SessionConfig {
            url: self.ws_url.clone(),
            token: non_empty(&self.ws_token),
            params,
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(100))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Audio pipeline settings.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Capture frame length in ms (20 ms = 480 samples)
    pub frame_duration_ms: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            frame_duration_ms: 20,
            playback_period_size: 480,
        }
    }
}

/// Everything a [`RealtimeSession`](crate::net_link::RealtimeSession) needs to connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer` and `api-key` when present.
    pub token: Option<String>,
    pub params: SessionParams,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            params: SessionParams::server_vad(),
        }
    }
}
