use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    gui: Gui,
    network: Network,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    frame_duration_ms: u32,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Gui {
    local_port: u16,
    remote_port: u16,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    ws_token: String,
    status_url: String,
    status_interval_ms: u64,
}

#[derive(Deserialize)]
struct Session {
    voice: String,
    instructions: String,
    input_transcription: bool,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_FRAME_DURATION_MS={}", config.audio.frame_duration_ms);
    println!(
        "cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}",
        config.audio.playback_period_size
    );

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=WS_TOKEN={}", config.network.ws_token);
    println!("cargo:rustc-env=STATUS_URL={}", config.network.status_url);
    println!(
        "cargo:rustc-env=STATUS_INTERVAL_MS={}",
        config.network.status_interval_ms
    );

    // 会话配置
    println!("cargo:rustc-env=SESSION_VOICE={}", config.session.voice);
    println!(
        "cargo:rustc-env=SESSION_INSTRUCTIONS={}",
        config.session.instructions.replace('\n', " ")
    );
    println!(
        "cargo:rustc-env=SESSION_INPUT_TRANSCRIPTION={}",
        config.session.input_transcription
    );
}
