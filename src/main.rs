use clap::Parser;
use realtime_voice_rs::audio::mock::{MockInput, MockOutput};
use realtime_voice_rs::audio::{AlsaInput, AlsaOutput, InputBackend, OutputBackend};
use realtime_voice_rs::gui_bridge::{GuiBridge, GuiEvent};
use realtime_voice_rs::status_poller::StatusPoller;
use realtime_voice_rs::{CaptureController, Config, PlaybackController, SessionController, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(version, about = "Realtime duplex voice client")]
struct Args {
    /// Run on mock audio devices (no sound card needed)
    #[arg(long)]
    dry_run: bool,

    /// Begin listening right after startup
    #[arg(long)]
    listen: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();
    let args = Args::parse();

    // 加载配置
    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    let audio = config.audio_config();

    let (input, output): (Arc<dyn InputBackend>, Arc<dyn OutputBackend>) = if args.dry_run {
        log::info!("Dry run: using mock audio devices");
        (
            Arc::new(MockInput::new().with_pace(Duration::from_millis(20))),
            Arc::new(MockOutput::new().with_pace(Duration::from_millis(20))),
        )
    } else {
        (
            Arc::new(AlsaInput::new(audio.capture_device.clone())),
            Arc::new(AlsaOutput::new(audio.playback_device.clone())),
        )
    };

    // 会话事件通道
    let (tx_session_event, mut rx_session_event) = mpsc::unbounded_channel::<SessionEvent>();

    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);

    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    // 任务状态轮询，与音频无关
    let (poller, mut rx_mission_state) =
        StatusPoller::new(config.status_url.clone(), config.status_interval())?;
    tokio::spawn(poller.run());

    let mut controller = SessionController::new(
        config.session_config(),
        CaptureController::new(input, audio.frame_duration_ms),
        PlaybackController::new(output, audio.playback_period_size),
        tx_session_event,
    );

    log::info!("{} {} started", config.app_name, config.app_version);

    if args.listen {
        if let Err(e) = controller.begin_listening().await {
            log::error!("Failed to start listening: {}", e);
        }
        if let Err(e) = gui_bridge.send_status(&controller.status()).await {
            log::warn!("Failed to send to GUI: {}", e);
        }
    }

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_session_event.recv() => {
                let was_recording = controller.is_recording();
                controller.handle_session_event(event).await;
                // 会话异常结束时通知GUI
                if was_recording != controller.is_recording() {
                    if let Err(e) = gui_bridge.send_status(&controller.status()).await {
                        log::warn!("Failed to send to GUI: {}", e);
                    }
                }
            }

            Some(GuiEvent::Command(cmd)) = rx_gui_event.recv() => {
                let status = controller.handle_gui_command(cmd).await;
                if let Err(e) = gui_bridge.send_status(&status).await {
                    log::warn!("Failed to send to GUI: {}", e);
                }
            }

            Ok(()) = rx_mission_state.changed() => {
                let state = rx_mission_state.borrow_and_update().clone();
                if let Some(state) = state {
                    if let Err(e) = gui_bridge.send_mission_state(&state).await {
                        log::warn!("Failed to send to GUI: {}", e);
                    }
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
