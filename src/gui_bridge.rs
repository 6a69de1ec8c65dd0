use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Commands accepted from the GUI process.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuiCommand {
    Listen {
        state: ListenAction,
    },
    /// Absent `muted` toggles.
    Mute {
        target: MuteTarget,
        #[serde(default)]
        muted: Option<bool>,
    },
    Status,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenAction {
    Start,
    Stop,
    Toggle,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MuteTarget {
    Mic,
    Speaker,
}

/// What the GUI gets to display. Nothing about the pipeline internals.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub is_recording: bool,
    pub is_mic_muted: bool,
    pub is_speaker_muted: bool,
    pub session_state: String,
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GuiMessage<'a> {
    Status(&'a StatusReport),
    MissionState { state: &'a serde_json::Value },
}

pub enum GuiEvent {
    Command(GuiCommand),
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<GuiEvent>,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        Self::bind(
            &format!("0.0.0.0:{}", config.gui_local_port),
            &format!("127.0.0.1:{}", config.gui_remote_port),
            tx,
        )
        .await
    }

    pub async fn bind(
        local_addr: &str,
        target_addr: &str,
        tx: mpsc::Sender<GuiEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        log::info!(
            "GUI bridge listening on {}, replying to {}",
            socket.local_addr()?,
            target_addr
        );
        Ok(Self {
            socket: Arc::new(socket),
            target_addr: target_addr.to_string(),
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096]; // 4KB缓冲区
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Non UTF-8 datagram from {}", from);
                continue;
            };
            match parse_command(msg) {
                Ok(cmd) => {
                    log::debug!("GUI command from {}: {:?}", from, cmd);
                    if let Err(e) = self.tx.send(GuiEvent::Command(cmd)).await {
                        log::error!("Failed to send GUI event: {}", e);
                        break;
                    }
                }
                Err(e) => log::warn!("Ignoring GUI message {:?}: {}", msg, e),
            }
        }
        Ok(())
    }

    pub async fn send_status(&self, status: &StatusReport) -> anyhow::Result<()> {
        self.send(&GuiMessage::Status(status)).await
    }

    pub async fn send_mission_state(&self, state: &serde_json::Value) -> anyhow::Result<()> {
        self.send(&GuiMessage::MissionState { state }).await
    }

    async fn send(&self, msg: &GuiMessage<'_>) -> anyhow::Result<()> {
        let text = serde_json::to_string(msg)?;
        self.socket
            .send_to(text.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

pub fn parse_command(text: &str) -> Result<GuiCommand, serde_json::Error> {
    serde_json::from_str(text)
}
