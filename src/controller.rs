use crate::audio_bridge::{CaptureController, PlaybackController};
use crate::config::SessionConfig;
use crate::error::ListenError;
use crate::gui_bridge::{GuiCommand, ListenAction, MuteTarget, StatusReport};
use crate::net_link::{RealtimeSession, SessionEvent};
use crate::state_machine::SessionState;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wires capture, playback and the realtime session together.
///
/// Every listening run gets a fresh [`RealtimeSession`]; all sessions report
/// into the same event channel, whose receiver the owner drains into
/// [`handle_session_event`](Self::handle_session_event). Device threads
/// report mid-run failures into that channel too.
pub struct SessionController {
    session_config: SessionConfig,
    session: Option<RealtimeSession>,
    capture: CaptureController,
    playback: PlaybackController,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    recording: bool,
    last_error: Option<String>,
    // 当前回复的文字
    assistant_transcript: String,
}

impl SessionController {
    pub fn new(
        session_config: SessionConfig,
        mut capture: CaptureController,
        mut playback: PlaybackController,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let tx = events_tx.clone();
        capture.on_failure(Arc::new(move |e| {
            let _ = tx.send(SessionEvent::DeviceFailed(format!("microphone: {}", e)));
        }));
        let tx = events_tx.clone();
        playback.on_failure(Arc::new(move |e| {
            let _ = tx.send(SessionEvent::DeviceFailed(format!("speaker: {}", e)));
        }));
        Self {
            session_config,
            session: None,
            capture,
            playback,
            events_tx,
            recording: false,
            last_error: None,
            assistant_transcript: String::new(),
        }
    }

    /// Connect a new session, start the microphone, then reset the speaker.
    /// Any failure leaves the controller not recording with the error kept
    /// for display.
    pub async fn begin_listening(&mut self) -> Result<(), ListenError> {
        if self.recording {
            log::debug!("Already listening");
            return Ok(());
        }
        self.last_error = None;

        // 旧会话残留的音频一律作废
        self.playback.stop();
        if let Some(mut old) = self.session.take() {
            old.stop().await;
        }

        let mut session = RealtimeSession::new(
            self.session_config.clone(),
            self.events_tx.clone(),
            self.playback.flush_signal(),
        );
        if let Err(e) = session.start().await {
            self.last_error = Some(e.to_string());
            return Err(e.into());
        }
        let sender = session.audio_sender();
        self.session = Some(session);

        if let Err(e) = self.capture.start(move |frame| {
            sender.send_audio(&frame);
        }) {
            log::error!("Failed to start capture: {}", e);
            self.abort_listening(e.to_string());
            return Err(e.into());
        }

        if let Err(e) = self.playback.reset() {
            log::error!("Failed to reset playback: {}", e);
            self.abort_listening(e.to_string());
            return Err(e.into());
        }

        self.recording = true;
        log::info!("Listening started");
        Ok(())
    }

    /// Stop the microphone, cut playback, and tell the remote to drop any
    /// half-finished utterance. The session itself stays connected.
    pub fn end_listening(&mut self) {
        self.capture.stop();
        self.playback.stop();
        if let Some(session) = &self.session {
            session.clear_pending_input_audio();
        }
        if self.recording {
            self.recording = false;
            log::info!("Listening stopped");
        }
    }

    pub async fn toggle_listening(&mut self) -> Result<(), ListenError> {
        if self.recording {
            self.end_listening();
            Ok(())
        } else {
            self.begin_listening().await
        }
    }

    fn abort_listening(&mut self, reason: String) {
        self.end_listening();
        self.last_error = Some(reason);
    }

    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::InputSpeechStarted { epoch } => {
                self.playback.flush_to(epoch);
                self.assistant_transcript.clear();
                log::info!("User started speaking, playback interrupted");
            }
            SessionEvent::AudioDelta { chunk, epoch } => {
                if !self.recording {
                    log::trace!("Not listening, dropping audio delta");
                    return;
                }
                if let Err(e) = self.playback.play_tagged(&chunk, epoch) {
                    log::warn!("Bad audio delta: {}", e);
                }
            }
            SessionEvent::Opened => log::debug!("Session opened"),
            SessionEvent::AssistantTranscript(delta) => {
                self.assistant_transcript.push_str(&delta);
            }
            SessionEvent::UserTranscript(text) => log::info!("User: {}", text),
            SessionEvent::ResponseDone => {
                if !self.assistant_transcript.is_empty() {
                    log::info!("Assistant: {}", self.assistant_transcript);
                    self.assistant_transcript.clear();
                }
            }
            SessionEvent::Error(e) => {
                log::warn!("Session error: {}", e);
                self.last_error = Some(e.to_string());
            }
            SessionEvent::TransportClosed => {
                if self.current_session_is_open() {
                    // 上一个会话的关闭通知
                    return;
                }
                log::info!("Session closed by remote");
                self.end_listening();
            }
            SessionEvent::TransportError(e) => {
                if self.current_session_is_open() {
                    return;
                }
                log::error!("Transport error: {}", e);
                self.abort_listening(e.to_string());
            }
            SessionEvent::DeviceFailed(reason) => {
                log::error!("Audio device failed: {}", reason);
                if self.recording {
                    self.abort_listening(reason);
                } else {
                    self.last_error = Some(reason);
                }
            }
        }
    }

    fn current_session_is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state() == SessionState::Open)
    }

    /// Apply a control-surface command and return the state to show.
    pub async fn handle_gui_command(&mut self, cmd: GuiCommand) -> StatusReport {
        match cmd {
            GuiCommand::Listen { state } => {
                let result = match state {
                    ListenAction::Start => self.begin_listening().await,
                    ListenAction::Stop => {
                        self.end_listening();
                        Ok(())
                    }
                    ListenAction::Toggle => self.toggle_listening().await,
                };
                if let Err(e) = result {
                    log::error!("Listen command failed: {}", e);
                }
            }
            GuiCommand::Mute { target, muted } => match (target, muted) {
                (MuteTarget::Mic, Some(m)) => self.capture.set_muted(m),
                (MuteTarget::Mic, None) => {
                    self.capture.toggle_mute();
                }
                (MuteTarget::Speaker, Some(m)) => self.playback.set_muted(m),
                (MuteTarget::Speaker, None) => {
                    self.playback.toggle_mute();
                }
            },
            GuiCommand::Status => {}
        }
        self.status()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            is_recording: self.recording,
            is_mic_muted: self.capture.is_muted(),
            is_speaker_muted: self.playback.is_muted(),
            session_state: self.session_state().to_string(),
            error: self.last_error.clone(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_mic_muted(&self) -> bool {
        self.capture.is_muted()
    }

    pub fn is_speaker_muted(&self) -> bool {
        self.playback.is_muted()
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.capture.set_muted(muted);
    }

    pub fn set_speaker_muted(&self, muted: bool) {
        self.playback.set_muted(muted);
    }

    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, |s| s.state())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// End listening, close the session and release both devices.
    pub async fn shutdown(&mut self) {
        self.end_listening();
        if let Some(mut session) = self.session.take() {
            session.stop().await;
        }
        self.playback.teardown();
    }
}
