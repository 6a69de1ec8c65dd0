//! Realtime session over a WebSocket.
//!
//! One [`RealtimeSession`] owns one connection. Outgoing audio goes through
//! a bounded queue that never blocks the caller: when the network falls
//! behind, new frames are dropped with a warning. Incoming events are decoded
//! in order on the link task and delivered through an unbounded
//! [`SessionEvent`] channel, so a slow consumer never stalls the socket.
//!
//! Barge-in: when the remote VAD reports `input_audio_buffer.speech_started`
//! the link task advances the shared [`FlushSignal`] *before* forwarding the
//! event or decoding anything after it. Every audio delta carries the epoch it
//! was received under, so deltas that were already queued behind the
//! interrupt are recognisably stale wherever they are.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::audio::{AudioFrame, FlushSignal, WireChunk};
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::protocol::{ClientMessage, ServerEvent, parse_server_event};
use crate::state_machine::{SessionState, SessionStateCell};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outgoing messages waiting for the socket. About five seconds of 20 ms frames.
pub const OUTGOING_CAPACITY: usize = 256;

/// Consecutive reads before queued writes get a turn.
const READ_BURST: usize = 32;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the session reports to its owner, in receipt order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Transport is up and the session is `Open`.
    Opened,
    /// A slice of synthesized speech, tagged with the flush epoch it arrived under.
    AudioDelta { chunk: WireChunk, epoch: u64 },
    /// The remote detected the start of user speech. `epoch` is the flush
    /// epoch this interrupt opened; it is already current when this is
    /// delivered, and deltas tagged with it are post-interrupt audio.
    InputSpeechStarted { epoch: u64 },
    /// Partial transcript of the assistant's reply.
    AssistantTranscript(String),
    /// Final transcript of what the user said.
    UserTranscript(String),
    /// The remote finished one response.
    ResponseDone,
    /// Non-fatal protocol or application error; the session stays open.
    Error(SessionError),
    /// The connection was closed in an orderly way.
    TransportClosed,
    /// The connection failed. Reported once; the session is finished.
    TransportError(TransportError),
    /// An audio device stopped on its own while running.
    DeviceFailed(String),
}

/// Cheap handle for pushing audio into an open session from any thread.
#[derive(Clone)]
pub struct AudioSender {
    state: SessionStateCell,
    out_tx: mpsc::Sender<String>,
}

impl AudioSender {
    /// Queue `frame` as an `input_audio_buffer.append`. Outside `Open` the
    /// frame is dropped silently. Returns whether it was queued.
    pub fn send_audio(&self, frame: &AudioFrame) -> bool {
        if !self.state.is_open() {
            log::trace!("Session not open, dropping {} samples", frame.len());
            return false;
        }
        self.send(ClientMessage::append_audio(WireChunk::encode(frame)))
    }

    /// Ask the remote to forget audio appended but not yet turned into an
    /// utterance. Dropped outside `Open`.
    pub fn clear_pending_input_audio(&self) -> bool {
        if !self.state.is_open() {
            return false;
        }
        self.send(ClientMessage::clear_input())
    }

    fn send(&self, msg: ClientMessage) -> bool {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to encode client message: {}", e);
                return false;
            }
        };
        match self.out_tx.try_send(json) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Outgoing queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// One connection to the realtime endpoint. Not reusable: once it has been
/// opened and closed, build a new one.
pub struct RealtimeSession {
    id: String,
    config: SessionConfig,
    state: SessionStateCell,
    events: mpsc::UnboundedSender<SessionEvent>,
    interrupt: FlushSignal,
    out_tx: mpsc::Sender<String>,
    out_rx: Option<mpsc::Receiver<String>>,
    close: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSession {
    /// `interrupt` is advanced on every remote speech-start, before any later
    /// event is delivered.
    pub fn new(
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
        interrupt: FlushSignal,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUTGOING_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            state: SessionStateCell::new(),
            events,
            interrupt,
            out_tx,
            out_rx: Some(out_rx),
            close: Arc::new(Notify::new()),
            task: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn audio_sender(&self) -> AudioSender {
        AudioSender {
            state: self.state.clone(),
            out_tx: self.out_tx.clone(),
        }
    }

    /// Connect. On success the session is `Open`, [`SessionEvent::Opened`]
    /// has been emitted and `session.update` is the first message queued.
    /// On failure a [`SessionEvent::TransportError`] is emitted and the
    /// session returns to `Idle`; retrying is up to the caller.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if !self
            .state
            .transition(SessionState::Idle, SessionState::Connecting)
        {
            return Err(TransportError::NotReusable(self.state.get()));
        }

        log::info!("[{}] Connecting to {}...", self.id, self.config.url);
        let ws = match self.connect().await {
            Ok(ws) => ws,
            Err(e) => {
                log::error!("[{}] Connection failed: {}", self.id, e);
                self.state
                    .transition(SessionState::Connecting, SessionState::Idle);
                let _ = self.events.send(SessionEvent::TransportError(e.clone()));
                return Err(e);
            }
        };

        let Some(out_rx) = self.out_rx.take() else {
            return Err(TransportError::NotReusable(self.state.get()));
        };
        self.state
            .transition(SessionState::Connecting, SessionState::Open);
        log::info!("[{}] Connected!", self.id);

        let _ = self.events.send(SessionEvent::Opened);
        self.audio_sender()
            .send(ClientMessage::session_update(self.config.params.clone()));

        let (write, read) = ws.split();
        let link = Link {
            id: self.id.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            interrupt: self.interrupt.clone(),
            close: self.close.clone(),
        };
        self.task = Some(tokio::spawn(link.run(write, read, out_rx)));
        Ok(())
    }

    /// Same as [`AudioSender::send_audio`].
    pub fn send_audio(&self, frame: &AudioFrame) -> bool {
        self.audio_sender().send_audio(frame)
    }

    /// Same as [`AudioSender::clear_pending_input_audio`].
    pub fn clear_pending_input_audio(&self) -> bool {
        self.audio_sender().clear_pending_input_audio()
    }

    /// Close the connection and wait for the link task to finish.
    pub async fn stop(&mut self) {
        if self
            .state
            .transition(SessionState::Open, SessionState::Closing)
        {
            log::info!("[{}] Closing session", self.id);
            self.close.notify_one();
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT * 2, &mut task)
                .await
                .is_err()
            {
                log::warn!("[{}] Link task did not finish, aborting", self.id);
                task.abort();
                if self.state.get() != SessionState::Closed {
                    self.state.close();
                    let _ = self.events.send(SessionEvent::TransportClosed);
                }
            }
        }
    }

    async fn connect(&self) -> Result<WsStream, TransportError> {
        let url = Url::parse(&self.config.url).map_err(|e| TransportError::InvalidUrl {
            url: self.config.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl {
                url: self.config.url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let mut request =
            url.as_str()
                .into_client_request()
                .map_err(|e| TransportError::InvalidUrl {
                    url: self.config.url.clone(),
                    reason: e.to_string(),
                })?;
        if let Some(token) = &self.config.token {
            let invalid = |e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                TransportError::Connect {
                    url: self.config.url.clone(),
                    reason: format!("invalid token header: {}", e),
                }
            };
            let headers = request.headers_mut();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).map_err(invalid)?,
            );
            headers.insert("api-key", HeaderValue::from_str(token).map_err(invalid)?);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(ws)
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if self
            .state
            .transition(SessionState::Open, SessionState::Closing)
        {
            self.close.notify_one();
        }
    }
}

/// The connection's task: one loop multiplexing reads and queued writes.
struct Link {
    id: String,
    state: SessionStateCell,
    events: mpsc::UnboundedSender<SessionEvent>,
    interrupt: FlushSignal,
    close: Arc<Notify>,
}

enum Exit {
    Closed,
    Failed(TransportError),
    /// Nobody listens to events any more.
    Abandoned,
}

impl Link {
    async fn run(
        self,
        mut write: SplitSink<WsStream, Message>,
        mut read: SplitStream<WsStream>,
        mut out_rx: mpsc::Receiver<String>,
    ) {
        let mut burst = 0;
        let exit = loop {
            if burst >= READ_BURST {
                burst = 0;
                if let Err(e) = Self::flush_queued(&mut write, &mut out_rx).await {
                    break Exit::Failed(e);
                }
            }
            tokio::select! {
                // close first, then incoming: a speech-start must not wait behind outgoing audio
                biased;
                _ = self.close.notified() => {
                    Self::close_handshake(&mut write, &mut read).await;
                    break Exit::Closed;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        burst += 1;
                        if !self.dispatch(text.as_str()) {
                            break Exit::Abandoned;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        burst += 1;
                        log::debug!("[{}] Ignoring {} byte binary frame", self.id, data.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("[{}] Server closed connection: {:?}", self.id, frame);
                        break Exit::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Exit::Failed(TransportError::Dropped(e.to_string())),
                    None => {
                        break Exit::Failed(TransportError::Dropped(
                            "connection closed without close frame".to_string(),
                        ))
                    }
                },
                out = out_rx.recv() => {
                    burst = 0;
                    match out {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                break Exit::Failed(TransportError::Dropped(e.to_string()));
                            }
                        }
                        None => {
                            Self::close_handshake(&mut write, &mut read).await;
                            break Exit::Closed;
                        }
                    }
                }
            }
        };

        self.state.close();
        match exit {
            Exit::Closed => {
                log::info!("[{}] Session closed", self.id);
                let _ = self.events.send(SessionEvent::TransportClosed);
            }
            Exit::Failed(e) => {
                log::error!("[{}] Transport error: {}", self.id, e);
                let _ = self.events.send(SessionEvent::TransportError(e));
            }
            Exit::Abandoned => {
                log::warn!("[{}] Event receiver dropped, closing", self.id);
                let _ = write.send(Message::Close(None)).await;
            }
        }
    }

    /// Write everything already queued without waiting for more.
    async fn flush_queued(
        write: &mut SplitSink<WsStream, Message>,
        out_rx: &mut mpsc::Receiver<String>,
    ) -> Result<(), TransportError> {
        while let Ok(text) = out_rx.try_recv() {
            write
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| TransportError::Dropped(e.to_string()))?;
        }
        Ok(())
    }

    async fn close_handshake(
        write: &mut SplitSink<WsStream, Message>,
        read: &mut SplitStream<WsStream>,
    ) {
        let _ = write.send(Message::Close(None)).await;
        // wait briefly for the peer's close frame
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
            while let Some(Ok(msg)) = read.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await;
    }

    /// Decode one text message and forward it. Returns `false` once the
    /// event receiver is gone.
    fn dispatch(&self, text: &str) -> bool {
        let event = match parse_server_event(text) {
            Ok(ServerEvent::SpeechStarted { audio_start_ms }) => {
                let epoch = self.interrupt.trigger();
                log::info!(
                    "[{}] User speech started at {:?} ms, interrupting playback (epoch {})",
                    self.id,
                    audio_start_ms,
                    epoch
                );
                SessionEvent::InputSpeechStarted { epoch }
            }
            Ok(ServerEvent::AudioDelta { delta, .. }) => SessionEvent::AudioDelta {
                chunk: WireChunk::from(delta),
                epoch: self.interrupt.current(),
            },
            Ok(ServerEvent::Error { error }) => {
                log::warn!("[{}] Remote error: {:?}", self.id, error);
                SessionEvent::Error(SessionError::Application(error.into()))
            }
            Ok(ServerEvent::TranscriptDelta { delta }) => SessionEvent::AssistantTranscript(delta),
            Ok(ServerEvent::InputTranscriptCompleted { transcript }) => {
                SessionEvent::UserTranscript(transcript)
            }
            Ok(ServerEvent::ResponseDone) => SessionEvent::ResponseDone,
            Ok(ServerEvent::SessionCreated) | Ok(ServerEvent::SessionUpdated) => {
                log::debug!("[{}] Session acknowledged by server", self.id);
                return true;
            }
            Ok(ServerEvent::Unknown) => {
                log::trace!("[{}] Ignoring message: {}", self.id, text);
                return true;
            }
            Err(e) => {
                log::warn!("[{}] Skipping malformed message: {}", self.id, e);
                SessionEvent::Error(SessionError::Protocol(e))
            }
        };
        self.events.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn session(url: &str) -> (RealtimeSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            RealtimeSession::new(SessionConfig::new(url), tx, FlushSignal::new()),
            rx,
        )
    }

    #[tokio::test]
    async fn send_before_start_has_no_effect() {
        let (s, _rx) = session("ws://127.0.0.1:9");
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.send_audio(&AudioFrame::silence(480)));
        assert!(!s.clear_pending_input_audio());
    }

    #[tokio::test]
    async fn failed_connect_returns_to_idle_and_reports() {
        // grab a free port, then close it so nothing is listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut s, mut rx) = session(&format!("ws://{}", addr));
        let err = s.start().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(s.state(), SessionState::Idle);
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::TransportError(TransportError::Connect { .. }))
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let (mut s, _rx) = session("http://example.test/realtime");
        assert!(matches!(
            s.start().await,
            Err(TransportError::InvalidUrl { .. })
        ));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn stop_on_idle_session_is_harmless() {
        let (mut s, _rx) = session("ws://127.0.0.1:9");
        s.stop().await;
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn full_outgoing_queue_drops_instead_of_growing() {
        let (s, _rx) = session("ws://127.0.0.1:9");
        // open without a link task, so nothing drains the queue
        assert!(s.state.transition(SessionState::Idle, SessionState::Connecting));
        assert!(s.state.transition(SessionState::Connecting, SessionState::Open));

        let frame = AudioFrame::silence(480);
        for _ in 0..OUTGOING_CAPACITY {
            assert!(s.send_audio(&frame));
        }
        assert!(!s.send_audio(&frame));
        assert!(!s.clear_pending_input_audio());
        assert_eq!(s.state(), SessionState::Open);
    }
}
