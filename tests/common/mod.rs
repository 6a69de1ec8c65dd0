#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use realtime_voice_rs::audio::{AudioFrame, WireChunk};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

pub const WAIT: Duration = Duration::from_secs(3);

enum Outgoing {
    Text(String),
    Close,
    Drop,
}

/// Stand-in for the remote realtime endpoint.
pub struct FakeEndpoint {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    authorization: Arc<Mutex<Option<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeEndpoint {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/realtime", listener.local_addr().unwrap());
        let (in_tx, received) = mpsc::unbounded_channel();
        let (outgoing, mut out_rx) = mpsc::unbounded_channel();
        let authorization = Arc::new(Mutex::new(None));
        let auth = authorization.clone();

        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        // connections are served one after another
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let auth = auth.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *auth.lock().unwrap() = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Ok(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                let (mut write, mut read) = ws.split();
                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = in_tx.send(serde_json::from_str(text.as_str()).unwrap());
                            }
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                            Some(Ok(_)) => {}
                        },
                        out = out_rx.recv() => match out {
                            Some(Outgoing::Text(text)) => {
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Outgoing::Close) => {
                                let _ = write.send(Message::Close(None)).await;
                                // wait for the client's reply
                                while let Some(Ok(_)) = read.next().await {}
                                break;
                            }
                            Some(Outgoing::Drop) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            url,
            received,
            outgoing,
            authorization,
            connections,
        }
    }

    pub fn send_raw(&self, text: &str) {
        self.outgoing.send(Outgoing::Text(text.to_string())).unwrap();
    }

    pub fn send(&self, value: Value) {
        self.send_raw(&value.to_string());
    }

    pub fn send_delta(&self, frame: &AudioFrame) {
        self.send(json!({
            "type": "response.audio.delta",
            "response_id": "resp_1",
            "delta": WireChunk::encode(frame).as_str(),
        }));
    }

    pub fn send_speech_started(&self) {
        self.send(json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 1200,
            "item_id": "item_1",
        }));
    }

    /// Close with a handshake.
    pub fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }

    /// Drop the TCP connection without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.outgoing.send(Outgoing::Drop);
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().unwrap().clone()
    }

    pub async fn next_message(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("endpoint task ended")
    }

    /// Next message of `kind`, skipping anything else.
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let msg = self.next_message().await;
            if msg["type"] == kind {
                return msg;
            }
        }
    }

    /// Nothing arrives within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(msg)) = tokio::time::timeout(window, self.received.recv()).await {
            panic!("unexpected client message: {}", msg);
        }
    }
}

pub fn tone(value: i16, len: usize) -> AudioFrame {
    AudioFrame::new(vec![value; len])
}

/// Samples carried by an `input_audio_buffer.append` message.
pub fn appended_samples(msg: &Value) -> Vec<i16> {
    let audio = msg["audio"].as_str().unwrap().to_string();
    WireChunk::from(audio).decode().unwrap().samples().to_vec()
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
