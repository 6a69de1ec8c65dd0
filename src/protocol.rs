//! JSON envelopes exchanged with the realtime endpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::WireChunk;
use crate::error::{ApplicationError, ProtocolError};

/// Messages sent to the remote endpoint.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: String,
        session: SessionParams,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { event_id: String, audio: String },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear { event_id: String },
}

impl ClientMessage {
    pub fn session_update(session: SessionParams) -> Self {
        ClientMessage::SessionUpdate {
            event_id: new_event_id(),
            session,
        }
    }

    pub fn append_audio(chunk: WireChunk) -> Self {
        ClientMessage::InputAudioBufferAppend {
            event_id: new_event_id(),
            audio: chunk.into_string(),
        }
    }

    pub fn clear_input() -> Self {
        ClientMessage::InputAudioBufferClear {
            event_id: new_event_id(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

fn new_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

/// Session options announced once the transport is open.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub turn_detection: TurnDetection,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputTranscription>,
}

impl SessionParams {
    pub fn server_vad() -> Self {
        Self {
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
            },
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
            voice: None,
            instructions: None,
            input_audio_transcription: None,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InputTranscription {
    pub model: String,
}

/// Events received from the remote endpoint. Types this client does not
/// act on decode to [`ServerEvent::Unknown`].
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        delta: String,
        response_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { audio_start_ms: Option<u64> },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted { transcript: String },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl From<ErrorBody> for ApplicationError {
    fn from(body: ErrorBody) -> Self {
        ApplicationError {
            kind: body.kind,
            code: body.code,
            message: body.message,
        }
    }
}

/// Decode one text frame from the endpoint.
pub fn parse_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
