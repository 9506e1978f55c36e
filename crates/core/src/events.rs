//! Event vocabulary shared by every component on the bus.
//!
//! Events are ephemeral: a topic name plus a payload that always carries the
//! session it belongs to. Topic names are plain strings so providers can
//! introduce their own, but the ones the engine itself understands live in
//! [`topics`].

use crate::task::Task;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Well-known topic names.
pub mod topics {
    /// Raw PCM16 frame received from transport.
    pub const AUDIO_FRAME: &str = "audio-frame";
    /// A contiguous speech segment concluded and is ready for transcription.
    pub const UTTERANCE_READY: &str = "utterance-ready";
    /// The user asked to stop listening and process what was heard so far.
    pub const STOP_LISTENING: &str = "stop-listening";
    /// The client picked a different input/output device.
    pub const DEVICE_SELECT: &str = "device-select";
    /// Typed text from the client, handled like a transcribed utterance.
    pub const USER_TEXT: &str = "user-text";
    /// A line of conversation (user or assistant) for display.
    pub const TRANSCRIPT: &str = "transcript";
    /// Synthesized speech bound for transport.
    pub const AUDIO_OUT: &str = "audio";
    pub const LISTENING_STATE: &str = "listening-state";
    pub const ECHO_SUPPRESS: &str = "echo-suppress";
    /// A task changed state.
    pub const TASK_UPDATED: &str = "task-updated";
    /// Playback commands emitted by the playback-control provider.
    pub const PLAYBACK: &str = "playback";

    /// Topics delivered to the session's transport connection.
    pub const OUTBOUND: [&str; 5] = [TRANSCRIPT, AUDIO_OUT, LISTENING_STATE, ECHO_SUPPRESS, PLAYBACK];
}

/// Opaque session identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Whether the segmenter currently believes the user is talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningState {
    Active,
    Idle,
}

/// The data carried by an [`Event`].
#[derive(Debug, Clone)]
pub enum Payload {
    AudioFrame(Bytes),
    /// Concatenated frames of one utterance, in arrival order.
    Utterance(Bytes),
    StopListening,
    DeviceSelect(serde_json::Value),
    UserText(String),
    Transcript { role: Role, text: String },
    Audio { encoding: String, data: Bytes },
    ListeningState(ListeningState),
    EchoSuppress(bool),
    TaskUpdated(Box<Task>),
    /// Free-form payload for provider-defined topics.
    Json(serde_json::Value),
}

/// A single publication on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    pub session_id: SessionId,
    pub payload: Payload,
}

impl Event {
    pub fn new(session_id: SessionId, payload: Payload) -> Self {
        Self {
            session_id,
            payload,
        }
    }
}
