//! Defines the WebSocket message protocol between the client and the API server.
//!
//! Binary frames carry raw PCM16 audio and never appear here; every text frame
//! is one JSON object tagged by `type`.

use crate::audio_utils;
use chorus_core::PlaybackCommand;
use chorus_core::events::{Event, ListeningState, Payload, Role, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// The client switched microphone or speaker. Settings are opaque to us.
    DeviceSelect {
        #[serde(flatten)]
        settings: Map<String, Value>,
    },
    /// Process whatever has been heard so far, without waiting for silence.
    StopListening,
    /// Typed input, handled like a transcribed utterance.
    UserText { text: String },
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection.
    Session {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    Transcript { role: Role, text: String },
    /// Synthesized speech, base64 encoded.
    Audio { encoding: String, data: String },
    ListeningState { state: ListeningState },
    /// While `suppress` is true the client should mute its microphone.
    EchoSuppress { suppress: bool },
    Playback(PlaybackCommand),
    Error { message: String },
}

impl ServerMessage {
    /// Maps a bus event onto its client-facing message, if it has one.
    pub fn from_event(event: &Event) -> Option<Self> {
        let message = match &event.payload {
            Payload::Transcript { role, text } => Self::Transcript {
                role: *role,
                text: text.clone(),
            },
            Payload::Audio { encoding, data } => Self::Audio {
                encoding: encoding.clone(),
                data: audio_utils::encode_base64(data),
            },
            Payload::ListeningState(state) => Self::ListeningState { state: *state },
            Payload::EchoSuppress(suppress) => Self::EchoSuppress {
                suppress: *suppress,
            },
            Payload::Json(value) => match serde_json::from_value::<PlaybackCommand>(value.clone()) {
                Ok(command) => Self::Playback(command),
                Err(_) => return None,
            },
            _ => return None,
        };
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn event(payload: Payload) -> Event {
        Event::new(SessionId::new("s1"), payload)
    }

    #[test]
    fn test_client_messages_parse() {
        let stop: ClientMessage = serde_json::from_str(r#"{"type": "stop-listening"}"#).unwrap();
        assert_eq!(stop, ClientMessage::StopListening);

        let text: ClientMessage =
            serde_json::from_str(r#"{"type": "user-text", "text": "play jazz"}"#).unwrap();
        assert_eq!(
            text,
            ClientMessage::UserText {
                text: "play jazz".to_string()
            }
        );

        let device: ClientMessage =
            serde_json::from_str(r#"{"type": "device-select", "deviceId": "mic-2", "kind": "audioinput"}"#)
                .unwrap();
        match device {
            ClientMessage::DeviceSelect { settings } => {
                assert_eq!(settings.get("deviceId"), Some(&json!("mic-2")));
                assert_eq!(settings.get("kind"), Some(&json!("audioinput")));
            }
            other => panic!("Expected DeviceSelect, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_client_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "init"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"text": "no tag"}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_format() {
        let session = serde_json::to_value(ServerMessage::Session {
            session_id: SessionId::new("abc"),
        })
        .unwrap();
        assert_eq!(session, json!({ "type": "session", "sessionId": "abc" }));

        let echo = serde_json::to_value(ServerMessage::EchoSuppress { suppress: true }).unwrap();
        assert_eq!(echo, json!({ "type": "echo-suppress", "suppress": true }));

        let playback = serde_json::to_value(ServerMessage::Playback(PlaybackCommand::Play {
            mood: "happy".to_string(),
        }))
        .unwrap();
        assert_eq!(playback, json!({ "type": "playback", "action": "play", "mood": "happy" }));
    }

    #[test]
    fn test_from_event_maps_outbound_payloads() {
        let audio = ServerMessage::from_event(&event(Payload::Audio {
            encoding: "pcm16".to_string(),
            data: Bytes::from_static(&[0x00, 0x40]),
        }));
        assert_eq!(
            audio,
            Some(ServerMessage::Audio {
                encoding: "pcm16".to_string(),
                data: "AEA=".to_string()
            })
        );

        let listening = ServerMessage::from_event(&event(Payload::ListeningState(ListeningState::Idle)));
        let listening = serde_json::to_value(listening.unwrap()).unwrap();
        assert_eq!(listening, json!({ "type": "listening-state", "state": "idle" }));

        let pause = ServerMessage::from_event(&event(Payload::Json(json!({ "action": "pause" }))));
        assert_eq!(pause, Some(ServerMessage::Playback(PlaybackCommand::Pause)));
    }

    #[test]
    fn test_from_event_skips_internal_payloads() {
        assert_eq!(ServerMessage::from_event(&event(Payload::StopListening)), None);
        assert_eq!(
            ServerMessage::from_event(&event(Payload::AudioFrame(Bytes::new()))),
            None
        );
        assert_eq!(
            ServerMessage::from_event(&event(Payload::Json(json!({ "action": "explode" })))),
            None
        );
    }
}
