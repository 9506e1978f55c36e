//! Narrow interfaces to the services the engine consumes but does not own:
//! speech-to-text, intent classification and text-to-speech.

use crate::capability::Skill;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{provider} request failed: {message}")]
    Request { provider: &'static str, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Which skill to run for a piece of user text.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub skill_id: String,
    pub input: Value,
    /// What to say to the user once the skill has run, if the classifier
    /// produced one.
    pub reply: Option<String>,
}

/// Synthesized speech ready for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    /// Wire name of the audio format, e.g. `pcm16`.
    pub encoding: String,
    pub data: Bytes,
    /// Playback length, used to size the echo suppression window.
    pub duration: Duration,
}

/// Turns one utterance of raw PCM16 audio into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> Result<String, CollaboratorError>;
}

/// Maps user text onto one of the available skills.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Returns `None` if no skill matches.
    async fn classify(&self, text: &str, skills: &[Skill]) -> Result<Option<Intent>, CollaboratorError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, CollaboratorError>;
}

/// The set of collaborators one voice pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub synthesizer: Arc<dyn Synthesizer>,
}
