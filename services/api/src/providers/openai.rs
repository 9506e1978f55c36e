//! OpenAI-compatible speech-to-text, text-to-speech and function-calling
//! intent classification.

use crate::audio_utils::{self, OPENAI_SPEECH_PCM16_SAMPLE_RATE};
use crate::config::Config;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        AudioInput, ChatCompletionMessageToolCall, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, CreateChatCompletionRequestArgs,
        CreateSpeechRequestArgs, CreateTranscriptionRequestArgs, FunctionObjectArgs, SpeechModel,
        SpeechResponseFormat, Voice,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chorus_core::capability::Skill;
use chorus_core::collaborators::{
    CollaboratorError, Collaborators, Intent, IntentClassifier, SpeechAudio, Synthesizer,
    Transcriber,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const PROVIDER: &str = "openai";

const CLASSIFIER_PROMPT: &str = "You are the voice front end of a music player. \
Pick the one tool that fulfils the user's request and fill in its arguments. \
If no tool fits, answer briefly in plain text instead. Keep any text reply to one short sentence.";

/// Talks to one OpenAI-compatible endpoint for every collaborator role.
pub struct OpenAiCollaborators {
    client: Client<OpenAIConfig>,
    chat_model: String,
    transcription_model: String,
    speech_model: SpeechModel,
    voice: Voice,
    input_sample_rate: u32,
}

impl OpenAiCollaborators {
    pub fn new(config: &Config) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(&config.openai_api_key);
        if let Some(base) = &config.openai_api_base {
            openai_config = openai_config.with_api_base(base);
        }
        Self {
            client: Client::with_config(openai_config),
            chat_model: config.chat_model.clone(),
            transcription_model: config.transcription_model.clone(),
            speech_model: speech_model(&config.speech_model),
            voice: voice(&config.speech_voice),
            input_sample_rate: config.sample_rate,
        }
    }

    /// Uses this adapter for all three roles.
    pub fn into_collaborators(self) -> Collaborators {
        let shared = Arc::new(self);
        Collaborators {
            transcriber: shared.clone(),
            classifier: shared.clone(),
            synthesizer: shared,
        }
    }
}

fn request_error(e: OpenAIError) -> CollaboratorError {
    CollaboratorError::Request {
        provider: PROVIDER,
        message: e.to_string(),
    }
}

/// Maps a configured voice name onto the API's voice, falling back to `alloy`.
fn voice(name: &str) -> Voice {
    serde_json::from_value(Value::String(name.to_lowercase())).unwrap_or_else(|_| {
        warn!(voice = name, "Unknown speech voice; using alloy");
        Voice::Alloy
    })
}

fn speech_model(name: &str) -> SpeechModel {
    match name {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    }
}

/// One function tool per skill, described by the skill's parameter schema.
fn skill_tools(skills: &[Skill]) -> Result<Vec<ChatCompletionTool>, OpenAIError> {
    skills
        .iter()
        .map(|skill| {
            ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(&skill.id)
                        .description(&skill.description)
                        .parameters(skill.parameters.to_json())
                        .build()?,
                )
                .build()
        })
        .collect()
}

/// Reads the model's first tool call as an intent.
fn intent_from_call(
    call: &ChatCompletionMessageToolCall,
    reply: Option<String>,
) -> Result<Intent, CollaboratorError> {
    let arguments = call.function.arguments.trim();
    let input = if arguments.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(arguments).map_err(|e| {
            CollaboratorError::InvalidResponse(format!(
                "tool call arguments for {} are not JSON: {e}",
                call.function.name
            ))
        })?
    };
    Ok(Intent {
        skill_id: call.function.name.clone(),
        input,
        reply,
    })
}

#[async_trait]
impl Transcriber for OpenAiCollaborators {
    async fn transcribe(&self, audio: Bytes) -> Result<String, CollaboratorError> {
        let wav = audio_utils::pcm16_to_wav(&audio, self.input_sample_rate);
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8("utterance.wav".to_string(), wav))
            .model(&self.transcription_model)
            .build()
            .map_err(request_error)?;
        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(request_error)?;
        debug!(chars = response.text.len(), "Transcription received");
        Ok(response.text)
    }
}

#[async_trait]
impl IntentClassifier for OpenAiCollaborators {
    async fn classify(&self, text: &str, skills: &[Skill]) -> Result<Option<Intent>, CollaboratorError> {
        if skills.is_empty() {
            return Ok(None);
        }
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(CLASSIFIER_PROMPT)
                .build()
                .map_err(request_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
                .map_err(request_error)?
                .into(),
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .tools(skill_tools(skills).map_err(request_error)?)
            .tool_choice("auto")
            .build()
            .map_err(request_error)?;

        let response = self.client.chat().create(request).await.map_err(request_error)?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::InvalidResponse("no choices in completion".to_string()))?;
        let reply = choice.message.content.filter(|content| !content.trim().is_empty());

        match choice.message.tool_calls.as_deref() {
            Some([call, rest @ ..]) => {
                if !rest.is_empty() {
                    debug!(ignored = rest.len(), "Model requested several tools; using the first");
                }
                intent_from_call(call, reply).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiCollaborators {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, CollaboratorError> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .model(self.speech_model.clone())
            .voice(self.voice.clone())
            .response_format(SpeechResponseFormat::Pcm)
            .build()
            .map_err(request_error)?;
        let response = self.client.audio().speech(request).await.map_err(request_error)?;
        let duration = audio_utils::pcm16_duration(response.bytes.len(), OPENAI_SPEECH_PCM16_SAMPLE_RATE);
        Ok(SpeechAudio {
            encoding: "pcm16".to_string(),
            data: response.bytes,
            duration,
        })
    }
}
