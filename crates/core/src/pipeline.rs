//! The voice response loop.
//!
//! One turn: utterance (or typed text) → transcript → intent → task →
//! spoken reply. Every trigger passes through the response gate first, so a
//! session never has two replies in flight, and a trigger arriving within
//! the debounce window after the last reply is dropped.

use crate::bus::EventBus;
use crate::capability::CapabilityRegistry;
use crate::collaborators::{Collaborators, IntentClassifier, Synthesizer, Transcriber};
use crate::events::{Event, Payload, Role, SessionId, topics};
use crate::gate::{ResponseGate, ResponseGuard};
use crate::segmenter::Segmenter;
use crate::task::{TaskManager, TaskState};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Minimum gap between the end of one reply and the start of the next.
    pub response_debounce: Duration,
    /// Spoken when any step of the turn fails.
    pub fallback_reply: String,
    /// Spoken when no skill matches the request.
    pub unknown_reply: String,
    /// Spoken after a skill succeeds without a reply of its own.
    pub done_reply: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            response_debounce: Duration::from_millis(2000),
            fallback_reply: "Sorry, something went wrong. Please try again.".to_string(),
            unknown_reply: "Sorry, I can't help with that yet.".to_string(),
            done_reply: "Done.".to_string(),
        }
    }
}

/// What started a turn.
#[derive(Debug, Clone)]
pub enum Trigger {
    Utterance(Bytes),
    Text(String),
}

pub struct VoicePipeline {
    config: PipelineConfig,
    bus: Arc<EventBus>,
    gate: Arc<ResponseGate>,
    segmenter: Segmenter,
    registry: Arc<CapabilityRegistry>,
    tasks: Arc<TaskManager>,
    transcriber: Arc<dyn Transcriber>,
    classifier: Arc<dyn IntentClassifier>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for VoicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VoicePipeline {
    pub fn new(
        config: PipelineConfig,
        bus: Arc<EventBus>,
        gate: Arc<ResponseGate>,
        segmenter: Segmenter,
        registry: Arc<CapabilityRegistry>,
        tasks: Arc<TaskManager>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            bus,
            gate,
            segmenter,
            registry,
            tasks,
            transcriber: collaborators.transcriber,
            classifier: collaborators.classifier,
            synthesizer: collaborators.synthesizer,
        }
    }

    /// Subscribes the pipeline to utterance and typed-text events.
    ///
    /// The bus only holds a weak reference; the pipeline stops responding
    /// once the last strong reference is dropped.
    pub fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.bus.subscribe(topics::UTTERANCE_READY, {
            let weak = weak.clone();
            move |event| {
                if let Payload::Utterance(audio) = &event.payload {
                    Self::on_trigger(&weak, &event.session_id, Trigger::Utterance(audio.clone()));
                }
            }
        });
        self.bus.subscribe(topics::USER_TEXT, move |event| {
            if let Payload::UserText(text) = &event.payload {
                Self::on_trigger(&weak, &event.session_id, Trigger::Text(text.clone()));
            }
        });
    }

    fn on_trigger(weak: &Weak<Self>, session_id: &SessionId, trigger: Trigger) {
        let Some(pipeline) = weak.upgrade() else {
            return;
        };
        let Some(guard) = pipeline
            .gate
            .try_acquire(session_id, pipeline.config.response_debounce)
        else {
            debug!(session_id = %session_id, "Dropping trigger; response gate closed");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %session_id, "No runtime to run the response turn on");
            return;
        };
        let span = info_span!("turn", session_id = %session_id);
        runtime.spawn(async move { pipeline.respond(guard, trigger).await }.instrument(span));
    }

    /// Runs one full turn while holding the session's response lock.
    ///
    /// Returns the reply that was spoken, if any.
    pub async fn respond(&self, guard: ResponseGuard, trigger: Trigger) -> Option<String> {
        let session_id = guard.session_id().clone();

        let text = match trigger {
            Trigger::Text(text) => text,
            Trigger::Utterance(audio) => match self.transcriber.transcribe(audio).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Transcription failed");
                    let reply = self.config.fallback_reply.clone();
                    self.reply(&session_id, &reply).await;
                    return Some(reply);
                }
            },
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            debug!("Nothing to respond to");
            return None;
        }
        self.publish_transcript(&session_id, Role::User, &text);

        let reply = self.compose(&session_id, &text).await;
        self.reply(&session_id, &reply).await;
        drop(guard);
        Some(reply)
    }

    async fn compose(&self, session_id: &SessionId, text: &str) -> String {
        let skills = self.registry.skills();
        let intent = match self.classifier.classify(text, &skills).await {
            Ok(Some(intent)) => intent,
            Ok(None) => {
                info!("No skill matched");
                return self.config.unknown_reply.clone();
            }
            Err(e) => {
                warn!(error = %e, "Intent classification failed");
                return self.config.fallback_reply.clone();
            }
        };

        info!(skill = %intent.skill_id, "Dispatching intent");
        let task = self
            .tasks
            .send(intent.skill_id, intent.input, session_id.clone())
            .await;
        if task.state != TaskState::Completed {
            warn!(task_id = %task.id, state = %task.state, error = ?task.error, "Task did not complete");
            return self.config.fallback_reply.clone();
        }

        intent
            .reply
            .or_else(|| {
                task.output
                    .as_ref()
                    .and_then(|output| output.get("message"))
                    .and_then(|message| message.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.config.done_reply.clone())
    }

    async fn reply(&self, session_id: &SessionId, text: &str) {
        self.publish_transcript(session_id, Role::Assistant, text);
        match self.synthesizer.synthesize(text).await {
            Ok(speech) => {
                self.segmenter.suppress_echo(session_id, speech.duration);
                self.bus.publish(
                    topics::AUDIO_OUT,
                    Event::new(
                        session_id.clone(),
                        Payload::Audio {
                            encoding: speech.encoding,
                            data: speech.data,
                        },
                    ),
                );
            }
            Err(e) => warn!(error = %e, "Speech synthesis failed; reply sent as text only"),
        }
    }

    fn publish_transcript(&self, session_id: &SessionId, role: Role, text: &str) {
        self.bus.publish(
            topics::TRANSCRIPT,
            Event::new(
                session_id.clone(),
                Payload::Transcript {
                    role,
                    text: text.to_string(),
                },
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AgentDescriptor, Skill, SkillError, SkillHandlers, handler_fn};
    use crate::collaborators::{
        CollaboratorError, Intent, MockIntentClassifier, MockSynthesizer, MockTranscriber,
        SpeechAudio,
    };
    use crate::segmenter::SegmenterConfig;
    use crate::session::{SessionRegistry, Transport};
    use crate::task::TaskManagerConfig;
    use parking_lot::Mutex;
    use serde_json::json;

    struct NullTransport;

    impl Transport for NullTransport {
        fn deliver(&self, _topic: &str, _event: &Event) -> bool {
            true
        }
    }

    struct Fixture {
        pipeline: Arc<VoicePipeline>,
        bus: Arc<EventBus>,
        gate: Arc<ResponseGate>,
        transcript: Arc<Mutex<Vec<(Role, String)>>>,
        audio: Arc<Mutex<usize>>,
        session: SessionId,
        _transport: Arc<NullTransport>,
    }

    fn fixture(
        transcriber: MockTranscriber,
        classifier: MockIntentClassifier,
        synthesizer: MockSynthesizer,
    ) -> Fixture {
        let bus = Arc::new(EventBus::new());
        let sessions = Arc::new(SessionRegistry::new());
        let gate = Arc::new(ResponseGate::new());
        let registry = Arc::new(CapabilityRegistry::new());
        let mut handlers = SkillHandlers::new();
        handlers.insert(
            "play_by_mood".to_string(),
            handler_fn(|input, _, _| async move {
                Ok::<_, SkillError>(json!({ "success": true, "mood": input["mood"].clone() }))
            }),
        );
        handlers.insert(
            "get_weather".to_string(),
            handler_fn(|_, _, _| async move { Ok::<_, SkillError>(json!({ "message": "It is sunny." })) }),
        );
        registry.register_provider(
            AgentDescriptor::new("test", "test", "0.0.1")
                .with_skill(Skill::new("play_by_mood", "Play by mood", "Plays music"))
                .with_skill(Skill::new("get_weather", "Weather", "Reports the weather")),
            handlers,
        );
        let tasks = Arc::new(TaskManager::new(
            TaskManagerConfig::default(),
            registry.clone(),
            bus.clone(),
        ));
        let segmenter = Segmenter::new(SegmenterConfig::default(), bus.clone(), sessions.clone());

        let transport = Arc::new(NullTransport);
        let session = SessionId::new("s1");
        sessions.register(session.clone(), &transport);

        let pipeline = Arc::new(VoicePipeline::new(
            PipelineConfig::default(),
            bus.clone(),
            gate.clone(),
            segmenter,
            registry,
            tasks,
            Collaborators {
                transcriber: Arc::new(transcriber),
                classifier: Arc::new(classifier),
                synthesizer: Arc::new(synthesizer),
            },
        ));
        pipeline.attach();

        let transcript = Arc::new(Mutex::new(Vec::new()));
        {
            let transcript = transcript.clone();
            bus.subscribe(topics::TRANSCRIPT, move |event| {
                if let Payload::Transcript { role, text } = &event.payload {
                    transcript.lock().push((*role, text.clone()));
                }
            });
        }
        let audio = Arc::new(Mutex::new(0));
        {
            let audio = audio.clone();
            bus.subscribe(topics::AUDIO_OUT, move |_| *audio.lock() += 1);
        }

        Fixture {
            pipeline,
            bus,
            gate,
            transcript,
            audio,
            session,
            _transport: transport,
        }
    }

    fn speaking_synthesizer() -> MockSynthesizer {
        let mut synthesizer = MockSynthesizer::new();
        synthesizer.expect_synthesize().returning(|_| {
            Ok(SpeechAudio {
                encoding: "pcm16".to_string(),
                data: Bytes::from_static(&[0, 0, 0, 0]),
                duration: Duration::from_millis(100),
            })
        });
        synthesizer
    }

    fn hearing(text: &'static str) -> MockTranscriber {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(move |_| Ok(text.to_string()));
        transcriber
    }

    fn classifying(skill: &'static str, input: serde_json::Value, reply: Option<&'static str>) -> MockIntentClassifier {
        let mut classifier = MockIntentClassifier::new();
        classifier.expect_classify().returning(move |_, _| {
            Ok(Some(Intent {
                skill_id: skill.to_string(),
                input: input.clone(),
                reply: reply.map(str::to_string),
            }))
        });
        classifier
    }

    fn utterance(f: &Fixture) {
        f.bus.publish(
            topics::UTTERANCE_READY,
            Event::new(f.session.clone(), Payload::Utterance(Bytes::from(vec![0u8; 16000]))),
        );
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_utterance_runs_full_turn() {
        let f = fixture(
            hearing("play something happy"),
            classifying("play_by_mood", json!({ "mood": "happy" }), Some("Playing happy music.")),
            speaking_synthesizer(),
        );

        utterance(&f);
        settle().await;

        assert_eq!(
            *f.transcript.lock(),
            vec![
                (Role::User, "play something happy".to_string()),
                (Role::Assistant, "Playing happy music.".to_string()),
            ]
        );
        assert_eq!(*f.audio.lock(), 1);
        assert!(f.gate.can_respond(&f.session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_falls_back_to_task_message() {
        let f = fixture(
            hearing("what's the weather"),
            classifying("get_weather", json!({}), None),
            speaking_synthesizer(),
        );

        utterance(&f);
        settle().await;

        assert_eq!(f.transcript.lock()[1], (Role::Assistant, "It is sunny.".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_dropped_while_response_in_flight() {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();
        let f = fixture(transcriber, MockIntentClassifier::new(), MockSynthesizer::new());

        f.gate.lock(&f.session);
        utterance(&f);
        settle().await;

        assert!(f.transcript.lock().is_empty());
        assert!(!f.gate.can_respond(&f.session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_debounced_after_reply() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(2)
            .returning(|_| Ok("play something calm".to_string()));
        let f = fixture(
            transcriber,
            classifying("play_by_mood", json!({ "mood": "calm" }), None),
            speaking_synthesizer(),
        );

        utterance(&f);
        settle().await;
        utterance(&f);
        settle().await;
        assert_eq!(f.transcript.lock().len(), 2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        utterance(&f);
        settle().await;
        assert_eq!(f.transcript.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_failure_speaks_fallback() {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().returning(|_| {
            Err(CollaboratorError::Request {
                provider: "test",
                message: "offline".to_string(),
            })
        });
        let f = fixture(transcriber, MockIntentClassifier::new(), speaking_synthesizer());

        utterance(&f);
        settle().await;

        let transcript = f.transcript.lock();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].0, Role::Assistant);
        assert_eq!(transcript[0].1, PipelineConfig::default().fallback_reply);
        assert!(f.gate.can_respond(&f.session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_text_speaks_unknown_reply() {
        let mut classifier = MockIntentClassifier::new();
        classifier.expect_classify().returning(|_, _| Ok(None));
        let f = fixture(MockTranscriber::new(), classifier, speaking_synthesizer());

        f.bus.publish(
            topics::USER_TEXT,
            Event::new(f.session.clone(), Payload::UserText("book a flight".into())),
        );
        settle().await;

        assert_eq!(
            f.transcript.lock()[1],
            (Role::Assistant, PipelineConfig::default().unknown_reply)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_failure_still_releases_gate() {
        let mut synthesizer = MockSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .returning(|_| Err(CollaboratorError::InvalidResponse("empty".into())));
        let f = fixture(
            hearing("play something happy"),
            classifying("play_by_mood", json!({ "mood": "happy" }), None),
            synthesizer,
        );

        let guard = f.gate.try_acquire(&f.session, Duration::ZERO).unwrap();
        let reply = f
            .pipeline
            .respond(guard, Trigger::Utterance(Bytes::from_static(&[1, 2])))
            .await;

        assert_eq!(reply.as_deref(), Some("Done."));
        assert_eq!(*f.audio.lock(), 0);
        assert!(f.gate.can_respond(&f.session));
    }
}
