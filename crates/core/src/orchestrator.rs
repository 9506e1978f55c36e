//! Wires the engine's components together.

use crate::bus::EventBus;
use crate::capability::{AgentCapabilities, AgentDescriptor, CapabilityRegistry, SkillHandlers};
use crate::collaborators::Collaborators;
use crate::events::{Event, Payload, SessionId, topics};
use crate::gate::ResponseGate;
use crate::pipeline::{PipelineConfig, VoicePipeline};
use crate::segmenter::{FrameDisposition, Segmenter, SegmenterConfig};
use crate::session::{Session, SessionRegistry, Transport};
use crate::task::{TaskManager, TaskManagerConfig};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub segmenter: SegmenterConfig,
    pub tasks: TaskManagerConfig,
    pub pipeline: PipelineConfig,
}

/// One instance of every engine component, shareable as application state.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pub bus: Arc<EventBus>,
    pub sessions: Arc<SessionRegistry>,
    pub gate: Arc<ResponseGate>,
    pub segmenter: Segmenter,
    pub registry: Arc<CapabilityRegistry>,
    pub tasks: Arc<TaskManager>,
    pub pipeline: Arc<VoicePipeline>,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let bus = Arc::new(EventBus::new());
        let sessions = Arc::new(SessionRegistry::new());
        let gate = Arc::new(ResponseGate::new());
        let registry = Arc::new(CapabilityRegistry::new());
        let segmenter = Segmenter::new(config.segmenter.clone(), bus.clone(), sessions.clone());
        let tasks = Arc::new(TaskManager::new(config.tasks.clone(), registry.clone(), bus.clone()));
        let pipeline = Arc::new(VoicePipeline::new(
            config.pipeline.clone(),
            bus.clone(),
            gate.clone(),
            segmenter.clone(),
            registry.clone(),
            tasks.clone(),
            collaborators,
        ));

        let orchestrator = Self {
            bus,
            sessions,
            gate,
            segmenter,
            registry,
            tasks,
            pipeline,
            config: Arc::new(config),
        };
        orchestrator.wire();
        orchestrator
    }

    fn wire(&self) {
        {
            let segmenter = self.segmenter.clone();
            self.bus.subscribe(topics::AUDIO_FRAME, move |event| {
                if let Payload::AudioFrame(frame) = &event.payload {
                    segmenter.push_frame(&event.session_id, frame.clone());
                }
            });
        }
        {
            let segmenter = self.segmenter.clone();
            let gate = self.gate.clone();
            self.bus.subscribe(topics::STOP_LISTENING, move |event| {
                if !gate.can_respond(&event.session_id) {
                    debug!(session_id = %event.session_id, "Stop-listening ignored; response in flight");
                    return;
                }
                segmenter.process_now(&event.session_id);
            });
        }
        self.bus.subscribe(topics::DEVICE_SELECT, |event| {
            if let Payload::DeviceSelect(device) = &event.payload {
                info!(session_id = %event.session_id, %device, "Client selected device");
            }
        });

        for topic in topics::OUTBOUND {
            let sessions = self.sessions.clone();
            self.bus.subscribe(topic, move |event| {
                let Some(transport) = sessions.get(&event.session_id) else {
                    debug!(topic, session_id = %event.session_id, "No transport for outbound event");
                    return;
                };
                if !transport.deliver(topic, event) {
                    debug!(topic, session_id = %event.session_id, "Transport rejected outbound event");
                }
            });
        }

        self.pipeline.attach();
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Creates the session and binds it to its transport.
    pub fn connect<T>(&self, session_id: SessionId, transport: &Arc<T>) -> Arc<Session>
    where
        T: Transport + 'static,
    {
        self.sessions.register(session_id, transport)
    }

    /// Tears down every piece of per-session state.
    pub fn disconnect(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
        self.gate.release(session_id);
        info!(session_id = %session_id, "Session disconnected");
    }

    pub fn ingest_frame(&self, session_id: &SessionId, frame: Bytes) {
        self.publish(topics::AUDIO_FRAME, session_id, Payload::AudioFrame(frame));
    }

    pub fn stop_listening(&self, session_id: &SessionId) {
        self.publish(topics::STOP_LISTENING, session_id, Payload::StopListening);
    }

    pub fn select_device(&self, session_id: &SessionId, device: serde_json::Value) {
        self.publish(topics::DEVICE_SELECT, session_id, Payload::DeviceSelect(device));
    }

    pub fn user_text(&self, session_id: &SessionId, text: impl Into<String>) {
        self.publish(topics::USER_TEXT, session_id, Payload::UserText(text.into()));
    }

    /// Feeds one frame straight through the segmenter, bypassing the bus.
    pub fn push_frame(&self, session_id: &SessionId, frame: Bytes) -> FrameDisposition {
        self.segmenter.push_frame(session_id, frame)
    }

    /// Registers a capability provider. See [`CapabilityRegistry::register_provider`].
    pub fn register_provider(&self, card: AgentDescriptor, handlers: SkillHandlers) -> Vec<String> {
        self.registry.register_provider(card, handlers)
    }

    /// The orchestrator's own agent card: every routable skill under one name.
    pub fn descriptor(&self, name: &str, description: &str, version: &str) -> AgentDescriptor {
        let card = AgentDescriptor::new(name, description, version)
            .with_capabilities(AgentCapabilities {
                streaming: true,
                push_notifications: false,
                state_transition_history: true,
            })
            .with_modes(&["audio", "text"], &["audio", "text"]);
        self.registry
            .skills()
            .into_iter()
            .fold(card, AgentDescriptor::with_skill)
    }

    /// Starts the task reaper and a periodic gate prune.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let reaper = self.tasks.spawn_reaper();
        let gate = Arc::downgrade(&self.gate);
        let window = self.config.pipeline.response_debounce;
        let period = self.config.tasks.sweep_interval.max(Duration::from_secs(1));
        let pruner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gate) = gate.upgrade() else {
                    break;
                };
                let pruned = gate.prune(window);
                if pruned > 0 {
                    debug!(pruned, "Pruned idle response gate entries");
                }
            }
        });
        vec![reaper, pruner]
    }

    fn publish(&self, topic: &str, session_id: &SessionId, payload: Payload) {
        self.bus.publish(topic, Event::new(session_id.clone(), payload));
    }
}
