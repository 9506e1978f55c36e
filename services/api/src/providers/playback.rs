//! Built-in playback-control provider.
//!
//! Its skills do not play anything themselves: each one pushes a
//! [`PlaybackCommand`] to the requesting session's client and reports success.

use chorus_core::capability::{
    AgentCapabilities, AgentDescriptor, ParameterSchema, PropertySchema, Skill, SkillError,
    SkillHandlers, handler_fn,
};
use chorus_core::events::{Event, Payload, SessionId, topics};
use chorus_core::{Orchestrator, PlaybackCommand, bus::EventBus};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

pub const PROVIDER_NAME: &str = "playback";

pub const MOODS: [&str; 6] = ["happy", "sad", "calm", "energetic", "romantic", "focused"];

pub fn descriptor() -> AgentDescriptor {
    AgentDescriptor::new(
        PROVIDER_NAME,
        "Controls music playback on the user's device",
        env!("CARGO_PKG_VERSION"),
    )
    .with_capabilities(AgentCapabilities {
        streaming: false,
        push_notifications: true,
        state_transition_history: false,
    })
    .with_skill(
        Skill::new("play_by_mood", "Play by mood", "Start playing music that matches a mood")
            .with_parameters(ParameterSchema::default().property(
                "mood",
                PropertySchema::one_of("The mood the music should match", &MOODS),
                true,
            ))
            .with_tags(&["music", "playback"])
            .with_examples(&["play something happy", "I need calm music"]),
    )
    .with_skill(
        Skill::new("pause_playback", "Pause", "Pause the music that is playing")
            .with_tags(&["playback"])
            .with_examples(&["pause", "stop the music"]),
    )
    .with_skill(
        Skill::new("resume_playback", "Resume", "Resume paused music")
            .with_tags(&["playback"])
            .with_examples(&["resume", "keep playing"]),
    )
    .with_skill(
        Skill::new("skip_track", "Skip", "Skip to the next track")
            .with_tags(&["playback"])
            .with_examples(&["next song", "skip this one"]),
    )
}

/// One handler per declared skill, each publishing on `bus`.
pub fn handlers(bus: Arc<EventBus>) -> SkillHandlers {
    let mut handlers = SkillHandlers::new();
    {
        let bus = bus.clone();
        handlers.insert(
            "play_by_mood".to_string(),
            handler_fn(move |input, session_id, _task| {
                let bus = bus.clone();
                async move {
                    let mood = input
                        .get("mood")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|mood| !mood.is_empty())
                        .ok_or_else(|| SkillError::InvalidInput("missing mood".to_string()))?
                        .to_lowercase();
                    send(&bus, session_id, PlaybackCommand::Play { mood: mood.clone() })?;
                    Ok(json!({ "success": true, "mood": mood }))
                }
            }),
        );
    }
    for (skill, action, command) in [
        ("pause_playback", "pause", PlaybackCommand::Pause),
        ("resume_playback", "resume", PlaybackCommand::Resume),
        ("skip_track", "skip", PlaybackCommand::Skip),
    ] {
        let bus = bus.clone();
        handlers.insert(
            skill.to_string(),
            handler_fn(move |_input, session_id, _task| {
                let bus = bus.clone();
                let command = command.clone();
                async move {
                    send(&bus, session_id, command)?;
                    Ok(json!({ "success": true, "action": action }))
                }
            }),
        );
    }
    handlers
}

/// Registers the provider with the orchestrator.
pub fn register(orchestrator: &Orchestrator) {
    let handlers = handlers(orchestrator.bus.clone());
    orchestrator.register_provider(descriptor(), handlers);
}

fn send(
    bus: &EventBus,
    session_id: SessionId,
    command: PlaybackCommand,
) -> Result<(), SkillError> {
    let payload = serde_json::to_value(&command).map_err(anyhow::Error::from)?;
    info!(session_id = %session_id, ?command, "Sending playback command");
    bus.publish(topics::PLAYBACK, Event::new(session_id, Payload::Json(payload)));
    Ok(())
}
