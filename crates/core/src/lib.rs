pub mod bus;
pub mod capability;
pub mod collaborators;
pub mod events;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod segmenter;
pub mod session;
pub mod task;
pub mod timer;

pub use orchestrator::{Orchestrator, OrchestratorConfig};

/// Commands a capability provider can push to a session's client.
///
/// Published on [`events::topics::PLAYBACK`] as a JSON payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PlaybackCommand {
    /// Start music matching the given mood.
    Play { mood: String },
    Pause,
    Resume,
    Skip,
}
