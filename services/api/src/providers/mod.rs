//! Collaborator adapters and built-in capability providers.

pub mod openai;
pub mod playback;
