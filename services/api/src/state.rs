//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the orchestration
//! engine and the loaded configuration.

use crate::config::Config;
use chorus_core::Orchestrator;
use chorus_core::capability::AgentDescriptor;
use std::sync::Arc;

pub const AGENT_NAME: &str = "chorus";
pub const AGENT_DESCRIPTION: &str = "Voice orchestrator routing spoken requests to capability providers";

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub config: Arc<Config>,
}

impl AppState {
    /// The orchestrator's own agent card, served at the discovery endpoint.
    pub fn descriptor(&self) -> AgentDescriptor {
        self.orchestrator
            .descriptor(AGENT_NAME, AGENT_DESCRIPTION, env!("CARGO_PKG_VERSION"))
    }

    /// Every agent resolvable by name: this orchestrator first, then the
    /// registered providers.
    pub fn agents(&self) -> Vec<AgentDescriptor> {
        let mut agents = vec![self.descriptor()];
        agents.extend(self.orchestrator.registry.list_providers());
        agents
    }
}
