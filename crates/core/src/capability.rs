//! Capability discovery and skill routing.
//!
//! Providers register an [`AgentDescriptor`] together with one handler per
//! declared skill. Descriptors are only used for discovery; dispatch goes
//! through the flat skill-id → handler map.

use crate::events::SessionId;
use crate::task::Task;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

/// One named, typed property of a skill's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl PropertySchema {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            kind: "string".to_string(),
            description: Some(description.into()),
            allowed: None,
        }
    }

    pub fn one_of(description: impl Into<String>, values: &[&str]) -> Self {
        Self {
            allowed: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Self::string(description)
        }
    }
}

/// JSON-schema-like declaration of a skill's input object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ParameterSchema {
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Renders the declaration as a JSON schema value, e.g. for tool calling.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl Skill {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            parameters: ParameterSchema::default(),
            tags: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_examples(mut self, examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|e| e.to_string()).collect();
        self
    }
}

/// A provider's "agent card". The name doubles as the provider id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    pub skills: Vec<Skill>,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
        }
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn with_capabilities(mut self, capabilities: AgentCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_modes(mut self, input: &[&str], output: &[&str]) -> Self {
        self.default_input_modes = input.iter().map(|m| m.to_string()).collect();
        self.default_output_modes = output.iter().map(|m| m.to_string()).collect();
        self
    }
}

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Executes one skill.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn handle(&self, input: Value, session_id: &SessionId, task: &Task) -> Result<Value, SkillError>;
}

/// Adapts an async closure into a [`SkillHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> SkillHandler for FnHandler<F>
where
    F: Fn(Value, SessionId, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, SkillError>> + Send + 'static,
{
    async fn handle(&self, input: Value, session_id: &SessionId, task: &Task) -> Result<Value, SkillError> {
        (self.0)(input, session_id.clone(), task.clone()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn SkillHandler>
where
    F: Fn(Value, SessionId, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, SkillError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

pub type SkillHandlers = HashMap<String, Arc<dyn SkillHandler>>;

#[derive(Default)]
struct RegistryInner {
    providers: BTreeMap<String, AgentDescriptor>,
    /// skill id → (provider name, handler)
    handlers: HashMap<String, (String, Arc<dyn SkillHandler>)>,
}

/// Read-mostly store of provider descriptors and skill handlers.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("CapabilityRegistry")
            .field("providers", &inner.providers.keys().collect::<Vec<_>>())
            .field("skills", &inner.handlers.len())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `card` and routes each declared skill to its handler.
    ///
    /// Returns the skill ids that were previously served by a different
    /// provider and are now shadowed. Re-registering a provider under the
    /// same name replaces its card and does not count as shadowing.
    pub fn register_provider(&self, card: AgentDescriptor, mut handlers: SkillHandlers) -> Vec<String> {
        let provider = card.name.clone();
        let mut shadowed = Vec::new();
        let mut inner = self.inner.write();

        for skill in &card.skills {
            let Some(handler) = handlers.remove(&skill.id) else {
                warn!(provider = %provider, skill = %skill.id, "Skill declared without a handler");
                continue;
            };
            let previous = inner
                .handlers
                .insert(skill.id.clone(), (provider.clone(), handler))
                .map(|(owner, _)| owner);
            if let Some(previous) = previous.filter(|owner| *owner != provider) {
                warn!(
                    skill = %skill.id,
                    previous = %previous,
                    provider = %provider,
                    "Skill id already registered; overwriting handler"
                );
                shadowed.push(skill.id.clone());
            }
        }
        for undeclared in handlers.keys() {
            warn!(provider = %provider, skill = %undeclared, "Ignoring handler for undeclared skill");
        }

        info!(provider = %provider, skills = card.skills.len(), "Registered capability provider");
        inner.providers.insert(provider, card);
        shadowed
    }

    pub fn get_card(&self, provider_id: &str) -> Option<AgentDescriptor> {
        self.inner.read().providers.get(provider_id).cloned()
    }

    /// Every registered descriptor, ordered by provider name.
    pub fn list_providers(&self) -> Vec<AgentDescriptor> {
        self.inner.read().providers.values().cloned().collect()
    }

    pub fn handler(&self, skill_id: &str) -> Option<Arc<dyn SkillHandler>> {
        self.inner
            .read()
            .handlers
            .get(skill_id)
            .map(|(_, handler)| handler.clone())
    }

    pub fn has_skill(&self, skill_id: &str) -> bool {
        self.inner.read().handlers.contains_key(skill_id)
    }

    /// All skills that currently have a handler, in provider order. A skill
    /// shadowed by a later provider is reported once, from its current owner.
    pub fn skills(&self) -> Vec<Skill> {
        let guard = self.inner.read();
        let inner = &*guard;
        inner
            .providers
            .iter()
            .flat_map(|(provider, card)| {
                card.skills.iter().filter(move |skill| {
                    inner
                        .handlers
                        .get(&skill.id)
                        .is_some_and(|(owner, _)| owner == provider)
                })
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Arc<dyn SkillHandler> {
        handler_fn(|input, _, _| async move { Ok::<_, SkillError>(input) })
    }

    fn card(name: &str, skills: &[&str]) -> AgentDescriptor {
        skills.iter().fold(AgentDescriptor::new(name, "test provider", "1.0.0"), |card, id| {
            card.with_skill(Skill::new(*id, *id, "test skill"))
        })
    }

    fn handlers(ids: &[&str]) -> SkillHandlers {
        ids.iter().map(|id| (id.to_string(), echo())).collect()
    }

    #[test]
    fn test_register_and_discover() {
        let registry = CapabilityRegistry::new();
        let shadowed = registry.register_provider(card("music", &["play", "pause"]), handlers(&["play", "pause"]));

        assert!(shadowed.is_empty());
        assert!(registry.has_skill("play"));
        assert_eq!(registry.get_card("music").unwrap().skills.len(), 2);
        assert!(registry.get_card("weather").is_none());
        assert_eq!(registry.list_providers().len(), 1);
    }

    #[test]
    fn test_duplicate_skill_is_reported_and_overwritten() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(card("a", &["play"]), handlers(&["play"]));
        let shadowed = registry.register_provider(card("b", &["play", "stop"]), handlers(&["play", "stop"]));

        assert_eq!(shadowed, vec!["play".to_string()]);
        let skills: Vec<_> = registry.skills().into_iter().map(|s| s.id).collect();
        assert_eq!(skills, vec!["play".to_string(), "stop".to_string()]);
    }

    #[test]
    fn test_reregistering_same_provider_is_not_shadowing() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(card("a", &["play"]), handlers(&["play"]));
        assert!(registry.register_provider(card("a", &["play"]), handlers(&["play"])).is_empty());
        assert_eq!(registry.skills().len(), 1);
    }

    #[test]
    fn test_declared_skill_without_handler_is_not_routable() {
        let registry = CapabilityRegistry::new();
        registry.register_provider(card("a", &["play", "pause"]), handlers(&["play", "extra"]));

        assert!(registry.handler("play").is_some());
        assert!(registry.handler("pause").is_none());
        assert!(registry.handler("extra").is_none());
        assert_eq!(registry.skills().len(), 1);
    }

    #[test]
    fn test_descriptor_wire_format_is_camel_case() {
        let skill = Skill::new("play_by_mood", "Play by mood", "Plays music for a mood")
            .with_parameters(ParameterSchema::default().property(
                "mood",
                PropertySchema::one_of("Target mood", &["happy", "calm"]),
                true,
            ))
            .with_tags(&["music"]);
        let descriptor = AgentDescriptor::new("music", "Music control", "0.1.0").with_skill(skill);
        let value = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(value["defaultInputModes"], json!(["text"]));
        assert_eq!(value["capabilities"]["pushNotifications"], json!(false));
        let params = &value["skills"][0]["parameters"];
        assert_eq!(params["type"], "object");
        assert_eq!(params["required"], json!(["mood"]));
        assert_eq!(params["properties"]["mood"]["enum"], json!(["happy", "calm"]));
        assert!(value["skills"][0].get("examples").is_none());
    }
}
