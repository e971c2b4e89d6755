//! Agent construction from definitions

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::definition::AgentDefinition;

/// Options forwarded to the factory on every creation
#[derive(Debug, Clone)]
pub struct AgentCreationOptions<R> {
    /// Runtime context to build the agent in; the factory's default runtime is used when absent
    pub runtime: Option<Arc<R>>,

    /// Factory-specific settings
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl<R> Default for AgentCreationOptions<R> {
    fn default() -> Self {
        Self {
            runtime: None,
            settings: BTreeMap::new(),
        }
    }
}

impl<R> AgentCreationOptions<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, runtime: Arc<R>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(name.into(), value);
        self
    }
}

/// Builds runtime agents from bound definitions
#[async_trait]
pub trait AgentFactory: Send + Sync {
    /// Context agents are created in
    type Runtime: Default + Send + Sync + 'static;

    type Agent: Send + 'static;

    /// `Ok(None)` is a valid outcome (e.g. the definition's type is not handled)
    async fn create(
        &self,
        runtime: Arc<Self::Runtime>,
        definition: AgentDefinition,
        options: Option<&AgentCreationOptions<Self::Runtime>>,
        cancel: &CancellationToken,
    ) -> Result<Option<Self::Agent>>;
}

/// Agent that is fully described by its definition
#[derive(Debug, Clone, Serialize)]
pub struct DeclarativeAgent {
    /// Instance identifier, new for every build
    pub instance_id: Uuid,

    pub definition: AgentDefinition,

    /// Factory settings the agent was created with
    pub settings: BTreeMap<String, serde_json::Value>,

    /// Timestamp when the agent was built
    pub created_at: u64,
}

impl DeclarativeAgent {
    pub fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }
}

/// Factory producing [`DeclarativeAgent`]s
///
/// Definitions whose `Type` is not in the supported list yield no agent.
/// An empty list accepts every type.
#[derive(Debug, Clone, Default)]
pub struct DeclarativeAgentFactory {
    supported_types: Vec<String>,
}

impl DeclarativeAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported_types: types.into_iter().map(Into::into).collect(),
        }
    }

    fn supports(&self, definition: &AgentDefinition) -> bool {
        if self.supported_types.is_empty() {
            return true;
        }
        definition
            .r#type
            .as_deref()
            .map(|t| self.supported_types.iter().any(|s| s.eq_ignore_ascii_case(t)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl AgentFactory for DeclarativeAgentFactory {
    type Runtime = ();
    type Agent = DeclarativeAgent;

    async fn create(
        &self,
        _runtime: Arc<()>,
        definition: AgentDefinition,
        options: Option<&AgentCreationOptions<()>>,
        cancel: &CancellationToken,
    ) -> Result<Option<DeclarativeAgent>> {
        if cancel.is_cancelled() {
            bail!("agent creation cancelled");
        }

        if !self.supports(&definition) {
            tracing::warn!(
                agent_type = definition.r#type.as_deref().unwrap_or("<none>"),
                "Agent type not supported by factory"
            );
            return Ok(None);
        }

        if definition.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            bail!("Agent definition is missing Name");
        }

        let agent = DeclarativeAgent {
            instance_id: Uuid::new_v4(),
            settings: options.map(|o| o.settings.clone()).unwrap_or_default(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            definition,
        };

        tracing::debug!(
            instance_id = %agent.instance_id,
            name = agent.name().unwrap_or_default(),
            "Created declarative agent"
        );

        Ok(Some(agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, agent_type: Option<&str>) -> AgentDefinition {
        AgentDefinition {
            name: Some(name.to_string()),
            r#type: agent_type.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_agent_with_options() {
        let factory = DeclarativeAgentFactory::new();
        let options = AgentCreationOptions::new()
            .with_setting("tenant", serde_json::json!("tenant-123"));

        let agent = factory
            .create(Arc::new(()), named("demo-agent", None), Some(&options), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(agent.name(), Some("demo-agent"));
        assert_eq!(agent.settings["tenant"], "tenant-123");
        assert!(agent.created_at > 0);
    }

    #[tokio::test]
    async fn unsupported_type_yields_no_agent() {
        let factory = DeclarativeAgentFactory::with_types(["chat_completion_agent"]);
        let cancel = CancellationToken::new();

        let none = factory
            .create(Arc::new(()), named("a", Some("assistant")), None, &cancel)
            .await
            .unwrap();
        assert!(none.is_none());

        let some = factory
            .create(Arc::new(()), named("a", Some("Chat_Completion_Agent")), None, &cancel)
            .await
            .unwrap();
        assert!(some.is_some());
    }

    #[tokio::test]
    async fn missing_name_is_an_error() {
        let factory = DeclarativeAgentFactory::new();
        let err = factory
            .create(Arc::new(()), AgentDefinition::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing Name"));
    }

    #[tokio::test]
    async fn cancelled_creation_fails() {
        let factory = DeclarativeAgentFactory::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(factory
            .create(Arc::new(()), named("a", None), None, &cancel)
            .await
            .is_err());
    }
}
