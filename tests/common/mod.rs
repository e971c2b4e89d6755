//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alga_agent_appconfig::provider::{ConfigConnection, ConfigConnector};
use alga_agent_appconfig::store::{ConnectionString, MemoryConfigStore, StoreConnector};
use alga_agent_appconfig::{AgentCreationOptions, AgentDefinition, AgentFactory};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Factory that hands back the definition it was given and records every call
#[derive(Default)]
pub struct RecordingFactory {
    definitions: Mutex<Vec<AgentDefinition>>,
}

impl RecordingFactory {
    pub fn calls(&self) -> usize {
        self.definitions.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<AgentDefinition> {
        self.definitions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AgentFactory for RecordingFactory {
    type Runtime = ();
    type Agent = AgentDefinition;

    async fn create(
        &self,
        _runtime: Arc<()>,
        definition: AgentDefinition,
        _options: Option<&AgentCreationOptions<()>>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Option<AgentDefinition>> {
        self.definitions.lock().unwrap().push(definition.clone());
        Ok(Some(definition))
    }
}

/// Connector routing each connection string to a store by endpoint host
#[derive(Default)]
pub struct RoutingConnector {
    stores: HashMap<String, Arc<MemoryConfigStore>>,
}

impl RoutingConnector {
    pub fn with_store(mut self, host: &str, store: Arc<MemoryConfigStore>) -> Self {
        self.stores.insert(host.to_string(), store);
        self
    }
}

#[async_trait]
impl ConfigConnector for RoutingConnector {
    async fn connect(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Box<dyn ConfigConnection>> {
        let parsed = ConnectionString::parse(connection_string)?;
        let host = parsed.endpoint.host_str().unwrap_or_default().to_string();
        let store = self
            .stores
            .get(&host)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no store for {}", host))?;
        StoreConnector::new(store).connect(connection_string, cancel).await
    }
}

pub fn connection_string(host: &str) -> String {
    format!("Endpoint=https://{};Id=test-id;Secret=c2VjcmV0", host)
}
