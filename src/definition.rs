//! Typed agent definition bound from configuration
//!
//! Field names follow the configuration key names (`Name`, `Model:Id`,
//! `Tools:0:Type`, ...). Every field has a default so partially populated
//! configuration still binds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::binder::lenient_bool;

/// Describes how to construct a runtime agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentDefinition {
    /// Agent kind understood by the factory (e.g. `chat_completion_agent`)
    pub r#type: Option<String>,

    /// Stable identifier
    pub id: Option<String>,

    /// Human-readable name
    pub name: Option<String>,

    pub description: Option<String>,

    /// System instructions given to the agent
    pub instructions: Option<String>,

    pub metadata: Option<AgentMetadata>,

    /// Model the agent talks to
    pub model: Option<ModelDefinition>,

    pub inputs: Vec<AgentInput>,

    pub outputs: Vec<AgentOutput>,

    /// Instruction template settings
    pub template: Option<TemplateDefinition>,

    pub tools: Vec<AgentToolDefinition>,
}

/// Authoring metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentMetadata {
    pub authors: Vec<String>,
    pub tags: Vec<String>,
}

/// Model selection and invocation options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ModelDefinition {
    /// Model or deployment identifier
    pub id: Option<String>,

    /// API surface (`chat`, `responses`, ...)
    pub api: Option<String>,

    pub connection: Option<ModelConnection>,

    /// Free-form execution settings (temperature, max tokens, ...)
    pub options: BTreeMap<String, String>,
}

/// Which service connection the model is reached through
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ModelConnection {
    pub service_id: Option<String>,
    pub extensions: BTreeMap<String, String>,
}

/// A named input the agent expects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentInput {
    pub name: Option<String>,
    pub description: Option<String>,

    #[serde(deserialize_with = "lenient_bool")]
    pub required: bool,

    /// Value used when the caller does not supply one
    pub default: Option<String>,
}

/// A named output the agent produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentOutput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub r#type: Option<String>,
}

/// Instruction template format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TemplateDefinition {
    /// Template language (`semantic-kernel`, `handlebars`, ...)
    pub format: Option<String>,
    pub parser: Option<String>,
}

/// A tool made available to the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentToolDefinition {
    pub id: Option<String>,
    pub r#type: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub options: BTreeMap<String, String>,
}
