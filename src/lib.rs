//! Alga PSA App Configuration Agent
//!
//! Builds AI agents from settings held in a remote configuration store and
//! rebuilds them when those settings change:
//!
//! - Connection strings, key/label selection and change tracking over a
//!   pluggable [`store::ConfigStore`]
//! - Binding of flat `Section:Key` settings into an [`AgentDefinition`]
//! - An [`AgentConfigSession`] owning the bootstrap and refresh lifecycle
//! - A [`refresh_loop`] that polls the session and hands out rebuilt agents

pub mod binder;
pub mod config;
pub mod definition;
pub mod error;
pub mod factory;
pub mod provider;
pub mod refresh_loop;
pub mod session;
pub mod store;

pub use crate::config::Settings;
pub use crate::definition::AgentDefinition;
pub use crate::error::{AppConfigError, MissingState, Result};
pub use crate::factory::{AgentCreationOptions, AgentFactory, DeclarativeAgent, DeclarativeAgentFactory};
pub use crate::provider::{RefreshOptions, WatchScope};
pub use crate::session::AgentConfigSession;
