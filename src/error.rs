//! Error types for agent bootstrap and refresh

use std::fmt;

use thiserror::Error;

use crate::binder::BindError;

/// Session state a refresh depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingState {
    /// Configuration refresher handle
    Refresher,

    /// Configuration snapshot
    Configuration,

    /// Change token
    ChangeToken,
}

impl fmt::Display for MissingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingState::Refresher => f.write_str("Configuration refresher"),
            MissingState::Configuration => f.write_str("Configuration"),
            MissingState::ChangeToken => f.write_str("Change token"),
        }
    }
}

/// Errors surfaced by [`AgentConfigSession`](crate::AgentConfigSession)
#[derive(Debug, Error)]
pub enum AppConfigError {
    /// Refresh was called before a bootstrap produced the named piece of state
    #[error("{0} is not initialized. Ensure you have called create_agent first.")]
    NotInitialized(MissingState),

    /// The caller cancelled the operation while it was suspended
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Bind(#[from] BindError),

    /// Failure from the connector, store, refresher or agent factory
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl AppConfigError {
    /// Which piece of session state was missing, if this is an initialization error
    pub fn missing_state(&self) -> Option<MissingState> {
        match self {
            AppConfigError::NotInitialized(missing) => Some(*missing),
            _ => None,
        }
    }
}

pub type Result<T, E = AppConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_initialized_messages_name_the_missing_piece() {
        let err = AppConfigError::NotInitialized(MissingState::Refresher);
        assert_eq!(
            err.to_string(),
            "Configuration refresher is not initialized. Ensure you have called create_agent first."
        );

        let err = AppConfigError::NotInitialized(MissingState::ChangeToken);
        assert!(err.to_string().starts_with("Change token is not initialized"));
        assert_eq!(err.missing_state(), Some(MissingState::ChangeToken));
    }

    #[test]
    fn upstream_errors_keep_their_message() {
        let err: AppConfigError = anyhow::anyhow!("connection refused").into();
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(err.missing_state(), None);
    }
}
