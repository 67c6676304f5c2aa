//! Error kinds surfaced by the action engine

use thiserror::Error;

/// Errors produced while dispatching an action.
///
/// Expected conditions (an unknown action, a malformed client payload) are
/// converted into well-formed responses by the engine. Handler failures
/// propagate to the caller of [`ActionEngine::handle_action`](crate::ActionEngine::handle_action).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("action `{id}` has no registered handler")]
    UnresolvedAction { id: String },

    #[error("malformed transfer payload: {0}")]
    MalformedTransferPayload(String),

    #[error("action `{id}` failed: {message}")]
    HandlerFailure { id: String, message: String },

    #[error("{} tracked invocation(s) failed", .0.len())]
    Aggregate(Vec<ActionError>),

    #[error("response headers hook failed: {0}")]
    HeaderHook(String),

    #[error("invocation limit of {limit} reached")]
    InvocationLimit { limit: usize },

    #[error("invocation of `{id}` was cancelled")]
    Cancelled { id: String },
}

impl ActionError {
    /// Build a handler failure for the given action.
    pub fn handler(id: impl Into<String>, message: impl ToString) -> Self {
        Self::HandlerFailure {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// Build an unresolved-action error.
    pub fn unresolved(id: impl Into<String>) -> Self {
        Self::UnresolvedAction { id: id.into() }
    }

    /// Whether this error came out of running handler code.
    ///
    /// Header hook failures and cancelled invocations are grouped here
    /// since the engine has no recovery path for either.
    pub fn is_handler_failure(&self) -> bool {
        matches!(
            self,
            Self::HandlerFailure { .. }
                | Self::Aggregate(_)
                | Self::HeaderHook(_)
                | Self::Cancelled { .. }
        )
    }

    /// Flatten nested aggregates into their leaf errors.
    pub fn leaves(&self) -> Vec<&ActionError> {
        match self {
            Self::Aggregate(errors) => errors.iter().flat_map(|e| e.leaves()).collect(),
            other => vec![other],
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedTransferPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;
