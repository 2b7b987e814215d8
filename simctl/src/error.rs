//! Error taxonomy for the control plane.
//!
//! Transport and syntax failures are terminal for the operation that hit
//! them. Remote logic failures are always surfaced to the immediate caller.
//! Cache mismatches are handled inside the session by reloading, and hook
//! failures never leave the hook boundary (see [`crate::hooks::HookError`]).

use crate::decoder::ErrorResult;
use lua_codec::ParseError;
use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("syntax error in fragment `{fragment}` (line {line}): {message}")]
    Syntax {
        fragment: String,
        line: usize,
        message: String,
    },

    #[error("remote error: {0}")]
    RemoteLogic(ErrorResult),

    #[error("capability `{capability}` is not registered on the remote side")]
    CacheMismatch { capability: String },

    #[error("library script `{0}` not found")]
    MissingLibrary(String),

    #[error("unknown script fragment `{0}`")]
    UnknownFragment(String),

    #[error("failed to load capability from `{directory}` ({identifier}): {reason}")]
    Capability {
        directory: String,
        identifier: String,
        reason: String,
    },

    #[error("no capability named `{name}` on agent {agent_index}")]
    UnknownCapability { name: String, agent_index: usize },

    #[error("transaction error: {0}")]
    TransactionState(String),

    #[error("invalid argument for `{capability}`: {message}")]
    InvalidArgument { capability: String, message: String },

    #[error("could not decode reply: {0}")]
    Decode(#[from] ParseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    pub fn invalid_argument(capability: &str, message: impl Into<String>) -> Self {
        ControlError::InvalidArgument {
            capability: capability.to_string(),
            message: message.into(),
        }
    }

    /// True for errors after which the session should not keep going.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControlError::Transport(_)
                | ControlError::Syntax { .. }
                | ControlError::MissingLibrary(_)
                | ControlError::Capability { .. }
        )
    }
}

impl From<ErrorResult> for ControlError {
    fn from(e: ErrorResult) -> Self {
        ControlError::RemoteLogic(e)
    }
}

impl From<toml::de::Error> for ControlError {
    fn from(e: toml::de::Error) -> Self {
        ControlError::Config(e.to_string())
    }
}
