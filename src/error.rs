use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the harness and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid pattern for --{flag}: {source}")]
    InvalidPattern {
        flag: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("invalid label \"{0}\": expected key=value")]
    InvalidLabel(String),

    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("cluster request failed: {0}")]
    Cluster(String),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("failed to decode object: {0}")]
    Decode(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Ways a wait can end without the condition being met.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("condition not met within {waited:?}")]
    Timeout { waited: Duration },

    #[error("wait cancelled by context")]
    Cancelled,

    #[error("wait stopped by stop signal")]
    Stopped,

    #[error("condition failed: {0}")]
    Condition(#[source] Box<Error>),
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
