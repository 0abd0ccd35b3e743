use std::io;

/// Errors produced by the profile, credential and connector layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("profile {0:?} not found")]
    ProfileNotFound(String),

    #[error("no connector for protocol {0}")]
    NoConnector(String),

    #[error("{0}")]
    Validation(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("invalid backend: {0} (must be: auto, 1password, keyring, or file)")]
    InvalidBackend(String),

    #[error("{backend} backend not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("{backend} error: {msg}")]
    Backend { backend: &'static str, msg: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with status {code}")]
    Exited { program: String, code: i32 },

    #[error("{program} terminated by signal {signal}")]
    Signaled { program: String, signal: i32 },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Exit status of the delegated tool, if this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Exited { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
