use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Every failure the relay can hit. None of them are recovered from; the
/// variant only decides the process exit code.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid alert payload: {0}")]
    Input(String),

    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("provider contract violation at {endpoint}: {detail}")]
    ProviderContract { endpoint: String, detail: String },

    #[error("{context}: {}", path.display())]
    Filesystem {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {} is not a JSON object of strings", path.display())]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RelayError {
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    pub fn filesystem(
        context: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Filesystem {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    pub fn contract(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ProviderContract {
            endpoint: endpoint.into(),
            detail: detail.into(),
        }
    }

    /// Process exit code for this failure kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            RelayError::Config(_) => 2,
            RelayError::Input(_) => 3,
            RelayError::Transport { .. } => 4,
            RelayError::ProviderContract { .. } => 5,
            RelayError::Filesystem { .. } | RelayError::CacheCorrupt { .. } => 6,
        }
    }
}
