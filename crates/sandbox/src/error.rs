use thiserror::Error;

/// Errors returned by the simulated provider.
///
/// They mirror the failure classes of a real cloud API: missing resources,
/// conflicting names, and resources still referenced by others.
#[derive(Debug, Error)]
pub enum Error {
    /// Resource does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Resource kind, e.g. `network`
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// A resource with the same unique key already exists
    #[error("{kind} already exists: {key}")]
    AlreadyExists {
        /// Resource kind
        kind: &'static str,
        /// The conflicting key
        key: String,
    },

    /// Resource is still referenced by others
    #[error("dependency violation: {0}")]
    DependencyViolation(String),

    /// Malformed or out-of-range CIDR block
    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),

    /// Record change the provider refuses
    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// IO error reading or writing the state file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State file is not valid JSON
    #[error("corrupt state file: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether retrying later could succeed without anyone fixing the input
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::DependencyViolation(_))
    }
}

/// Result type for provider calls
pub type Result<T> = std::result::Result<T, Error>;
